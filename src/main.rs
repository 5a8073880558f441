//! LedFx Control - control core for an addressable-LED controller
//!
//! Runs the control core against the in-process console engine, either as an
//! interactive REPL or headless, rendering ticks until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use ledfx_control::cli;
use ledfx_control::config::AppConfig;
use ledfx_control::controller::Controller;
use ledfx_control::engine::ConsoleEngine;
use ledfx_control::paths::AppPaths;
use ledfx_control::prefs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// LedFx Control - virtual strips, previews, effect presets and scenes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: detected per install mode)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Seed the console engine with two demo devices
    #[arg(long)]
    demo: bool,

    /// Render ticks until Ctrl+C instead of opening the REPL
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut paths = AppPaths::detect();
    if let Some(config) = &args.config {
        paths = paths.with_config(config);
    }
    let config = AppConfig::load(&paths.config).await?;
    paths.ensure_directories()?;

    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let log_dir = config.logging.file.then_some(paths.logs_dir.as_path());
    let _log_guard = init_logging(&level, log_dir)?;

    info!("Starting LedFx Control v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", paths.config.display());
    info!("Data directory: {}", paths.base_dir().display());

    let prefs = if config.persistence.enabled {
        match prefs::spawn(&paths.prefs_db(), config.persistence.debounce_ms) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Preferences disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let (engine, events) = ConsoleEngine::new("console");
    if args.demo {
        engine.seed_demo();
        info!("Console engine seeded with demo devices");
    }
    let engine = Arc::new(engine);

    let core = Arc::new(Controller::new(engine.clone(), config.core_options(), prefs));
    let mut bridge = core.start(events);
    core.bootstrap().await;

    if args.headless {
        run_headless(&core, &engine).await;
    } else {
        cli::run_repl(Arc::clone(&core), Arc::clone(&engine)).await?;
    }

    bridge.stop();
    core.shutdown().await;
    info!("LedFx Control shutdown complete");
    Ok(())
}

/// Tick the console engine at the target frame rate until Ctrl+C
async fn run_headless(core: &Controller, engine: &ConsoleEngine) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let fps = core.store().read(|s| s.target_fps).max(1);
        let frame = Duration::from_secs_f64(1.0 / fps as f64);
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(frame) => engine.tick(),
        }
    }
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ledfx-control.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
