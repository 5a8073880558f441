//! Local preferences actor with debounced sled writes
//!
//! Holds the non-canonical state that survives restarts: the chosen audio
//! input and an unapplied critical-DSP draft. Everything else is refetched
//! from the engine on startup.
//!
//! Writes are debounced: a save replaces the pending snapshot
//! (last-write-wins) and the pending snapshot is written once the window
//! expires without further saves. `flush` and `shutdown` write immediately.
//!
//! ```ignore
//! let prefs = PrefsActor::spawn(&paths.prefs_db(), 500)?;
//! prefs.update(|p| p.selected_audio_device = Some("Loopback".into())).await?;
//! prefs.flush().await?;
//! prefs.shutdown();
//! ```

use crate::types::DspSettings;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Default debounce window in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

const PREFS_KEY: &[u8] = b"local_prefs";

/// Persisted local preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalPrefs {
    #[serde(default)]
    pub selected_audio_device: Option<String>,
    /// Pending DSP settings with unapplied critical edits
    #[serde(default)]
    pub dsp_draft: Option<DspSettings>,
}

#[derive(Debug)]
enum PrefsCommand {
    Save(LocalPrefs),
    Flush(oneshot::Sender<Result<()>>),
    Shutdown,
}

struct PrefsActor {
    db: sled::Db,
    command_rx: mpsc::Receiver<PrefsCommand>,
    pending: Option<LocalPrefs>,
    last_save: Instant,
    debounce_ms: u64,
    write_count: u64,
}

/// Cheap-to-clone handle on the preferences actor
#[derive(Clone)]
pub struct PrefsHandle {
    cmd_tx: mpsc::Sender<PrefsCommand>,
    current: Arc<Mutex<LocalPrefs>>,
}

/// Spawn the actor on `db_path` and load the stored preferences
///
/// Must be called from within a tokio runtime.
pub fn spawn(db_path: &Path, debounce_ms: u64) -> Result<PrefsHandle> {
    let db = sled::open(db_path)
        .with_context(|| format!("Failed to open preferences database at: {}", db_path.display()))?;
    info!("Preferences opened at: {}", db_path.display());

    let stored = read_prefs(&db).unwrap_or_default();
    let (cmd_tx, command_rx) = mpsc::channel(64);

    let actor = PrefsActor {
        db,
        command_rx,
        pending: None,
        last_save: Instant::now(),
        debounce_ms,
        write_count: 0,
    };
    tokio::spawn(actor.run());

    Ok(PrefsHandle {
        cmd_tx,
        current: Arc::new(Mutex::new(stored)),
    })
}

fn read_prefs(db: &sled::Db) -> Option<LocalPrefs> {
    match db.get(PREFS_KEY) {
        Ok(Some(data)) => match serde_json::from_slice::<LocalPrefs>(&data) {
            Ok(prefs) => Some(prefs),
            Err(e) => {
                warn!("Ignoring unreadable preferences: {}", e);
                None
            }
        },
        Ok(None) => {
            debug!("No stored preferences");
            None
        }
        Err(e) => {
            error!("Failed to read preferences: {}", e);
            None
        }
    }
}

impl PrefsActor {
    async fn run(mut self) {
        debug!("Preferences actor started (debounce: {}ms)", self.debounce_ms);
        let tick = if self.debounce_ms > 0 { self.debounce_ms } else { 1000 };
        let mut ticker = tokio::time::interval(Duration::from_millis(tick));

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PrefsCommand::Save(prefs)) => {
                            trace!("Queuing preferences write");
                            self.pending = Some(prefs);
                            self.last_save = Instant::now();
                            if self.debounce_ms == 0 {
                                self.write_pending().await;
                            }
                        }
                        Some(PrefsCommand::Flush(reply)) => {
                            self.write_pending().await;
                            let _ = reply.send(Ok(()));
                        }
                        Some(PrefsCommand::Shutdown) | None => {
                            self.write_pending().await;
                            info!("Preferences actor stopped ({} writes)", self.write_count);
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if self.pending.is_some()
                        && self.last_save.elapsed() >= Duration::from_millis(self.debounce_ms)
                    {
                        self.write_pending().await;
                    }
                }
            }
        }
    }

    async fn write_pending(&mut self) {
        let Some(prefs) = self.pending.take() else {
            return;
        };
        let json = match serde_json::to_vec(&prefs) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to serialize preferences: {}", e);
                return;
            }
        };

        let db = self.db.clone();
        let written = tokio::task::spawn_blocking(move || {
            db.insert(PREFS_KEY, json)?;
            db.flush()?;
            Ok::<_, sled::Error>(())
        })
        .await;

        match written {
            Ok(Ok(())) => {
                self.write_count += 1;
                trace!("Preferences written (write #{})", self.write_count);
            }
            Ok(Err(e)) => error!("Failed to write preferences: {}", e),
            Err(e) => error!("Preferences writer panicked: {}", e),
        }
    }
}

impl PrefsHandle {
    /// Preferences as last updated in this process
    pub fn get(&self) -> LocalPrefs {
        self.current.lock().clone()
    }

    /// Apply `edit` and queue a debounced write if anything changed
    pub async fn update(&self, edit: impl FnOnce(&mut LocalPrefs)) -> Result<()> {
        let snapshot = {
            let mut current = self.current.lock();
            let before = current.clone();
            edit(&mut current);
            if *current == before {
                return Ok(());
            }
            current.clone()
        };
        self.cmd_tx
            .send(PrefsCommand::Save(snapshot))
            .await
            .context("Failed to queue preferences write: actor shut down")
    }

    /// Write any pending preferences now
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(PrefsCommand::Flush(tx))
            .await
            .context("Failed to send flush: actor shut down")?;
        rx.await.context("Failed to receive flush response")?
    }

    /// Stop the actor after writing anything pending (fire-and-forget)
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.try_send(PrefsCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_update_survives_restart() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("prefs.sled");

        let handle = spawn(&path, 10_000).unwrap();
        handle
            .update(|p| p.selected_audio_device = Some("Loopback".to_string()))
            .await
            .unwrap();
        handle.flush().await.unwrap();
        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reopened = spawn(&path, 0).unwrap();
        assert_eq!(reopened.get().selected_audio_device.as_deref(), Some("Loopback"));
        reopened.shutdown();
    }

    #[tokio::test]
    async fn test_draft_round_trips() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("prefs.sled");

        let handle = spawn(&path, 0).unwrap();
        let draft = DspSettings {
            fft_size: 2048,
            ..DspSettings::default()
        };
        handle.update(|p| p.dsp_draft = Some(draft.clone())).await.unwrap();
        handle.flush().await.unwrap();
        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reopened = spawn(&path, 0).unwrap();
        assert_eq!(reopened.get().dsp_draft, Some(draft));
        reopened.shutdown();
    }

    #[tokio::test]
    async fn test_unchanged_update_is_skipped() {
        let temp = tempdir().unwrap();
        let handle = spawn(&temp.path().join("prefs.sled"), 0).unwrap();
        handle.update(|_| {}).await.unwrap();
        assert_eq!(handle.get(), LocalPrefs::default());
        handle.shutdown();
    }
}
