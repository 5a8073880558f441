//! Command-line interface and REPL

use crate::codec::{Segment, SegmentList};
use crate::controller::Controller;
use crate::engine::ConsoleEngine;
use crate::frames::color_patches;
use crate::types::PhysicalDevice;
use anyhow::{anyhow, Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One parsed REPL line
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Devices,
    Virtuals,
    Segments(String),
    Compose { name: String, segments: Vec<String> },
    Recompose { virtual_id: String, segments: Vec<String> },
    Remove(String),
    DeviceAdd { address: String, pixels: u32, name: String },
    DeviceRemove(String),
    Select { virtual_id: String, effect_id: String },
    Set { virtual_id: String, key: String, value: Value },
    Start(String),
    Stop(String),
    Toggle(String),
    Presets(String),
    PresetLoad { virtual_id: String, name: String },
    PresetSave { virtual_id: String, name: String },
    PresetDelete(String),
    DspSet { key: String, value: Value },
    DspApply,
    DspDiscard,
    DspStatus,
    Fps(u32),
    Pause,
    Scenes,
    SceneSave(String),
    SceneActivate(String),
    SceneDelete(String),
    SceneShow(String),
    Export(String),
    Import(String),
    Clear,
    Preview(String),
    Help,
    Quit,
}

fn arg<'a>(words: &[&'a str], index: usize, usage: &str) -> Result<&'a str> {
    words
        .get(index)
        .copied()
        .ok_or_else(|| anyhow!("Usage: {}", usage))
}

fn json_arg(words: &[&str], from: usize, usage: &str) -> Result<Value> {
    if words.len() <= from {
        anyhow::bail!("Usage: {}", usage);
    }
    let raw = words[from..].join(" ");
    serde_json::from_str(&raw).with_context(|| format!("Not valid JSON: {}", raw))
}

/// Parse a line; blank lines yield `None`
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some(head) = words.first() else {
        return Ok(None);
    };

    let command = match *head {
        "devices" => ReplCommand::Devices,
        "virtuals" => ReplCommand::Virtuals,
        "segments" => ReplCommand::Segments(arg(&words, 1, "segments <vid>")?.to_string()),
        "compose" => {
            let name = arg(&words, 1, "compose <name> <seg>...")?.to_string();
            let segments: Vec<String> = words[2..].iter().map(|s| s.to_string()).collect();
            if segments.is_empty() {
                anyhow::bail!("Usage: compose <name> <device:start-end|gap:n>...");
            }
            ReplCommand::Compose { name, segments }
        }
        "recompose" => {
            let virtual_id = arg(&words, 1, "recompose <vid> <seg>...")?.to_string();
            let segments: Vec<String> = words[2..].iter().map(|s| s.to_string()).collect();
            if segments.is_empty() {
                anyhow::bail!("Usage: recompose <vid> <device:start-end|gap:n>...");
            }
            ReplCommand::Recompose { virtual_id, segments }
        }
        "remove" => ReplCommand::Remove(arg(&words, 1, "remove <vid>")?.to_string()),
        "device" => {
            let usage = "device add <address> <pixels> <name> | device remove <address>";
            let address = arg(&words, 2, usage)?.to_string();
            match arg(&words, 1, usage)? {
                "add" => {
                    let raw = arg(&words, 3, usage)?;
                    let pixels: u32 = raw.parse().with_context(|| format!("Not a pixel count: {}", raw))?;
                    let name = words.get(4..).map(|rest| rest.join(" ")).unwrap_or_default();
                    if name.is_empty() {
                        anyhow::bail!("Usage: {}", usage);
                    }
                    ReplCommand::DeviceAdd { address, pixels, name }
                }
                "remove" => ReplCommand::DeviceRemove(address),
                _ => anyhow::bail!("Usage: {}", usage),
            }
        }
        "select" => ReplCommand::Select {
            virtual_id: arg(&words, 1, "select <vid> <effect>")?.to_string(),
            effect_id: arg(&words, 2, "select <vid> <effect>")?.to_string(),
        },
        "set" => ReplCommand::Set {
            virtual_id: arg(&words, 1, "set <vid> <key> <json>")?.to_string(),
            key: arg(&words, 2, "set <vid> <key> <json>")?.to_string(),
            value: json_arg(&words, 3, "set <vid> <key> <json>")?,
        },
        "start" => ReplCommand::Start(arg(&words, 1, "start <vid>")?.to_string()),
        "stop" => ReplCommand::Stop(arg(&words, 1, "stop <vid>")?.to_string()),
        "toggle" => ReplCommand::Toggle(arg(&words, 1, "toggle <vid>")?.to_string()),
        "presets" => ReplCommand::Presets(arg(&words, 1, "presets <vid>")?.to_string()),
        "preset" => {
            let usage = "preset load|save <vid> <name> | preset delete <vid>";
            let action = arg(&words, 1, usage)?;
            let virtual_id = arg(&words, 2, usage)?.to_string();
            let name = words.get(3..).map(|rest| rest.join(" ")).unwrap_or_default();
            match action {
                "load" if !name.is_empty() => ReplCommand::PresetLoad { virtual_id, name },
                "save" if !name.is_empty() => ReplCommand::PresetSave { virtual_id, name },
                "delete" => ReplCommand::PresetDelete(virtual_id),
                _ => anyhow::bail!("Usage: {}", usage),
            }
        }
        "dsp" => match arg(&words, 1, "dsp <key> <json> | dsp apply|discard|status")? {
            "apply" => ReplCommand::DspApply,
            "discard" => ReplCommand::DspDiscard,
            "status" => ReplCommand::DspStatus,
            key => ReplCommand::DspSet {
                key: key.to_string(),
                value: json_arg(&words, 2, "dsp <key> <json>")?,
            },
        },
        "fps" => {
            let raw = arg(&words, 1, "fps <n>")?;
            ReplCommand::Fps(raw.parse().with_context(|| format!("Not a frame rate: {}", raw))?)
        }
        "pause" => ReplCommand::Pause,
        "scenes" => ReplCommand::Scenes,
        "scene" => {
            let usage = "scene save <name> | scene activate|delete|show <id>";
            let action = arg(&words, 1, usage)?;
            let rest = words.get(2..).map(|rest| rest.join(" ")).unwrap_or_default();
            if rest.is_empty() {
                anyhow::bail!("Usage: {}", usage);
            }
            match action {
                "save" => ReplCommand::SceneSave(rest),
                "activate" => ReplCommand::SceneActivate(rest),
                "delete" => ReplCommand::SceneDelete(rest),
                "show" => ReplCommand::SceneShow(rest),
                _ => anyhow::bail!("Usage: {}", usage),
            }
        }
        "export" => ReplCommand::Export(arg(&words, 1, "export <path>")?.to_string()),
        "import" => ReplCommand::Import(arg(&words, 1, "import <path>")?.to_string()),
        "clear" => ReplCommand::Clear,
        "preview" => ReplCommand::Preview(arg(&words, 1, "preview <entity>")?.to_string()),
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => anyhow::bail!("Unknown command '{}' (try 'help')", other),
    };
    Ok(Some(command))
}

/// Parse `device:start-end` or `gap:n`
pub fn parse_segment(text: &str) -> Result<Segment> {
    let (left, right) = text
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Segment must look like device:start-end or gap:n, got '{}'", text))?;
    if left == "gap" {
        let length: u32 = right.parse().with_context(|| format!("Bad gap length: {}", right))?;
        return Ok(Segment::gap(length)?);
    }
    let (start, end) = right
        .split_once('-')
        .ok_or_else(|| anyhow!("Range must look like start-end, got '{}'", right))?;
    let start: u32 = start.parse().with_context(|| format!("Bad start pixel: {}", start))?;
    let end: u32 = end.parse().with_context(|| format!("Bad end pixel: {}", end))?;
    Ok(Segment::range(left, start, end)?)
}

fn help_rows() -> &'static [(&'static str, &'static str)] {
    &[
        ("devices | virtuals", "List physical devices or virtuals"),
        ("segments <vid>", "Show a virtual as segments"),
        ("compose <name> <seg>...", "Create a virtual (seg = device:start-end or gap:n)"),
        ("recompose <vid> <seg>...", "Replace a virtual's layout"),
        ("remove <vid>", "Remove a virtual"),
        ("device add <addr> <px> <name>", "Add a physical device"),
        ("device remove <addr>", "Remove a physical device"),
        ("select <vid> <effect>", "Select an effect"),
        ("set <vid> <key> <json>", "Change one effect setting"),
        ("start|stop|toggle <vid>", "Start or stop the selected effect"),
        ("presets <vid>", "List presets and the current match"),
        ("preset load|save <vid> <name>", "Load or save a preset"),
        ("preset delete <vid>", "Delete the matching user preset"),
        ("dsp <key> <json>", "Edit a DSP setting"),
        ("dsp apply|discard|status", "Commit, drop or show pending DSP edits"),
        ("fps <n> | pause", "Target frame rate, toggle pause"),
        ("scenes | scene save <name>", "List scenes, save running effects"),
        ("scene activate|delete <id>", "Activate or delete a scene"),
        ("scene show <id>", "Show what a scene would run"),
        ("export <path> | import <path>", "Settings documents"),
        ("clear", "Remove all devices and reset DSP settings"),
        ("preview <entity>", "Render one frame of a virtual or device"),
        ("quit", "Exit"),
    ]
}

fn print_help() {
    println!("\n{}", "Commands:".bold());
    for (usage, text) in help_rows() {
        println!("  {:<32} {}", usage.cyan(), text.dimmed());
    }
    println!();
}

/// Interactive loop against the console engine
pub async fn run_repl(core: Arc<Controller>, engine: Arc<ConsoleEngine>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", "=== LedFx Control ===".bold().cyan());
    println!("Type 'help' for commands\n");

    loop {
        if let Some(message) = core.store().read(|s| s.error.clone()) {
            println!("{} {}", "error:".red().bold(), message);
            core.dismiss_error();
        }

        let line = match rl.readline("ledfx> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let _ = rl.add_history_entry(line.as_str());

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e.to_string().yellow());
                continue;
            }
        };
        if command == ReplCommand::Quit {
            break;
        }
        if let Err(e) = execute(&core, &engine, command).await {
            println!("{} {}", "failed:".red(), e);
        }
    }

    Ok(())
}

async fn execute(core: &Controller, engine: &ConsoleEngine, command: ReplCommand) -> Result<()> {
    match command {
        ReplCommand::Devices => {
            for device in core.store().read(|s| s.devices.clone()) {
                println!("  {} {} ({} pixels)", device.id.green(), device.name, device.pixel_count);
            }
        }
        ReplCommand::Virtuals => {
            let state = core.store().get_state();
            for v in &state.virtuals {
                let effect = state.selected_effect(&v.id).unwrap_or("-");
                let running = if state.is_active(&v.id) { "running".green() } else { "idle".dimmed() };
                println!("  {} {} [{} px] {} {}", v.id.green(), v.name, v.pixel_count(), effect, running);
            }
        }
        ReplCommand::Segments(virtual_id) => {
            let segments = core.edit_segments(&virtual_id)?;
            for segment in segments.segments() {
                let device = segment.device_id().unwrap_or("gap");
                println!("  {} {}", device.yellow(), segment.describe());
            }
            println!("  {} cells", segments.total_len());
        }
        ReplCommand::Compose { name, segments } => {
            let mut list: SegmentList = core.new_segments();
            for text in &segments {
                list.add(parse_segment(text)?)?;
            }
            let created = core.add_virtual(&name, &list).await?;
            println!("  created {}", created.id.green());
        }
        ReplCommand::Recompose { virtual_id, segments } => {
            let name = core
                .store()
                .read(|s| s.virtual_by_id(&virtual_id).map(|v| v.name.clone()))
                .ok_or_else(|| anyhow!("Unknown virtual {}", virtual_id))?;
            let mut list: SegmentList = core.new_segments();
            for text in &segments {
                list.add(parse_segment(text)?)?;
            }
            let updated = core.update_virtual(&virtual_id, &name, &list).await?;
            println!("  {} now {} px", updated.id.green(), updated.pixel_count());
        }
        ReplCommand::Remove(virtual_id) => core.remove_virtual(&virtual_id).await?,
        ReplCommand::DeviceAdd { address, pixels, name } => {
            core.add_device(PhysicalDevice {
                id: address,
                name,
                pixel_count: pixels,
            })
            .await?
        }
        ReplCommand::DeviceRemove(address) => core.remove_device(&address).await?,
        ReplCommand::Select { virtual_id, effect_id } => {
            core.effects().select_effect(&virtual_id, &effect_id).await?
        }
        ReplCommand::Set { virtual_id, key, value } => {
            core.effects().update_setting(&virtual_id, &key, value).await?
        }
        ReplCommand::Start(virtual_id) => core.effects().start_effect(&virtual_id).await?,
        ReplCommand::Stop(virtual_id) => core.effects().stop_effect(&virtual_id).await?,
        ReplCommand::Toggle(virtual_id) => core.effects().toggle_effect(&virtual_id).await?,
        ReplCommand::Presets(virtual_id) => {
            let effect_id = core
                .store()
                .read(|s| s.selected_effect(&virtual_id).map(str::to_string))
                .ok_or_else(|| anyhow!("No effect selected for {}", virtual_id))?;
            let presets = core.effects().load_presets(&effect_id, false).await?;
            for name in presets.user.keys() {
                println!("  {} {}", "user".cyan(), name);
            }
            for name in presets.built_in.keys() {
                println!("  {} {}", "built-in".dimmed(), name);
            }
            let status = core.effects().preset_status(&virtual_id)?;
            match status.matched_name() {
                Some(name) => println!("  matches {}", name.green()),
                None => println!("  {}", "modified".yellow()),
            }
        }
        ReplCommand::PresetLoad { virtual_id, name } => core.effects().load_preset(&virtual_id, &name).await?,
        ReplCommand::PresetSave { virtual_id, name } => core.effects().save_preset(&virtual_id, &name).await?,
        ReplCommand::PresetDelete(virtual_id) => {
            let name = core.effects().delete_preset(&virtual_id).await?;
            println!("  deleted {}", name);
        }
        ReplCommand::DspSet { key, value } => core.dsp().set_field(&key, value).await?,
        ReplCommand::DspApply => core.dsp().apply().await?,
        ReplCommand::DspDiscard => core.dsp().discard().await,
        ReplCommand::DspStatus => {
            let pending = core.dsp().pending().ok_or_else(|| anyhow!("DSP settings not loaded"))?;
            println!("{}", serde_json::to_string_pretty(&pending)?);
            let dirty = core.dsp().dirty_fields();
            if dirty.is_empty() {
                println!("  {}", "no pending changes".dimmed());
            } else {
                println!("  pending apply: {}", dirty.join(", ").yellow());
            }
        }
        ReplCommand::Fps(fps) => core.set_target_fps(fps)?,
        ReplCommand::Pause => core.toggle_pause().await?,
        ReplCommand::Scenes => {
            let state = core.store().get_state();
            for scene in &state.scenes {
                let marker = if state.active_scene_id.as_deref() == Some(scene.id.as_str()) {
                    "*".green()
                } else {
                    " ".normal()
                };
                println!("  {} {} {} ({} virtuals)", marker, scene.id, scene.name, scene.virtual_effects.len());
            }
        }
        ReplCommand::SceneSave(name) => {
            let draft = core.scenes().draft().await;
            let scene = core.scenes().save(&draft, &name).await?;
            println!("  saved {}", scene.id.green());
        }
        ReplCommand::SceneActivate(scene_id) => core.scenes().activate(&scene_id).await?,
        ReplCommand::SceneDelete(scene_id) => core.scenes().delete(&scene_id).await?,
        ReplCommand::SceneShow(scene_id) => {
            for (virtual_id, config) in core.scenes().preview(&scene_id)? {
                println!("  {} {} {}", virtual_id.green(), config.effect_id, serde_json::to_string(&config.config)?);
            }
        }
        ReplCommand::Export(path) => {
            let document = core.settings_io().export(true, true).await?;
            tokio::fs::write(&path, document)
                .await
                .with_context(|| format!("Failed to write {}", path))?;
            println!("  exported to {}", path);
        }
        ReplCommand::Import(path) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path))?;
            let kind = core.settings_io().import(&text).await?;
            println!("  imported {}", kind);
        }
        ReplCommand::Clear => {
            core.settings_io().clear_all().await?;
            println!("  all settings cleared");
        }
        ReplCommand::Preview(entity_id) => {
            let subscription = core.frames().subscribe(&entity_id).await;
            engine.tick();
            tokio::time::sleep(Duration::from_millis(20)).await;
            let colors = subscription.latest().map(|b| color_patches(&b)).unwrap_or_default();
            if colors.is_empty() {
                println!("  {}", "(blank)".dimmed());
            } else {
                let strip: String = colors
                    .iter()
                    .map(|c| "█".truecolor(c.r, c.g, c.b).to_string())
                    .collect();
                println!("  {}", strip);
            }
            subscription.release().await;
        }
        ReplCommand::Help => print_help(),
        ReplCommand::Quit => {}
    }
    Ok(())
}
