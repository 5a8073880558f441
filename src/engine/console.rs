//! Console engine - logs every command and keeps an in-memory model
//!
//! Useful for:
//! - Running the control core without a rendering engine
//! - Tests that need to observe which commands were issued
//! - Injecting command failures

use super::catalog;
use super::events::{EngineEvent, FrameMap};
use super::{CommandResult, EngineCommands};
use crate::types::{
    AudioDevice, AudioDevices, DspSettings, EffectConfig, EffectInfo, EffectSchema, PhysicalDevice,
    PlaybackState, PresetCollection, Scene, SceneEffect, VirtualDevice,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One command as received by the console engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub command: &'static str,
    pub detail: String,
}

/// Document produced by `export_settings` and accepted by `import_settings`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExportedState {
    devices: Vec<PhysicalDevice>,
    virtuals: Vec<VirtualDevice>,
    #[serde(default)]
    scenes: Vec<Scene>,
    #[serde(default)]
    dsp_settings: Option<DspSettings>,
}

struct Model {
    devices: BTreeMap<String, PhysicalDevice>,
    virtuals: BTreeMap<String, VirtualDevice>,
    scenes: BTreeMap<String, Scene>,
    user_presets: HashMap<String, BTreeMap<String, EffectConfig>>,
    running: BTreeMap<String, EffectConfig>,
    frame_feeds: BTreeSet<String>,
    dsp: DspSettings,
    paused: bool,
    target_fps: u32,
    audio_device: Option<String>,
    frame_counter: u64,
    /// Events produced while the model was locked, emitted afterwards
    outbox: Vec<EngineEvent>,
}

impl Model {
    fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
            virtuals: BTreeMap::new(),
            scenes: BTreeMap::new(),
            user_presets: HashMap::new(),
            running: BTreeMap::new(),
            frame_feeds: BTreeSet::new(),
            dsp: DspSettings::default(),
            paused: false,
            target_fps: 60,
            audio_device: None,
            frame_counter: 0,
            outbox: Vec::new(),
        }
    }

    fn insert_device(&mut self, device: PhysicalDevice) {
        let mirror = VirtualDevice::for_device(&device);
        self.virtuals.entry(mirror.id.clone()).or_insert(mirror);
        self.devices.insert(device.id.clone(), device);
    }

    fn announce_devices(&mut self) {
        self.outbox
            .push(EngineEvent::DevicesChanged(self.devices.values().cloned().collect()));
    }

    fn announce_virtuals(&mut self) {
        self.outbox
            .push(EngineEvent::VirtualsChanged(self.virtuals.values().cloned().collect()));
    }

    fn announce_scenes(&mut self) {
        self.outbox
            .push(EngineEvent::ScenesChanged(self.scenes.values().cloned().collect()));
    }

    fn find_preset(&self, effect_id: &str, name: &str) -> Option<EffectConfig> {
        self.user_presets
            .get(effect_id)
            .and_then(|presets| presets.get(name))
            .cloned()
            .or_else(|| catalog::built_in_presets(effect_id).remove(name))
    }
}

/// In-process engine that logs commands instead of driving hardware
pub struct ConsoleEngine {
    name: String,
    model: Mutex<Model>,
    calls: Mutex<Vec<CallRecord>>,
    failures: Mutex<HashMap<String, String>>,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ConsoleEngine {
    /// Create an engine and the receiving end of its event surface
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let engine = Self {
            name: name.into(),
            model: Mutex::new(Model::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            event_tx,
        };
        (engine, event_rx)
    }

    /// Register a device without going through the command surface
    pub fn seed_device(&self, device: PhysicalDevice) {
        self.model.lock().insert_device(device);
    }

    /// Seed two demo strips
    pub fn seed_demo(&self) {
        self.seed_device(PhysicalDevice {
            id: "192.168.1.20".to_string(),
            name: "Desk Strip".to_string(),
            pixel_count: 30,
        });
        self.seed_device(PhysicalDevice {
            id: "192.168.1.21".to_string(),
            name: "Shelf".to_string(),
            pixel_count: 60,
        });
    }

    /// Make every subsequent `command` fail with `message`
    pub fn fail_command(&self, command: &str, message: impl Into<String>) {
        self.failures.lock().insert(command.to_string(), message.into());
    }

    pub fn clear_failure(&self, command: &str) {
        self.failures.lock().remove(command);
    }

    /// Push an event as if the engine emitted it
    pub fn emit(&self, event: EngineEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("ConsoleEngine '{}' has no event listener", self.name);
        }
    }

    /// Every command received so far, oldest first
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, command: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.command == command).count()
    }

    pub fn last_call(&self, command: &str) -> Option<CallRecord> {
        self.calls.lock().iter().rev().find(|c| c.command == command).cloned()
    }

    pub fn running_effect(&self, virtual_id: &str) -> Option<EffectConfig> {
        self.model.lock().running.get(virtual_id).cloned()
    }

    pub fn frame_feeds(&self) -> Vec<String> {
        self.model.lock().frame_feeds.iter().cloned().collect()
    }

    /// Render one tick for running virtuals and subscribed device feeds
    ///
    /// Paused engines emit nothing.
    pub fn tick(&self) {
        let frames = {
            let mut model = self.model.lock();
            if model.paused {
                return;
            }
            model.frame_counter += 1;
            let phase = model.frame_counter;
            let mut frames = FrameMap::new();

            for (virtual_id, config) in &model.running {
                let len = model
                    .virtuals
                    .get(virtual_id)
                    .map(|v| v.primary_row().len())
                    .unwrap_or(0);
                frames.insert(virtual_id.clone(), render(&config.effect_id, len, phase));
            }
            for address in &model.frame_feeds {
                if let Some(device) = model.devices.get(address) {
                    frames.insert(address.clone(), render(address, device.pixel_count as usize, phase));
                }
            }
            frames
        };
        self.emit(EngineEvent::EngineTick(frames));
    }

    /// Log, check injected failures, then run `op` against the model
    fn run<T>(
        &self,
        command: &'static str,
        detail: String,
        op: impl FnOnce(&mut Model) -> Result<T, String>,
    ) -> CommandResult<T> {
        let call_number = {
            let mut calls = self.calls.lock();
            calls.push(CallRecord {
                command,
                detail: detail.clone(),
            });
            calls.len()
        };
        info!(
            "[{}] Engine '{}' <- {} ({}) [call #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            self.name,
            command,
            detail,
            call_number
        );

        if let Some(message) = self.failures.lock().get(command).cloned() {
            warn!("Engine '{}' rejecting {}: {}", self.name, command, message);
            return CommandResult::error(message);
        }

        let (result, events) = {
            let mut model = self.model.lock();
            let result = op(&mut model);
            (result, std::mem::take(&mut model.outbox))
        };
        for event in events {
            debug!(event = event.name(), "ConsoleEngine emitting");
            self.emit(event);
        }
        result.into()
    }
}

/// Deterministic moving color ramp
fn render(seed: &str, len: usize, phase: u64) -> Vec<u8> {
    let base = seed.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
    let mut out = Vec::with_capacity(len * 3);
    for i in 0..len {
        let step = base.wrapping_add((phase as u8).wrapping_add(i as u8).wrapping_mul(8));
        out.extend_from_slice(&[step, 255u8.wrapping_sub(step), base]);
    }
    out
}

fn snapshot_for(scene_id: &str, resolved: &BTreeMap<String, EffectConfig>) -> Value {
    let mut selected = Map::new();
    let mut settings = Map::new();
    let mut active = Map::new();
    for (virtual_id, config) in resolved {
        selected.insert(virtual_id.clone(), json!(config.effect_id));
        let mut per_effect = Map::new();
        per_effect.insert(config.effect_id.clone(), json!(config));
        settings.insert(virtual_id.clone(), Value::Object(per_effect));
        active.insert(virtual_id.clone(), json!(true));
    }
    json!({
        "active_scene_id": scene_id,
        "selected_effects": selected,
        "effect_settings": settings,
        "active_effects": active,
    })
}

#[async_trait]
impl EngineCommands for ConsoleEngine {
    async fn get_devices(&self) -> CommandResult<Vec<PhysicalDevice>> {
        self.run("get_devices", String::new(), |m| Ok(m.devices.values().cloned().collect()))
    }

    async fn get_virtuals(&self) -> CommandResult<Vec<VirtualDevice>> {
        self.run("get_virtuals", String::new(), |m| Ok(m.virtuals.values().cloned().collect()))
    }

    async fn get_scenes(&self) -> CommandResult<Vec<Scene>> {
        self.run("get_scenes", String::new(), |m| Ok(m.scenes.values().cloned().collect()))
    }

    async fn get_dsp_settings(&self) -> CommandResult<DspSettings> {
        self.run("get_dsp_settings", String::new(), |m| Ok(m.dsp.clone()))
    }

    async fn get_available_effects(&self) -> CommandResult<Vec<EffectInfo>> {
        self.run("get_available_effects", String::new(), |_| Ok(catalog::available_effects()))
    }

    async fn get_effect_schema(&self, effect_id: &str) -> CommandResult<EffectSchema> {
        self.run("get_effect_schema", effect_id.to_string(), |_| {
            catalog::schema(effect_id).ok_or_else(|| format!("Schema not found for effect: {}", effect_id))
        })
    }

    async fn load_presets(&self, effect_id: &str) -> CommandResult<PresetCollection> {
        self.run("load_presets", effect_id.to_string(), |m| {
            Ok(PresetCollection {
                user: m.user_presets.get(effect_id).cloned().unwrap_or_default(),
                built_in: catalog::built_in_presets(effect_id),
            })
        })
    }

    async fn get_audio_devices(&self) -> CommandResult<AudioDevices> {
        self.run("get_audio_devices", String::new(), |_| {
            Ok(AudioDevices {
                devices: vec![
                    AudioDevice {
                        name: "Default Input".to_string(),
                    },
                    AudioDevice {
                        name: "Loopback (Speakers)".to_string(),
                    },
                ],
                default_device_name: Some("Default Input".to_string()),
            })
        })
    }

    async fn get_playback_state(&self) -> CommandResult<PlaybackState> {
        self.run("get_playback_state", String::new(), |m| Ok(PlaybackState { is_paused: m.paused }))
    }

    async fn add_virtual(&self, config: VirtualDevice) -> CommandResult<()> {
        self.run("add_virtual", config.id.clone(), |m| {
            if m.virtuals.contains_key(&config.id) {
                return Err(format!("Virtual already exists: {}", config.id));
            }
            m.virtuals.insert(config.id.clone(), config);
            m.announce_virtuals();
            Ok(())
        })
    }

    async fn update_virtual(&self, config: VirtualDevice) -> CommandResult<()> {
        self.run("update_virtual", config.id.clone(), |m| {
            let Some(existing) = m.virtuals.get_mut(&config.id) else {
                return Err(format!("Virtual not found: {}", config.id));
            };
            *existing = config;
            m.announce_virtuals();
            Ok(())
        })
    }

    async fn remove_virtual(&self, virtual_id: &str) -> CommandResult<()> {
        self.run("remove_virtual", virtual_id.to_string(), |m| {
            if m.virtuals.remove(virtual_id).is_none() {
                return Err(format!("Virtual not found: {}", virtual_id));
            }
            m.running.remove(virtual_id);
            m.announce_virtuals();
            Ok(())
        })
    }

    async fn add_device(&self, config: PhysicalDevice) -> CommandResult<()> {
        self.run("add_device", config.id.clone(), |m| {
            m.outbox.push(EngineEvent::DeviceFound(config.clone()));
            m.insert_device(config);
            m.announce_devices();
            m.announce_virtuals();
            Ok(())
        })
    }

    async fn remove_device(&self, device_id: &str) -> CommandResult<()> {
        self.run("remove_device", device_id.to_string(), |m| {
            if m.devices.remove(device_id).is_none() {
                return Err(format!("Device not found: {}", device_id));
            }
            let mirror = crate::types::device_virtual_id(device_id);
            m.virtuals.remove(&mirror);
            m.running.remove(&mirror);
            m.frame_feeds.remove(device_id);
            m.announce_devices();
            m.announce_virtuals();
            Ok(())
        })
    }

    async fn start_effect(&self, virtual_id: &str, config: EffectConfig) -> CommandResult<()> {
        self.run("start_effect", format!("{} {}", virtual_id, config.effect_id), |m| {
            if !m.virtuals.contains_key(virtual_id) {
                return Err(format!("Virtual not found: {}", virtual_id));
            }
            if !catalog::is_known(&config.effect_id) {
                return Err(format!("Unknown effect: {}", config.effect_id));
            }
            m.running.insert(virtual_id.to_string(), config);
            Ok(())
        })
    }

    async fn stop_effect(&self, virtual_id: &str) -> CommandResult<()> {
        self.run("stop_effect", virtual_id.to_string(), |m| {
            m.running.remove(virtual_id);
            Ok(())
        })
    }

    async fn update_effect_settings(&self, virtual_id: &str, config: EffectConfig) -> CommandResult<()> {
        self.run("update_effect_settings", format!("{} {}", virtual_id, config.effect_id), |m| {
            if let Some(running) = m.running.get_mut(virtual_id) {
                *running = config;
            }
            Ok(())
        })
    }

    async fn subscribe_to_frames(&self, device_id: &str) -> CommandResult<()> {
        self.run("subscribe_to_frames", device_id.to_string(), |m| {
            m.frame_feeds.insert(device_id.to_string());
            Ok(())
        })
    }

    async fn unsubscribe_from_frames(&self, device_id: &str) -> CommandResult<()> {
        self.run("unsubscribe_from_frames", device_id.to_string(), |m| {
            m.frame_feeds.remove(device_id);
            Ok(())
        })
    }

    async fn save_preset(&self, effect_id: &str, preset_name: &str, settings: EffectConfig) -> CommandResult<()> {
        self.run("save_preset", format!("{} '{}'", effect_id, preset_name), |m| {
            m.user_presets
                .entry(effect_id.to_string())
                .or_default()
                .insert(preset_name.to_string(), settings);
            Ok(())
        })
    }

    async fn delete_preset(&self, effect_id: &str, preset_name: &str) -> CommandResult<()> {
        self.run("delete_preset", format!("{} '{}'", effect_id, preset_name), |m| {
            m.user_presets
                .get_mut(effect_id)
                .and_then(|presets| presets.remove(preset_name))
                .map(|_| ())
                .ok_or_else(|| format!("Preset not found: {}", preset_name))
        })
    }

    async fn save_scene(&self, scene: Scene) -> CommandResult<()> {
        self.run("save_scene", format!("{} '{}'", scene.id, scene.name), |m| {
            m.scenes.insert(scene.id.clone(), scene);
            m.announce_scenes();
            Ok(())
        })
    }

    async fn activate_scene(&self, scene_id: &str) -> CommandResult<()> {
        self.run("activate_scene", scene_id.to_string(), |m| {
            let scene = m
                .scenes
                .get(scene_id)
                .cloned()
                .ok_or_else(|| format!("Scene not found: {}", scene_id))?;

            let mut resolved = BTreeMap::new();
            for (virtual_id, entry) in &scene.virtual_effects {
                if !m.virtuals.contains_key(virtual_id) {
                    continue;
                }
                let config = match entry {
                    SceneEffect::Custom(config) => Some(config.clone()),
                    SceneEffect::Preset(reference) => m.find_preset(&reference.effect_id, &reference.preset_name),
                };
                if let Some(config) = config {
                    resolved.insert(virtual_id.clone(), config);
                }
            }

            m.running = resolved.clone();
            m.outbox.push(EngineEvent::SceneActivated(snapshot_for(scene_id, &resolved)));
            Ok(())
        })
    }

    async fn delete_scene(&self, scene_id: &str) -> CommandResult<()> {
        self.run("delete_scene", scene_id.to_string(), |m| {
            if m.scenes.remove(scene_id).is_some() {
                m.announce_scenes();
            }
            Ok(())
        })
    }

    async fn update_dsp_settings(&self, settings: DspSettings) -> CommandResult<()> {
        self.run("update_dsp_settings", String::new(), |m| {
            m.dsp = settings;
            m.outbox.push(EngineEvent::DspSettingsChanged(m.dsp.clone()));
            Ok(())
        })
    }

    async fn restart_audio_capture(&self) -> CommandResult<()> {
        self.run("restart_audio_capture", String::new(), |_| Ok(()))
    }

    async fn set_target_fps(&self, fps: u32) -> CommandResult<()> {
        self.run("set_target_fps", fps.to_string(), |m| {
            m.target_fps = fps;
            Ok(())
        })
    }

    async fn set_audio_device(&self, device_name: &str) -> CommandResult<()> {
        self.run("set_audio_device", device_name.to_string(), |m| {
            m.audio_device = Some(device_name.to_string());
            Ok(())
        })
    }

    async fn toggle_pause(&self) -> CommandResult<()> {
        self.run("toggle_pause", String::new(), |m| {
            m.paused = !m.paused;
            m.outbox
                .push(EngineEvent::PlaybackStateChanged(PlaybackState { is_paused: m.paused }));
            Ok(())
        })
    }

    async fn export_settings(&self) -> CommandResult<String> {
        self.run("export_settings", String::new(), |m| {
            let exported = ExportedState {
                devices: m.devices.values().cloned().collect(),
                virtuals: m.virtuals.values().cloned().collect(),
                scenes: m.scenes.values().cloned().collect(),
                dsp_settings: Some(m.dsp.clone()),
            };
            serde_json::to_string_pretty(&exported).map_err(|e| e.to_string())
        })
    }

    async fn import_settings(&self, data: String) -> CommandResult<()> {
        self.run("import_settings", format!("{} bytes", data.len()), |m| {
            let imported: ExportedState = serde_json::from_str(&data).map_err(|e| e.to_string())?;
            m.devices.clear();
            m.virtuals.clear();
            m.running.clear();
            for device in imported.devices {
                m.insert_device(device);
            }
            for v in imported.virtuals {
                m.virtuals.insert(v.id.clone(), v);
            }
            m.scenes = imported.scenes.into_iter().map(|s| (s.id.clone(), s)).collect();
            if let Some(dsp) = imported.dsp_settings {
                m.dsp = dsp;
            }
            Ok(())
        })
    }

    async fn trigger_reload(&self) -> CommandResult<()> {
        self.run("trigger_reload", String::new(), |m| {
            m.announce_devices();
            m.announce_virtuals();
            m.announce_scenes();
            m.outbox.push(EngineEvent::DspSettingsChanged(m.dsp.clone()));
            Ok(())
        })
    }
}
