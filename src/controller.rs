//! Control core wiring
//!
//! Builds every subsystem around one engine and one store, runs the startup
//! fetch, and exposes the engine-wide actions (audio device, frame rate,
//! pause, virtual topology) that do not belong to a single subsystem.

use crate::bridge::{BridgeHandle, EventBridge};
use crate::codec::SegmentList;
use crate::debounce::Debouncer;
use crate::effects::{DspEditor, EffectReconciler};
use crate::engine::{EngineCommands, EngineEvent};
use crate::error::{ControlError, Result, ValidationError};
use crate::frames::FrameRouter;
use crate::prefs::PrefsHandle;
use crate::scenes::SceneManager;
use crate::settings_io::SettingsIo;
use crate::store::{AppState, StateStore};
use crate::types::{PhysicalDevice, VirtualDevice};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const FPS_KEY: &str = "fps";

/// Timing and behavior knobs for the core
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// Effect setting push delay; zero pushes immediately
    pub settings_debounce: Duration,
    pub dsp_debounce: Duration,
    pub fps_debounce: Duration,
    pub target_fps: u32,
    /// Wake renderers even when a tick repeats the previous buffer
    pub notify_unchanged: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            settings_debounce: Duration::from_millis(300),
            dsp_debounce: Duration::from_millis(300),
            fps_debounce: Duration::from_millis(500),
            target_fps: crate::store::DEFAULT_TARGET_FPS,
            notify_unchanged: false,
        }
    }
}

pub struct Controller {
    engine: Arc<dyn EngineCommands>,
    store: StateStore<AppState>,
    frames: FrameRouter,
    effects: Arc<EffectReconciler>,
    dsp: Arc<DspEditor>,
    scenes: Arc<SceneManager>,
    settings_io: SettingsIo,
    prefs: Option<PrefsHandle>,
    fps: Debouncer,
}

impl Controller {
    pub fn new(engine: Arc<dyn EngineCommands>, options: CoreOptions, prefs: Option<PrefsHandle>) -> Self {
        let store = StateStore::new(AppState {
            target_fps: options.target_fps,
            ..AppState::default()
        });
        let frames = FrameRouter::new(Arc::clone(&engine), store.clone(), options.notify_unchanged);
        let effects = Arc::new(EffectReconciler::new(
            Arc::clone(&engine),
            store.clone(),
            options.settings_debounce,
        ));
        let dsp = Arc::new(DspEditor::new(
            Arc::clone(&engine),
            store.clone(),
            options.dsp_debounce,
            prefs.clone(),
        ));
        let scenes = Arc::new(SceneManager::new(Arc::clone(&engine), store.clone(), Arc::clone(&effects)));
        let settings_io = SettingsIo::new(Arc::clone(&engine), store.clone());

        Self {
            engine,
            store,
            frames,
            effects,
            dsp,
            scenes,
            settings_io,
            prefs,
            fps: Debouncer::new(options.fps_debounce),
        }
    }

    /// Start consuming engine events
    pub fn start(&self, events: mpsc::UnboundedReceiver<EngineEvent>) -> BridgeHandle {
        let bridge = EventBridge::new(
            self.store.clone(),
            self.frames.clone(),
            Arc::clone(&self.scenes),
            Arc::clone(&self.dsp),
        );
        Arc::new(bridge).start(events)
    }

    pub fn store(&self) -> &StateStore<AppState> {
        &self.store
    }

    pub fn frames(&self) -> &FrameRouter {
        &self.frames
    }

    pub fn effects(&self) -> &EffectReconciler {
        &self.effects
    }

    pub fn dsp(&self) -> &DspEditor {
        &self.dsp
    }

    pub fn scenes(&self) -> &SceneManager {
        &self.scenes
    }

    pub fn settings_io(&self) -> &SettingsIo {
        &self.settings_io
    }

    fn report(&self, err: ControlError) -> ControlError {
        warn!("{}", err);
        let banner = err.banner();
        self.store.set_state(|s| s.set_error(banner));
        err
    }

    pub fn dismiss_error(&self) {
        self.store.set_state(|s| s.clear_error());
    }

    /// Fetch the initial state concurrently
    ///
    /// Each fetch that fails is logged and skipped; the rest still land.
    pub async fn bootstrap(&self) {
        info!("Fetching initial state from engine");
        let engine = &self.engine;
        let (effects, virtuals, devices, scenes, dsp, audio) = tokio::join!(
            engine.get_available_effects(),
            engine.get_virtuals(),
            engine.get_devices(),
            engine.get_scenes(),
            engine.get_dsp_settings(),
            self.init_audio_device(),
        );

        match effects.into_result("get_available_effects") {
            Ok(effects) => self.store.set_state(|s| s.available_effects = effects),
            Err(e) => warn!("Failed to fetch initial state: {}", e),
        }
        match virtuals.into_result("get_virtuals") {
            Ok(virtuals) => self.store.set_state(|s| s.apply_virtuals(virtuals)),
            Err(e) => warn!("Failed to fetch initial state: {}", e),
        }
        match devices.into_result("get_devices") {
            Ok(devices) => self.store.set_state(|s| s.apply_devices(devices)),
            Err(e) => warn!("Failed to fetch initial state: {}", e),
        }
        match scenes.into_result("get_scenes") {
            Ok(scenes) => self.store.set_state(|s| s.scenes = scenes),
            Err(e) => warn!("Failed to fetch initial state: {}", e),
        }
        match dsp.into_result("get_dsp_settings") {
            Ok(settings) => {
                self.dsp.on_settings_changed(settings).await;
                let draft = self.prefs.as_ref().and_then(|p| p.get().dsp_draft);
                if let Some(draft) = draft {
                    self.dsp.restore_draft(draft).await;
                }
            }
            Err(e) => warn!("Failed to fetch initial state: {}", e),
        }
        if let Err(e) = audio {
            warn!("Failed to get audio devices: {}", e);
        }
        self.frames.resolve_unattached().await;

        let state = self.store.get_state();
        info!(
            "Initial state: {} devices, {} virtuals, {} scenes, {} effects",
            state.devices.len(),
            state.virtuals.len(),
            state.scenes.len(),
            state.available_effects.len()
        );
    }

    /// Pick the stored device, else the engine default, else the first
    async fn init_audio_device(&self) -> Result<()> {
        let audio = self
            .engine
            .get_audio_devices()
            .await
            .into_result("get_audio_devices")?;
        let stored = self.prefs.as_ref().and_then(|p| p.get().selected_audio_device);
        let choice = stored
            .or_else(|| audio.default_device_name.clone())
            .or_else(|| audio.devices.first().map(|d| d.name.clone()));
        self.store.set_state(|s| s.audio_devices = audio);

        if let Some(name) = choice {
            self.select_audio_device(&name).await?;
        }
        Ok(())
    }

    pub async fn select_audio_device(&self, name: &str) -> Result<()> {
        self.store
            .set_state(|s| s.selected_audio_device = Some(name.to_string()));
        if let Some(prefs) = &self.prefs {
            if let Err(e) = prefs.update(|p| p.selected_audio_device = Some(name.to_string())).await {
                warn!("Failed to persist audio device: {}", e);
            }
        }
        info!("Selecting audio device: {}", name);
        self.engine
            .set_audio_device(name)
            .await
            .into_result("set_audio_device")
            .map_err(|e| self.report(e.into()))
    }

    /// Set the target frame rate locally and push it after the debounce window
    pub fn set_target_fps(&self, fps: u32) -> Result<()> {
        if !(1..=240).contains(&fps) {
            return Err(ValidationError::InvalidSetting {
                key: "target_fps".to_string(),
                reason: format!("{} is outside 1..=240", fps),
            }
            .into());
        }
        self.store.set_state(|s| s.target_fps = fps);

        let engine = Arc::clone(&self.engine);
        let store = self.store.clone();
        self.fps.schedule(FPS_KEY, async move {
            debug!("Pushing target fps {}", fps);
            if let Err(e) = engine.set_target_fps(fps).await.into_result("set_target_fps") {
                warn!("{}", e);
                store.set_state(|s| s.set_error(e.message.clone()));
            }
        });
        Ok(())
    }

    pub async fn toggle_pause(&self) -> Result<()> {
        self.engine
            .toggle_pause()
            .await
            .into_result("toggle_pause")
            .map_err(|e| self.report(e.into()))
    }

    /// Segment editor preloaded with a virtual's first row
    pub fn edit_segments(&self, virtual_id: &str) -> Result<SegmentList> {
        self.store.read(|s| -> Result<SegmentList> {
            let virtual_device = s
                .virtual_by_id(virtual_id)
                .ok_or_else(|| ControlError::UnknownVirtual(virtual_id.to_string()))?;
            Ok(SegmentList::from_virtual(virtual_device, s.devices.clone()))
        })
    }

    /// Empty segment editor against the known devices
    pub fn new_segments(&self) -> SegmentList {
        SegmentList::new(self.store.read(|s| s.devices.clone()))
    }

    /// Create a custom virtual from a segment list
    pub async fn add_virtual(&self, name: &str, segments: &SegmentList) -> Result<VirtualDevice> {
        let id = format!("custom_{}", chrono::Utc::now().timestamp_millis());
        let virtual_device = segments.build_virtual(id, name)?;
        self.engine
            .add_virtual(virtual_device.clone())
            .await
            .into_result("add_virtual")
            .map_err(|e| self.report(e.into()))?;
        info!(
            "Added virtual '{}' ({} pixels)",
            virtual_device.name,
            virtual_device.pixel_count()
        );
        Ok(virtual_device)
    }

    /// Replace a custom virtual's name and layout
    pub async fn update_virtual(&self, virtual_id: &str, name: &str, segments: &SegmentList) -> Result<VirtualDevice> {
        let mirrors_device = self
            .store
            .read(|s| s.virtual_by_id(virtual_id).map(|v| v.source_device_id.is_some()))
            .ok_or_else(|| ControlError::UnknownVirtual(virtual_id.to_string()))?;
        if mirrors_device {
            return Err(ControlError::DeviceVirtual(virtual_id.to_string()));
        }
        let virtual_device = segments.build_virtual(virtual_id, name)?;
        self.engine
            .update_virtual(virtual_device.clone())
            .await
            .into_result("update_virtual")
            .map_err(|e| self.report(e.into()))?;
        Ok(virtual_device)
    }

    pub async fn remove_virtual(&self, virtual_id: &str) -> Result<()> {
        self.engine
            .remove_virtual(virtual_id)
            .await
            .into_result("remove_virtual")
            .map_err(|e| self.report(e.into()))?;
        self.store.set_state(|s| {
            s.virtuals.retain(|v| v.id != virtual_id);
            s.selected_effects.remove(virtual_id);
            s.effect_settings.remove(virtual_id);
            s.active_effects.remove(virtual_id);
        });
        Ok(())
    }

    pub async fn add_device(&self, device: PhysicalDevice) -> Result<()> {
        if device.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        self.engine
            .add_device(device)
            .await
            .into_result("add_device")
            .map_err(|e| self.report(e.into()))
    }

    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        self.engine
            .remove_device(device_id)
            .await
            .into_result("remove_device")
            .map_err(|e| self.report(e.into()))
    }

    /// Flush persisted preferences and stop pending timers
    pub async fn shutdown(&self) {
        self.fps.cancel_all();
        if let Some(prefs) = &self.prefs {
            if let Err(e) = prefs.flush().await {
                warn!("Failed to flush preferences: {}", e);
            }
            prefs.shutdown();
        }
        info!("Control core stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Segment;
    use crate::engine::ConsoleEngine;

    fn controller() -> (Arc<ConsoleEngine>, Controller, BridgeHandle) {
        let (engine, events) = ConsoleEngine::new("core");
        engine.seed_demo();
        let engine = Arc::new(engine);
        let core = Controller::new(engine.clone(), CoreOptions::default(), None);
        let bridge = core.start(events);
        (engine, core, bridge)
    }

    #[tokio::test]
    async fn test_bootstrap_loads_state_and_picks_default_audio() {
        let (engine, core, _bridge) = controller();
        core.bootstrap().await;

        let state = core.store().get_state();
        assert_eq!(state.devices.len(), 2);
        assert!(state.virtual_by_id("device_192.168.1.20").is_some());
        assert_eq!(state.available_effects.len(), 3);
        assert!(state.dsp_settings.is_some());
        assert_eq!(state.selected_audio_device.as_deref(), Some("Default Input"));
        assert_eq!(
            engine.last_call("set_audio_device").map(|c| c.detail),
            Some("Default Input".to_string())
        );
    }

    #[tokio::test]
    async fn test_bootstrap_survives_failed_fetches() {
        let (engine, core, _bridge) = controller();
        engine.fail_command("get_scenes", "scene store locked");
        engine.fail_command("get_audio_devices", "no audio backend");
        core.bootstrap().await;

        let state = core.store().get_state();
        assert_eq!(state.devices.len(), 2);
        assert!(state.scenes.is_empty());
        assert_eq!(engine.call_count("set_audio_device"), 0);
    }

    #[tokio::test]
    async fn test_fps_is_debounced_to_last_value() {
        tokio::time::pause();
        let (engine, core, _bridge) = controller();
        core.set_target_fps(30).unwrap();
        core.set_target_fps(45).unwrap();
        core.set_target_fps(90).unwrap();
        assert_eq!(core.store().read(|s| s.target_fps), 90);
        assert!(core.set_target_fps(0).is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(engine.call_count("set_target_fps"), 1);
        assert_eq!(engine.last_call("set_target_fps").map(|c| c.detail), Some("90".to_string()));
    }

    #[tokio::test]
    async fn test_compose_virtual_across_devices() {
        let (engine, core, _bridge) = controller();
        core.bootstrap().await;

        let mut segments = core.new_segments();
        segments.add(Segment::range("192.168.1.20", 0, 9).unwrap()).unwrap();
        segments.add(Segment::gap(2).unwrap()).unwrap();
        segments.add(Segment::range("192.168.1.21", 0, 4).unwrap()).unwrap();
        assert!(segments.add(Segment::range("192.168.1.20", 5, 14).unwrap()).is_err());

        let created = core.add_virtual("  Combo ", &segments).await.unwrap();
        assert_eq!(created.name, "Combo");
        assert!(created.id.starts_with("custom_"));
        assert_eq!(created.primary_row().len(), 17);
        assert_eq!(engine.call_count("add_virtual"), 1);

        assert!(matches!(
            core.add_virtual("Empty", &core.new_segments()).await,
            Err(ControlError::Validation(ValidationError::NoSegments))
        ));
    }

    #[tokio::test]
    async fn test_device_add_recompose_remove() {
        let (engine, core, _bridge) = controller();
        core.bootstrap().await;

        assert!(matches!(
            core.add_device(PhysicalDevice {
                id: "10.0.0.30".to_string(),
                name: "  ".to_string(),
                pixel_count: 6,
            })
            .await,
            Err(ControlError::Validation(ValidationError::EmptyName))
        ));

        core.add_device(PhysicalDevice {
            id: "10.0.0.30".to_string(),
            name: "Shelf".to_string(),
            pixel_count: 6,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(core.store().read(|s| s.devices.len()), 3);

        let mut segments = core.new_segments();
        segments.add(Segment::range("10.0.0.30", 0, 2).unwrap()).unwrap();
        assert!(matches!(
            core.update_virtual("device_10.0.0.30", "Shelf", &segments).await,
            Err(ControlError::DeviceVirtual(_))
        ));
        assert_eq!(engine.call_count("update_virtual"), 0);

        let custom = core.add_virtual("Shelf Edge", &segments).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        segments.add(Segment::range("10.0.0.30", 3, 5).unwrap()).unwrap();
        let updated = core.update_virtual(&custom.id, "Shelf Edge", &segments).await.unwrap();
        assert_eq!(updated.pixel_count(), 6);
        assert_eq!(updated.source_device_id, None);
        assert_eq!(engine.call_count("update_virtual"), 1);
        assert!(matches!(
            core.update_virtual("custom_missing", "Nope", &segments).await,
            Err(ControlError::UnknownVirtual(_))
        ));

        core.remove_device("10.0.0.30").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = core.store().get_state();
        assert_eq!(state.devices.len(), 2);
        assert!(state.virtual_by_id("device_10.0.0.30").is_none());
    }

    #[tokio::test]
    async fn test_failed_command_sets_banner() {
        let (engine, core, _bridge) = controller();
        engine.fail_command("toggle_pause", "engine busy");
        assert!(core.toggle_pause().await.is_err());
        assert_eq!(core.store().read(|s| s.error.clone()), Some("engine busy".to_string()));
        core.dismiss_error();
        assert_eq!(core.store().read(|s| s.error.clone()), None);
    }
}
