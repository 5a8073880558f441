//! Event bridge
//!
//! Consumes the engine's push events in arrival order and fans them out: ticks
//! to the frame router, scene snapshots to the scene manager, DSP settings to
//! the DSP editor, everything else to the store reducers.

use crate::effects::DspEditor;
use crate::engine::EngineEvent;
use crate::frames::FrameRouter;
use crate::scenes::SceneManager;
use crate::store::{AppState, StateStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

pub struct EventBridge {
    store: StateStore<AppState>,
    frames: FrameRouter,
    scenes: Arc<SceneManager>,
    dsp: Arc<DspEditor>,
}

/// Running bridge; dropping it stops event consumption
pub struct BridgeHandle {
    task: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Stop consuming events; idempotent
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Event bridge stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl EventBridge {
    pub fn new(
        store: StateStore<AppState>,
        frames: FrameRouter,
        scenes: Arc<SceneManager>,
        dsp: Arc<DspEditor>,
    ) -> Self {
        Self {
            store,
            frames,
            scenes,
            dsp,
        }
    }

    /// Spawn the consumer loop; it ends when the event channel closes
    pub fn start(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<EngineEvent>) -> BridgeHandle {
        let task = tokio::spawn(async move {
            info!("Event bridge started");
            while let Some(event) = events.recv().await {
                self.dispatch(event).await;
            }
            debug!("Event channel closed");
        });
        BridgeHandle { task: Some(task) }
    }

    pub async fn dispatch(&self, event: EngineEvent) {
        match event {
            EngineEvent::EngineTick(frames) => {
                trace!("engine-tick with {} entities", frames.len());
                self.frames.on_tick(frames);
            }
            EngineEvent::VirtualsChanged(virtuals) => {
                debug!("virtuals-changed ({} virtuals)", virtuals.len());
                self.store.set_state(|s| s.apply_virtuals(virtuals));
                self.frames.resolve_unattached().await;
            }
            EngineEvent::DevicesChanged(devices) => {
                debug!("devices-changed ({} devices)", devices.len());
                self.store.set_state(|s| s.apply_devices(devices));
                self.frames.resolve_unattached().await;
            }
            EngineEvent::PlaybackStateChanged(playback) => {
                debug!("playback-state-changed (paused: {})", playback.is_paused);
                self.store.set_state(|s| s.playback = playback);
            }
            EngineEvent::DspSettingsChanged(settings) => {
                debug!("dsp-settings-changed");
                self.dsp.on_settings_changed(settings).await;
            }
            EngineEvent::ScenesChanged(scenes) => {
                debug!("scenes-changed ({} scenes)", scenes.len());
                self.store.set_state(|s| s.scenes = scenes);
            }
            EngineEvent::SceneActivated(payload) => {
                self.scenes.on_scene_activated(&payload);
            }
            EngineEvent::DeviceFound(device) => {
                info!("Discovered device {} ({})", device.name, device.id);
                self.store.set_state(|s| s.device_found(device));
                self.frames.resolve_unattached().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectReconciler;
    use crate::engine::{ConsoleEngine, EngineCommands};
    use crate::types::{DspSettings, PhysicalDevice};
    use std::time::Duration;

    struct Fixture {
        engine: Arc<ConsoleEngine>,
        store: StateStore<AppState>,
        frames: FrameRouter,
        handle: BridgeHandle,
    }

    fn start() -> Fixture {
        let (engine, events) = ConsoleEngine::new("bridge");
        let engine = Arc::new(engine);
        let store = StateStore::new(AppState::default());
        let frames = FrameRouter::new(engine.clone(), store.clone(), false);
        let effects = Arc::new(EffectReconciler::new(engine.clone(), store.clone(), Duration::ZERO));
        let scenes = Arc::new(SceneManager::new(engine.clone(), store.clone(), effects));
        let dsp = Arc::new(DspEditor::new(engine.clone(), store.clone(), Duration::ZERO, None));
        let bridge = Arc::new(EventBridge::new(store.clone(), frames.clone(), scenes, dsp));
        let handle = bridge.start(events);
        Fixture {
            engine,
            store,
            frames,
            handle,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_events_reach_the_store() {
        let fx = start();
        fx.engine.emit(EngineEvent::DeviceFound(PhysicalDevice {
            id: "10.0.0.3".to_string(),
            name: "Hall".to_string(),
            pixel_count: 5,
        }));
        fx.engine.toggle_pause().await.into_result("toggle_pause").unwrap();
        fx.engine
            .update_dsp_settings(DspSettings {
                num_bands: 48,
                ..DspSettings::default()
            })
            .await
            .into_result("update_dsp_settings")
            .unwrap();
        settle().await;

        let state = fx.store.get_state();
        assert!(state.virtual_by_id("device_10.0.0.3").is_some());
        assert!(state.playback.is_paused);
        assert_eq!(state.dsp_settings.map(|d| d.num_bands), Some(48));
    }

    #[tokio::test]
    async fn test_ticks_reach_subscribers() {
        let fx = start();
        fx.engine.seed_device(PhysicalDevice {
            id: "10.0.0.4".to_string(),
            name: "Bar".to_string(),
            pixel_count: 2,
        });
        fx.store.set_state(|s| {
            s.device_found(PhysicalDevice {
                id: "10.0.0.4".to_string(),
                name: "Bar".to_string(),
                pixel_count: 2,
            })
        });

        let subscription = fx.frames.subscribe("10.0.0.4").await;
        fx.engine.tick();
        settle().await;
        assert_eq!(subscription.latest().map(|b| b.len()), Some(6));
        subscription.release().await;
    }

    #[tokio::test]
    async fn test_discovery_attaches_waiting_preview() {
        let fx = start();
        let early = fx.frames.subscribe("device_10.0.0.5").await;
        assert!(fx.engine.frame_feeds().is_empty());

        fx.engine.emit(EngineEvent::DeviceFound(PhysicalDevice {
            id: "10.0.0.5".to_string(),
            name: "Loft".to_string(),
            pixel_count: 3,
        }));
        settle().await;
        assert_eq!(fx.engine.frame_feeds(), vec!["10.0.0.5".to_string()]);
        early.release().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut fx = start();
        assert!(fx.handle.is_running());
        fx.handle.stop();
        fx.handle.stop();
        assert!(!fx.handle.is_running());

        fx.engine.toggle_pause().await.into_result("toggle_pause").unwrap();
        settle().await;
        assert!(!fx.store.read(|s| s.playback.is_paused));
    }
}
