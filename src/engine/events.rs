//! Push events emitted by the engine

use crate::types::{DspSettings, PhysicalDevice, PlaybackState, Scene, VirtualDevice};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Entity id -> flat RGB bytes for one render tick
pub type FrameMap = HashMap<String, Vec<u8>>;

/// Fire-and-forget notification from the engine
///
/// `SceneActivated` keeps its raw payload: the scene state machine filters
/// malformed entries per field instead of rejecting the whole event.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    EngineTick(FrameMap),
    VirtualsChanged(Vec<VirtualDevice>),
    DevicesChanged(Vec<PhysicalDevice>),
    PlaybackStateChanged(PlaybackState),
    DspSettingsChanged(DspSettings),
    ScenesChanged(Vec<Scene>),
    SceneActivated(Value),
    DeviceFound(PhysicalDevice),
}

impl EngineEvent {
    /// Event channel name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::EngineTick(_) => "engine-tick",
            EngineEvent::VirtualsChanged(_) => "virtuals-changed",
            EngineEvent::DevicesChanged(_) => "devices-changed",
            EngineEvent::PlaybackStateChanged(_) => "playback-state-changed",
            EngineEvent::DspSettingsChanged(_) => "dsp-settings-changed",
            EngineEvent::ScenesChanged(_) => "scenes-changed",
            EngineEvent::SceneActivated(_) => "scene-activated",
            EngineEvent::DeviceFound(_) => "device-found",
        }
    }

    /// Decode a named event from its JSON payload
    ///
    /// Unknown names and payloads of the wrong shape are logged and dropped.
    pub fn from_wire(name: &str, payload: Value) -> Option<Self> {
        let event = match name {
            "engine-tick" => EngineEvent::EngineTick(parse(name, payload)?),
            "virtuals-changed" => EngineEvent::VirtualsChanged(parse(name, payload)?),
            "devices-changed" => EngineEvent::DevicesChanged(parse(name, payload)?),
            "playback-state-changed" => EngineEvent::PlaybackStateChanged(parse(name, payload)?),
            "dsp-settings-changed" => EngineEvent::DspSettingsChanged(parse(name, payload)?),
            "scenes-changed" => EngineEvent::ScenesChanged(parse(name, payload)?),
            "scene-activated" => EngineEvent::SceneActivated(payload),
            "device-found" => EngineEvent::DeviceFound(parse(name, payload)?),
            other => {
                warn!("Ignoring unknown engine event '{}'", other);
                return None;
            }
        };
        Some(event)
    }
}

fn parse<T: DeserializeOwned>(name: &str, payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Dropping malformed '{}' event: {}", name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tick_from_wire() {
        let event = EngineEvent::from_wire("engine-tick", json!({"v1": [255, 0, 0]})).unwrap();
        match event {
            EngineEvent::EngineTick(frames) => assert_eq!(frames["v1"], vec![255, 0, 0]),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        assert!(EngineEvent::from_wire("playback-state-changed", json!({"is_paused": "yes"})).is_none());
        assert!(EngineEvent::from_wire("engine-tick", json!({"v1": [300]})).is_none());
        assert!(EngineEvent::from_wire("no-such-event", json!(null)).is_none());
    }

    #[test]
    fn test_scene_activated_keeps_raw_payload() {
        let raw = json!({"selected_effects": {"v1": 42}});
        let event = EngineEvent::from_wire("scene-activated", raw.clone()).unwrap();
        assert_eq!(event, EngineEvent::SceneActivated(raw));
        assert_eq!(event.name(), "scene-activated");
    }
}
