//! Rendering engine surfaces
//!
//! The engine is an external collaborator reached through two surfaces: a
//! request/response command surface ([`EngineCommands`]) whose replies are
//! always a tagged [`CommandResult`], and a push event surface
//! ([`EngineEvent`]). [`ConsoleEngine`] is an in-process implementation that
//! logs every command and keeps just enough state to answer queries.

mod catalog;
mod console;
mod events;

pub use console::ConsoleEngine;
pub use events::{EngineEvent, FrameMap};

use crate::error::CommandError;
use crate::types::{
    AudioDevices, DspSettings, EffectConfig, EffectInfo, EffectSchema, PhysicalDevice,
    PlaybackState, PresetCollection, Scene, VirtualDevice,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Reply envelope of every command: `{status:"ok",data}` or `{status:"error",error}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandResult<T> {
    Ok { data: T },
    Error { error: String },
}

impl<T> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        CommandResult::Ok { data }
    }

    pub fn error(error: impl Into<String>) -> Self {
        CommandResult::Error { error: error.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommandResult::Ok { .. })
    }

    /// Unwrap the envelope, tagging a failure with the command name
    pub fn into_result(self, command: &'static str) -> Result<T, CommandError> {
        match self {
            CommandResult::Ok { data } => Ok(data),
            CommandResult::Error { error } => Err(CommandError::new(command, error)),
        }
    }
}

impl<T> From<Result<T, String>> for CommandResult<T> {
    fn from(result: Result<T, String>) -> Self {
        match result {
            Ok(data) => CommandResult::ok(data),
            Err(error) => CommandResult::error(error),
        }
    }
}

/// Command surface of the rendering engine
///
/// Every call is a network/IPC round trip. Callers must not assume ordering
/// between two in-flight commands unless they sequence them.
#[async_trait]
pub trait EngineCommands: Send + Sync {
    // Queries
    async fn get_devices(&self) -> CommandResult<Vec<PhysicalDevice>>;
    async fn get_virtuals(&self) -> CommandResult<Vec<VirtualDevice>>;
    async fn get_scenes(&self) -> CommandResult<Vec<Scene>>;
    async fn get_dsp_settings(&self) -> CommandResult<DspSettings>;
    async fn get_available_effects(&self) -> CommandResult<Vec<EffectInfo>>;
    async fn get_effect_schema(&self, effect_id: &str) -> CommandResult<EffectSchema>;
    async fn load_presets(&self, effect_id: &str) -> CommandResult<PresetCollection>;
    async fn get_audio_devices(&self) -> CommandResult<AudioDevices>;
    async fn get_playback_state(&self) -> CommandResult<PlaybackState>;

    // Topology
    async fn add_virtual(&self, config: VirtualDevice) -> CommandResult<()>;
    async fn update_virtual(&self, config: VirtualDevice) -> CommandResult<()>;
    async fn remove_virtual(&self, virtual_id: &str) -> CommandResult<()>;
    async fn add_device(&self, config: PhysicalDevice) -> CommandResult<()>;
    async fn remove_device(&self, device_id: &str) -> CommandResult<()>;

    // Effects
    async fn start_effect(&self, virtual_id: &str, config: EffectConfig) -> CommandResult<()>;
    async fn stop_effect(&self, virtual_id: &str) -> CommandResult<()>;
    async fn update_effect_settings(&self, virtual_id: &str, config: EffectConfig) -> CommandResult<()>;

    // Raw per-device frame feed
    async fn subscribe_to_frames(&self, device_id: &str) -> CommandResult<()>;
    async fn unsubscribe_from_frames(&self, device_id: &str) -> CommandResult<()>;

    // Presets and scenes
    async fn save_preset(&self, effect_id: &str, preset_name: &str, settings: EffectConfig) -> CommandResult<()>;
    async fn delete_preset(&self, effect_id: &str, preset_name: &str) -> CommandResult<()>;
    async fn save_scene(&self, scene: Scene) -> CommandResult<()>;
    async fn activate_scene(&self, scene_id: &str) -> CommandResult<()>;
    async fn delete_scene(&self, scene_id: &str) -> CommandResult<()>;

    // Engine-wide
    async fn update_dsp_settings(&self, settings: DspSettings) -> CommandResult<()>;
    async fn restart_audio_capture(&self) -> CommandResult<()>;
    async fn set_target_fps(&self, fps: u32) -> CommandResult<()>;
    async fn set_audio_device(&self, device_name: &str) -> CommandResult<()>;
    async fn toggle_pause(&self) -> CommandResult<()>;

    // Settings documents
    async fn export_settings(&self) -> CommandResult<String>;
    async fn import_settings(&self, data: String) -> CommandResult<()>;
    async fn trigger_reload(&self) -> CommandResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let ok: CommandResult<u32> = CommandResult::ok(5);
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"status": "ok", "data": 5}));

        let err: CommandResult<u32> = serde_json::from_value(json!({"status": "error", "error": "boom"})).unwrap();
        assert_eq!(err, CommandResult::error("boom"));
    }

    #[test]
    fn test_into_result_tags_command() {
        let err = CommandResult::<()>::error("no such virtual").into_result("stop_effect").unwrap_err();
        assert_eq!(err.command, "stop_effect");
        assert_eq!(err.message, "no such virtual");
        assert_eq!(CommandResult::ok(1).into_result("x"), Ok(1));
    }
}
