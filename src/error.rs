//! Error taxonomy for the control core
//!
//! Validation errors are local and synchronous; they never reach the engine.
//! Command errors carry the engine-provided message one level up to the
//! action that issued the command and stop there.

use thiserror::Error;

/// Result alias for operations that can fail with a [`ControlError`].
pub type Result<T> = std::result::Result<T, ControlError>;

/// Local validation failure, surfaced immediately to the initiating action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A candidate segment claims a pixel that another segment already uses.
    #[error("Overlap detected: pixel {pixel_index} on device {device_id} is already in use")]
    Overlap { device_id: String, pixel_index: u32 },

    /// A device range whose start lies after its end.
    #[error("Invalid range on device {device_id}: start {start} is after end {end}")]
    InvalidRange { device_id: String, start: u32, end: u32 },

    #[error("Gap segments must be at least one pixel long")]
    ZeroLengthGap,

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// A cell references a pixel outside `[0, pixel_count)`.
    #[error("Pixel {pixel_index} is out of range for device {device_id} ({pixel_count} pixels)")]
    PixelOutOfRange {
        device_id: String,
        pixel_index: u32,
        pixel_count: u32,
    },

    /// The same `(device, pixel)` pair appears twice in one matrix.
    #[error("Pixel {pixel_index} on device {device_id} appears more than once")]
    DuplicateCell { device_id: String, pixel_index: u32 },

    #[error("Name cannot be empty")]
    EmptyName,

    #[error("A virtual needs at least one segment")]
    NoSegments,

    #[error("Failed to parse JSON: {0}")]
    MalformedJson(String),

    #[error("Unrecognized JSON file format")]
    UnrecognizedFormat,

    /// A setting edit that the settings record cannot hold.
    #[error("Invalid value for {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

/// The engine rejected a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{command} failed: {message}")]
pub struct CommandError {
    /// Command name as sent on the command surface (e.g. `start_effect`)
    pub command: &'static str,
    /// Engine-provided error string
    pub message: String,
}

impl CommandError {
    pub fn new(command: &'static str, message: impl Into<String>) -> Self {
        Self {
            command,
            message: message.into(),
        }
    }
}

/// Any failure an action initiator can observe.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("No effect selected for virtual {0}")]
    NoEffectSelected(String),

    #[error("Unknown virtual: {0}")]
    UnknownVirtual(String),

    #[error("Effect {0} is not available")]
    UnknownEffect(String),

    #[error("Unknown scene: {0}")]
    UnknownScene(String),

    /// Device mirrors follow their device and cannot be re-laid out.
    #[error("Virtual {0} mirrors a physical device and cannot be edited")]
    DeviceVirtual(String),

    #[error("Unknown preset {name} for effect {effect_id}")]
    UnknownPreset { effect_id: String, name: String },

    /// Preset operation refused by the dirty/ownership rules.
    #[error("{0}")]
    PresetRule(&'static str),
}

impl ControlError {
    /// Message suitable for a single dismissible banner.
    pub fn banner(&self) -> String {
        match self {
            ControlError::Command(e) => e.message.clone(),
            other => other.to_string(),
        }
    }
}
