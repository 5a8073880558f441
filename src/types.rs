//! Wire data model shared with the rendering engine
//!
//! Field names follow the engine's JSON (snake_case, `type`-tagged effect
//! configs). Rust-side names are renamed where the engine's are less precise.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Flat key/value settings object for one effect
pub type SettingsMap = serde_json::Map<String, Value>;

/// A physical addressable-LED device discovered on the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalDevice {
    /// Network address, also the device's identity
    #[serde(rename = "ip_address")]
    pub id: String,
    pub name: String,
    #[serde(rename = "led_count")]
    pub pixel_count: u32,
}

/// One pixel of one physical device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixCell {
    pub device_id: String,
    #[serde(rename = "pixel")]
    pub pixel_index: u32,
}

impl MatrixCell {
    pub fn new(device_id: impl Into<String>, pixel_index: u32) -> Self {
        Self {
            device_id: device_id.into(),
            pixel_index,
        }
    }
}

/// A matrix entry: a device pixel or a gap (`None`)
pub type Cell = Option<MatrixCell>;

/// Flat engine-facing pixel mapping for one row of a virtual
pub type Matrix = Vec<Cell>;

/// Prefix of virtual ids synthesized 1:1 for physical devices
pub const DEVICE_VIRTUAL_PREFIX: &str = "device_";

/// A logical LED strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualDevice {
    pub id: String,
    pub name: String,
    /// Address of the physical device this virtual mirrors exactly, if any
    #[serde(rename = "is_device", default)]
    pub source_device_id: Option<String>,
    #[serde(rename = "matrix_data", default)]
    pub matrix: Vec<Matrix>,
}

impl VirtualDevice {
    /// Synthesize the 1:1 mirror virtual for a physical device
    pub fn for_device(device: &PhysicalDevice) -> Self {
        let row = (0..device.pixel_count)
            .map(|i| Some(MatrixCell::new(device.id.clone(), i)))
            .collect();
        Self {
            id: device_virtual_id(&device.id),
            name: device.name.clone(),
            source_device_id: Some(device.id.clone()),
            matrix: vec![row],
        }
    }

    /// The row edited by the segment editor (virtuals are single-row today)
    pub fn primary_row(&self) -> &[Cell] {
        self.matrix.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of lit (non-gap) cells across all rows
    pub fn pixel_count(&self) -> usize {
        self.matrix
            .iter()
            .flat_map(|row| row.iter())
            .filter(|cell| cell.is_some())
            .count()
    }

    /// Distinct physical device addresses backing this virtual, in first-use order
    pub fn device_addresses(&self) -> Vec<String> {
        if let Some(source) = &self.source_device_id {
            return vec![source.clone()];
        }
        let mut seen = Vec::new();
        for cell in self.matrix.iter().flat_map(|row| row.iter()).flatten() {
            if !seen.contains(&cell.device_id) {
                seen.push(cell.device_id.clone());
            }
        }
        seen
    }
}

/// Virtual id used for the mirror of a physical device
pub fn device_virtual_id(address: &str) -> String {
    format!("{}{}", DEVICE_VIRTUAL_PREFIX, address)
}

/// Effect listed by the engine as available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectInfo {
    pub id: String,
    pub name: String,
}

/// Whole-object effect configuration as sent to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectConfig {
    #[serde(rename = "type")]
    pub effect_id: String,
    #[serde(default)]
    pub config: SettingsMap,
}

impl EffectConfig {
    pub fn new(effect_id: impl Into<String>, config: SettingsMap) -> Self {
        Self {
            effect_id: effect_id.into(),
            config,
        }
    }
}

/// UI control used to edit a setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Control {
    Slider { min: f64, max: f64, step: f64 },
    Checkbox,
    ColorPicker,
    Select { options: Vec<String> },
}

/// One entry of an effect's settings schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectSetting {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub control: Control,
    pub default_value: Value,
}

/// Ordered settings schema for one effect
pub type EffectSchema = Vec<EffectSetting>;

/// Materialize `setting id -> default value` for every schema entry
pub fn default_settings(schema: &[EffectSetting]) -> SettingsMap {
    schema
        .iter()
        .map(|s| (s.id.clone(), s.default_value.clone()))
        .collect()
}

/// Presets for one effect id. Names iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetCollection {
    #[serde(default)]
    pub user: BTreeMap<String, EffectConfig>,
    #[serde(default)]
    pub built_in: BTreeMap<String, EffectConfig>,
}

/// Scene entry referring to a named preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenePreset {
    pub effect_id: String,
    pub preset_name: String,
}

/// What a scene stores for one virtual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SceneEffect {
    Preset(ScenePreset),
    Custom(EffectConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub virtual_effects: HashMap<String, SceneEffect>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevices {
    pub devices: Vec<AudioDevice>,
    #[serde(default)]
    pub default_device_name: Option<String>,
}

/// Shape of the mel filterbank used by the analysis pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterbankType {
    Balanced,
    Precision,
    Vocal,
    Blade,
    BladePlus(BladePlusParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BladePlusParams {
    pub log_base: f32,
    pub multiplier: f32,
    pub divisor: f32,
}

/// Audio analysis (DSP) settings, engine-wide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DspSettings {
    pub smoothing_factor: f32,
    pub agc_attack: f32,
    pub agc_decay: f32,
    pub audio_delay_ms: u32,
    pub fft_size: u32,
    pub sample_rate: Option<u32>,
    pub num_bands: u32,
    pub min_freq: f32,
    pub max_freq: f32,
    pub filterbank_type: FilterbankType,
}

impl Default for DspSettings {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.6,
            agc_attack: 0.01,
            agc_decay: 0.1,
            audio_delay_ms: 0,
            fft_size: 1024,
            sample_rate: None,
            num_bands: 24,
            min_freq: 20.0,
            max_freq: 18000.0,
            filterbank_type: FilterbankType::Balanced,
        }
    }
}
