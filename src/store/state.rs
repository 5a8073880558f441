//! Application state held by the control core and its event reducers

use crate::types::{
    AudioDevices, DspSettings, EffectConfig, EffectInfo, PhysicalDevice, PlaybackState, Scene,
    SettingsMap, VirtualDevice,
};
use std::collections::HashMap;
use tracing::debug;

/// Default target frame rate before the user picks one
pub const DEFAULT_TARGET_FPS: u32 = 60;

/// Everything renderers derive their view from
///
/// Devices, virtuals, scenes, playback and committed DSP settings mirror the
/// engine; the effect maps are optimistic local edits reconciled by events.
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub devices: Vec<PhysicalDevice>,
    pub virtuals: Vec<VirtualDevice>,
    pub scenes: Vec<Scene>,
    pub playback: PlaybackState,
    pub available_effects: Vec<EffectInfo>,
    /// virtual id -> selected effect id
    pub selected_effects: HashMap<String, String>,
    /// virtual id -> effect id -> working settings
    pub effect_settings: HashMap<String, HashMap<String, SettingsMap>>,
    /// virtual id -> whether an effect is running on it
    pub active_effects: HashMap<String, bool>,
    pub active_scene_id: Option<String>,
    pub dsp_settings: Option<DspSettings>,
    pub target_fps: u32,
    pub audio_devices: AudioDevices,
    pub selected_audio_device: Option<String>,
    /// Single dismissible error banner
    pub error: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            virtuals: Vec::new(),
            scenes: Vec::new(),
            playback: PlaybackState::default(),
            available_effects: Vec::new(),
            selected_effects: HashMap::new(),
            effect_settings: HashMap::new(),
            active_effects: HashMap::new(),
            active_scene_id: None,
            dsp_settings: None,
            target_fps: DEFAULT_TARGET_FPS,
            audio_devices: AudioDevices::default(),
            selected_audio_device: None,
            error: None,
        }
    }
}

impl AppState {
    pub fn virtual_by_id(&self, id: &str) -> Option<&VirtualDevice> {
        self.virtuals.iter().find(|v| v.id == id)
    }

    pub fn device_by_id(&self, id: &str) -> Option<&PhysicalDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn is_active(&self, virtual_id: &str) -> bool {
        self.active_effects.get(virtual_id).copied().unwrap_or(false)
    }

    pub fn selected_effect(&self, virtual_id: &str) -> Option<&str> {
        self.selected_effects.get(virtual_id).map(String::as_str)
    }

    pub fn settings(&self, virtual_id: &str, effect_id: &str) -> Option<&SettingsMap> {
        self.effect_settings.get(virtual_id)?.get(effect_id)
    }

    /// Whole config for the virtual's selected effect, if one is selected
    pub fn current_config(&self, virtual_id: &str) -> Option<EffectConfig> {
        let effect_id = self.selected_effect(virtual_id)?;
        let config = self.settings(virtual_id, effect_id).cloned().unwrap_or_default();
        Some(EffectConfig::new(effect_id, config))
    }

    /// Ids of every virtual currently running an effect
    pub fn active_virtual_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .active_effects
            .iter()
            .filter(|(_, active)| **active)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_effect_available(&self, effect_id: &str) -> bool {
        self.available_effects.is_empty() || self.available_effects.iter().any(|e| e.id == effect_id)
    }

    /// Replace the device list and synthesize mirror virtuals for new devices
    pub fn apply_devices(&mut self, devices: Vec<PhysicalDevice>) {
        self.devices = devices;
        let devices = self.devices.clone();
        for device in &devices {
            self.ensure_device_virtual(device);
        }
    }

    /// Upsert one discovered device
    pub fn device_found(&mut self, device: PhysicalDevice) {
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => existing.name = device.name.clone(),
            None => self.devices.push(device.clone()),
        }
        self.ensure_device_virtual(&device);
    }

    /// Add the `device_<address>` mirror virtual if it does not exist yet
    pub fn ensure_device_virtual(&mut self, device: &PhysicalDevice) -> bool {
        let mirror = VirtualDevice::for_device(device);
        if self.virtuals.iter().any(|v| v.id == mirror.id) {
            return false;
        }
        debug!("Synthesized mirror virtual {} for {}", mirror.id, device.id);
        self.virtuals.push(mirror);
        true
    }

    pub fn apply_virtuals(&mut self, virtuals: Vec<VirtualDevice>) {
        self.virtuals = virtuals;
    }

    /// Working settings for a (virtual, effect) pair, created empty if missing
    pub fn settings_mut(&mut self, virtual_id: &str, effect_id: &str) -> &mut SettingsMap {
        self.effect_settings
            .entry(virtual_id.to_string())
            .or_default()
            .entry(effect_id.to_string())
            .or_default()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}
