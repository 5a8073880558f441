//! Scene state machine
//!
//! Activation is engine-driven: `activate` asks the engine to switch scenes
//! and the engine answers with a `scene-activated` snapshot whose presets are
//! already resolved. [`apply_activation`] replaces the local effect maps with
//! that snapshot in one store update, dropping malformed entries one at a
//! time.
//!
//! Saving goes the other way: every running virtual becomes either a
//! reference to the preset its settings match, or an embedded custom config.

use crate::effects::{find_matching_preset, EffectReconciler};
use crate::engine::EngineCommands;
use crate::error::{ControlError, Result, ValidationError};
use crate::store::{AppState, StateStore};
use crate::types::{EffectConfig, PresetCollection, Scene, SceneEffect, ScenePreset, SettingsMap};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Effect state carried by a `scene-activated` event, after filtering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneSnapshot {
    pub active_scene_id: Option<String>,
    pub selected_effects: HashMap<String, String>,
    pub effect_settings: HashMap<String, HashMap<String, SettingsMap>>,
    pub active_effects: HashMap<String, bool>,
}

impl SceneSnapshot {
    /// Parse a raw payload, keeping every well-formed entry
    ///
    /// Selected effects that are not strings, active flags that are not
    /// booleans and settings entries without an object `config` are skipped.
    pub fn parse(payload: &Value) -> Self {
        let mut snapshot = Self {
            active_scene_id: payload
                .get("active_scene_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            ..Self::default()
        };

        if let Some(selected) = payload.get("selected_effects").and_then(Value::as_object) {
            for (virtual_id, value) in selected {
                match value.as_str() {
                    Some(effect_id) => {
                        snapshot
                            .selected_effects
                            .insert(virtual_id.clone(), effect_id.to_string());
                    }
                    None => debug!("Dropping selected effect for {}: {}", virtual_id, value),
                }
            }
        }

        if let Some(active) = payload.get("active_effects").and_then(Value::as_object) {
            for (virtual_id, value) in active {
                match value.as_bool() {
                    Some(flag) => {
                        snapshot.active_effects.insert(virtual_id.clone(), flag);
                    }
                    None => debug!("Dropping active flag for {}: {}", virtual_id, value),
                }
            }
        }

        if let Some(settings) = payload.get("effect_settings").and_then(Value::as_object) {
            for (virtual_id, per_effect) in settings {
                let Some(per_effect) = per_effect.as_object() else {
                    debug!("Dropping settings for {}: not an object", virtual_id);
                    continue;
                };
                let mut configs = HashMap::new();
                for (effect_id, entry) in per_effect {
                    match entry.get("config").and_then(Value::as_object) {
                        Some(config) => {
                            configs.insert(effect_id.clone(), config.clone());
                        }
                        None => debug!("Dropping {} settings for {}", effect_id, virtual_id),
                    }
                }
                snapshot.effect_settings.insert(virtual_id.clone(), configs);
            }
        }

        snapshot
    }
}

/// Replace the local effect maps with an activation snapshot
pub fn apply_activation(state: &mut AppState, snapshot: SceneSnapshot) {
    state.active_scene_id = snapshot.active_scene_id;
    state.selected_effects = snapshot.selected_effects;
    state.effect_settings = snapshot.effect_settings;
    state.active_effects = snapshot.active_effects;
}

/// Resolve every entry of a scene against a preset cache
///
/// A preset reference that no longer resolves is dropped without error.
pub fn resolve_scene(
    scene: &Scene,
    presets: impl Fn(&str) -> Option<PresetCollection>,
) -> BTreeMap<String, EffectConfig> {
    let mut resolved = BTreeMap::new();
    for (virtual_id, entry) in &scene.virtual_effects {
        let config = match entry {
            SceneEffect::Custom(config) => Some(config.clone()),
            SceneEffect::Preset(reference) => presets(&reference.effect_id).and_then(|collection| {
                collection
                    .user
                    .get(&reference.preset_name)
                    .or_else(|| collection.built_in.get(&reference.preset_name))
                    .map(|preset| EffectConfig::new(reference.effect_id.clone(), preset.config.clone()))
            }),
        };
        match config {
            Some(config) => {
                resolved.insert(virtual_id.clone(), config);
            }
            None => debug!("Scene {}: dropping unresolved entry for {}", scene.id, virtual_id),
        }
    }
    resolved
}

/// One running virtual in a scene being saved
#[derive(Debug, Clone, PartialEq)]
pub struct DraftEntry {
    pub effect_id: String,
    pub settings: SettingsMap,
    pub included: bool,
    pub choice: SceneEffect,
}

/// Editable scene before it is sent to the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneDraft {
    entries: BTreeMap<String, DraftEntry>,
    presets: HashMap<String, PresetCollection>,
}

impl SceneDraft {
    /// Capture every running virtual with its best default choice
    pub fn capture(state: &AppState, presets: HashMap<String, PresetCollection>) -> Self {
        let mut entries = BTreeMap::new();
        for virtual_id in state.active_virtual_ids() {
            let Some(effect_id) = state.selected_effect(&virtual_id) else {
                continue;
            };
            let Some(settings) = state.settings(&virtual_id, effect_id) else {
                continue;
            };

            let matched = presets
                .get(effect_id)
                .and_then(|collection| find_matching_preset(collection, settings));
            let choice = match matched {
                Some(m) => SceneEffect::Preset(ScenePreset {
                    effect_id: effect_id.to_string(),
                    preset_name: m.name,
                }),
                None => SceneEffect::Custom(EffectConfig::new(effect_id, settings.clone())),
            };
            entries.insert(
                virtual_id.clone(),
                DraftEntry {
                    effect_id: effect_id.to_string(),
                    settings: settings.clone(),
                    included: true,
                    choice,
                },
            );
        }
        Self { entries, presets }
    }

    pub fn entries(&self) -> &BTreeMap<String, DraftEntry> {
        &self.entries
    }

    pub fn set_included(&mut self, virtual_id: &str, included: bool) -> Result<()> {
        self.entry_mut(virtual_id)?.included = included;
        Ok(())
    }

    /// Store this virtual as a reference to a named preset of its effect
    pub fn use_preset(&mut self, virtual_id: &str, preset_name: &str) -> Result<()> {
        let effect_id = self.entry_mut(virtual_id)?.effect_id.clone();
        let exists = self
            .presets
            .get(&effect_id)
            .is_some_and(|c| c.user.contains_key(preset_name) || c.built_in.contains_key(preset_name));
        if !exists {
            return Err(ControlError::UnknownPreset {
                effect_id,
                name: preset_name.to_string(),
            });
        }
        self.entry_mut(virtual_id)?.choice = SceneEffect::Preset(ScenePreset {
            effect_id,
            preset_name: preset_name.to_string(),
        });
        Ok(())
    }

    /// Store this virtual's current settings verbatim
    pub fn use_custom(&mut self, virtual_id: &str) -> Result<()> {
        let entry = self.entry_mut(virtual_id)?;
        entry.choice = SceneEffect::Custom(EffectConfig::new(entry.effect_id.clone(), entry.settings.clone()));
        Ok(())
    }

    fn entry_mut(&mut self, virtual_id: &str) -> Result<&mut DraftEntry> {
        self.entries
            .get_mut(virtual_id)
            .ok_or_else(|| ControlError::UnknownVirtual(virtual_id.to_string()))
    }

    /// Build the scene with a fresh `scene_<millis>` id
    pub fn build(&self, name: &str) -> Result<Scene> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let virtual_effects = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.included)
            .map(|(virtual_id, entry)| (virtual_id.clone(), entry.choice.clone()))
            .collect();
        Ok(Scene {
            id: format!("scene_{}", chrono::Utc::now().timestamp_millis()),
            name: name.to_string(),
            virtual_effects,
        })
    }
}

/// Scene commands and the activation reducer
pub struct SceneManager {
    engine: Arc<dyn EngineCommands>,
    store: StateStore<AppState>,
    effects: Arc<EffectReconciler>,
}

impl SceneManager {
    pub fn new(engine: Arc<dyn EngineCommands>, store: StateStore<AppState>, effects: Arc<EffectReconciler>) -> Self {
        Self { engine, store, effects }
    }

    fn report(&self, err: ControlError) -> ControlError {
        warn!("{}", err);
        let banner = err.banner();
        self.store.set_state(|s| s.set_error(banner));
        err
    }

    /// Apply a raw `scene-activated` payload to the store
    pub fn on_scene_activated(&self, payload: &Value) {
        let snapshot = SceneSnapshot::parse(payload);
        info!(
            "Scene activated: {} ({} virtuals running)",
            snapshot.active_scene_id.as_deref().unwrap_or("none"),
            snapshot.active_effects.values().filter(|a| **a).count()
        );
        self.store.set_state(|s| apply_activation(s, snapshot));
    }

    /// Capture the running virtuals, loading their preset collections first
    pub async fn draft(&self) -> SceneDraft {
        let state = self.store.get_state();
        let mut presets = HashMap::new();
        for virtual_id in state.active_virtual_ids() {
            let Some(effect_id) = state.selected_effect(&virtual_id) else {
                continue;
            };
            if presets.contains_key(effect_id) {
                continue;
            }
            match self.effects.load_presets(effect_id, false).await {
                Ok(collection) => {
                    presets.insert(effect_id.to_string(), collection);
                }
                Err(e) => debug!("Saving {} without presets: {}", effect_id, e),
            }
        }
        SceneDraft::capture(&state, presets)
    }

    pub async fn save(&self, draft: &SceneDraft, name: &str) -> Result<Scene> {
        let scene = draft.build(name)?;
        self.engine
            .save_scene(scene.clone())
            .await
            .into_result("save_scene")
            .map_err(|e| self.report(e.into()))?;
        info!("Saved scene '{}' ({} virtuals)", scene.name, scene.virtual_effects.len());
        Ok(scene)
    }

    pub async fn activate(&self, scene_id: &str) -> Result<()> {
        let known = self.store.read(|s| s.scenes.iter().any(|scene| scene.id == scene_id));
        if !known {
            return Err(ControlError::UnknownScene(scene_id.to_string()));
        }
        self.engine
            .activate_scene(scene_id)
            .await
            .into_result("activate_scene")
            .map_err(|e| self.report(e.into()))
    }

    pub async fn delete(&self, scene_id: &str) -> Result<()> {
        self.engine
            .delete_scene(scene_id)
            .await
            .into_result("delete_scene")
            .map_err(|e| self.report(e.into()))?;
        self.store.set_state(|s| {
            s.scenes.retain(|scene| scene.id != scene_id);
            if s.active_scene_id.as_deref() == Some(scene_id) {
                s.active_scene_id = None;
            }
        });
        Ok(())
    }

    /// What activating a scene would run, against the local preset cache
    pub fn preview(&self, scene_id: &str) -> Result<BTreeMap<String, EffectConfig>> {
        let scene = self
            .store
            .read(|s| s.scenes.iter().find(|scene| scene.id == scene_id).cloned())
            .ok_or_else(|| ControlError::UnknownScene(scene_id.to_string()))?;
        Ok(resolve_scene(&scene, |effect_id| self.effects.cached_presets(effect_id)))
    }
}
