//! Effect configuration reconciler
//!
//! Owns the per-virtual selected effect and the per-(virtual, effect) working
//! settings. Local edits are applied optimistically to the store and pushed to
//! the engine as whole [`EffectConfig`] objects; a failed command surfaces the
//! engine's message and leaves the optimistic value in place until the next
//! authoritative event corrects it.
//!
//! Schemas and preset collections are fetched lazily and cached per effect
//! id. Schemas are static for the process lifetime; preset collections are
//! invalidated after every save or delete.

pub mod dsp;
pub mod presets;

pub use dsp::DspEditor;
pub use presets::{find_matching_preset, values_equal, PresetMatch, PresetOrigin, PresetStatus};

use crate::debounce::Debouncer;
use crate::engine::EngineCommands;
use crate::error::{ControlError, Result, ValidationError};
use crate::store::{AppState, StateStore};
use crate::types::{default_settings, EffectConfig, EffectSchema, PresetCollection, SettingsMap};
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the settings panel of a (virtual, effect) pair stands
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaState {
    NoSchema,
    SchemaLoading,
    Ready(Arc<EffectSchema>),
}

/// Effect selection, settings and presets against the engine
pub struct EffectReconciler {
    engine: Arc<dyn EngineCommands>,
    store: StateStore<AppState>,
    schemas: DashMap<String, Arc<EffectSchema>>,
    loading: DashSet<String>,
    presets: DashMap<String, PresetCollection>,
    pushes: Debouncer,
}

impl EffectReconciler {
    pub fn new(engine: Arc<dyn EngineCommands>, store: StateStore<AppState>, settings_debounce: Duration) -> Self {
        Self {
            engine,
            store,
            schemas: DashMap::new(),
            loading: DashSet::new(),
            presets: DashMap::new(),
            pushes: Debouncer::new(settings_debounce),
        }
    }

    /// Record a failed action on the error banner and hand it back
    fn report(&self, err: ControlError) -> ControlError {
        warn!("{}", err);
        let banner = err.banner();
        self.store.set_state(|s| s.set_error(banner));
        err
    }

    pub fn schema_state(&self, effect_id: &str) -> SchemaState {
        if let Some(schema) = self.schemas.get(effect_id) {
            SchemaState::Ready(Arc::clone(&schema))
        } else if self.loading.contains(effect_id) {
            SchemaState::SchemaLoading
        } else {
            SchemaState::NoSchema
        }
    }

    pub fn cached_schema(&self, effect_id: &str) -> Option<Arc<EffectSchema>> {
        self.schemas.get(effect_id).map(|s| Arc::clone(&s))
    }

    /// Cached schema, fetching it on first use
    pub async fn ensure_schema(&self, effect_id: &str) -> Result<Arc<EffectSchema>> {
        if let Some(schema) = self.cached_schema(effect_id) {
            return Ok(schema);
        }

        self.loading.insert(effect_id.to_string());
        debug!("Fetching settings schema for {}", effect_id);
        let fetched = self
            .engine
            .get_effect_schema(effect_id)
            .await
            .into_result("get_effect_schema");
        self.loading.remove(effect_id);

        let schema = Arc::new(fetched?);
        self.schemas.insert(effect_id.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Cached preset collection for an effect, if loaded
    pub fn cached_presets(&self, effect_id: &str) -> Option<PresetCollection> {
        self.presets.get(effect_id).map(|p| p.value().clone())
    }

    /// Preset collection for an effect; `refresh` bypasses the cache
    pub async fn load_presets(&self, effect_id: &str, refresh: bool) -> Result<PresetCollection> {
        if !refresh {
            if let Some(cached) = self.cached_presets(effect_id) {
                return Ok(cached);
            }
        }
        let collection = self
            .engine
            .load_presets(effect_id)
            .await
            .into_result("load_presets")?;
        debug!(
            "Cached {} user / {} built-in presets for {}",
            collection.user.len(),
            collection.built_in.len(),
            effect_id
        );
        self.presets.insert(effect_id.to_string(), collection.clone());
        Ok(collection)
    }

    /// Select an effect for a virtual
    ///
    /// Fetches the schema if needed, materializes defaults when the pair has
    /// no settings yet, and restarts the effect with its config if the
    /// virtual is running.
    pub async fn select_effect(&self, virtual_id: &str, effect_id: &str) -> Result<()> {
        let (known, available) = self.store.read(|s| {
            (s.virtual_by_id(virtual_id).is_some(), s.is_effect_available(effect_id))
        });
        if !known {
            return Err(ControlError::UnknownVirtual(virtual_id.to_string()));
        }
        if !available {
            return Err(ControlError::UnknownEffect(effect_id.to_string()));
        }

        self.store.set_state(|s| {
            s.selected_effects.insert(virtual_id.to_string(), effect_id.to_string())
        });

        let schema = self.ensure_schema(effect_id).await.map_err(|e| self.report(e))?;

        let materialized = self.store.set_state(|s| {
            if s.settings(virtual_id, effect_id).is_some() {
                return false;
            }
            *s.settings_mut(virtual_id, effect_id) = default_settings(&schema);
            true
        });
        if materialized {
            debug!("Materialized defaults for {} / {}", virtual_id, effect_id);
        }

        if let Err(e) = self.load_presets(effect_id, false).await {
            warn!("Presets for {} unavailable: {}", effect_id, e);
        }

        if self.store.read(|s| s.is_active(virtual_id)) {
            self.start_effect(virtual_id).await?;
        }
        Ok(())
    }

    /// Merge one setting into the selected effect's working settings
    ///
    /// A running virtual gets the whole config pushed through the per-virtual
    /// debouncer (or immediately when the debounce window is zero).
    pub async fn update_setting(&self, virtual_id: &str, key: &str, value: Value) -> Result<()> {
        let effect_id = self
            .store
            .read(|s| s.selected_effect(virtual_id).map(str::to_string))
            .ok_or_else(|| ControlError::NoEffectSelected(virtual_id.to_string()))?;

        let active = self.store.set_state(|s| {
            s.settings_mut(virtual_id, &effect_id).insert(key.to_string(), value);
            s.is_active(virtual_id)
        });

        if active {
            self.push_settings(virtual_id).await?;
        }
        Ok(())
    }

    async fn push_settings(&self, virtual_id: &str) -> Result<()> {
        if self.pushes.delay().is_zero() {
            return self.push_now(virtual_id).await;
        }

        let engine = Arc::clone(&self.engine);
        let store = self.store.clone();
        let vid = virtual_id.to_string();
        self.pushes.schedule(virtual_id, async move {
            // Read at fire time so the newest settings win
            let Some(config) = store.read(|s| s.current_config(&vid)) else {
                return;
            };
            if let Err(e) = engine
                .update_effect_settings(&vid, config)
                .await
                .into_result("update_effect_settings")
            {
                warn!("{}", e);
                store.set_state(|s| s.set_error(e.message.clone()));
            }
        });
        Ok(())
    }

    async fn push_now(&self, virtual_id: &str) -> Result<()> {
        self.pushes.cancel(virtual_id);
        let Some(config) = self.store.read(|s| s.current_config(virtual_id)) else {
            return Ok(());
        };
        self.engine
            .update_effect_settings(virtual_id, config)
            .await
            .into_result("update_effect_settings")
            .map_err(|e| self.report(e.into()))
    }

    /// Start the selected effect; the virtual is marked active only on success
    pub async fn start_effect(&self, virtual_id: &str) -> Result<()> {
        let config = self
            .store
            .read(|s| s.current_config(virtual_id))
            .ok_or_else(|| ControlError::NoEffectSelected(virtual_id.to_string()))?;

        self.pushes.cancel(virtual_id);
        self.engine
            .start_effect(virtual_id, config.clone())
            .await
            .into_result("start_effect")
            .map_err(|e| self.report(e.into()))?;

        info!("Started {} on {}", config.effect_id, virtual_id);
        self.store.set_state(|s| {
            s.active_effects.insert(virtual_id.to_string(), true);
        });
        Ok(())
    }

    /// Stop the running effect; the virtual is marked inactive only on success
    pub async fn stop_effect(&self, virtual_id: &str) -> Result<()> {
        self.pushes.cancel(virtual_id);
        self.engine
            .stop_effect(virtual_id)
            .await
            .into_result("stop_effect")
            .map_err(|e| self.report(e.into()))?;

        info!("Stopped effect on {}", virtual_id);
        self.store.set_state(|s| {
            s.active_effects.insert(virtual_id.to_string(), false);
        });
        Ok(())
    }

    pub async fn toggle_effect(&self, virtual_id: &str) -> Result<()> {
        if self.store.read(|s| s.is_active(virtual_id)) {
            self.stop_effect(virtual_id).await
        } else {
            self.start_effect(virtual_id).await
        }
    }

    /// Selected effect id and working settings of a virtual
    fn working_settings(&self, virtual_id: &str) -> Result<(String, SettingsMap)> {
        self.store.read(|s| -> Result<(String, SettingsMap)> {
            let effect_id = s
                .selected_effect(virtual_id)
                .ok_or_else(|| ControlError::NoEffectSelected(virtual_id.to_string()))?;
            let settings = s.settings(virtual_id, effect_id).cloned().unwrap_or_default();
            Ok((effect_id.to_string(), settings))
        })
    }

    /// Preset match of the virtual's current settings against the cache
    ///
    /// An effect whose presets are not cached yet matches nothing.
    pub fn preset_status(&self, virtual_id: &str) -> Result<PresetStatus> {
        let (effect_id, settings) = self.working_settings(virtual_id)?;
        let collection = self.cached_presets(&effect_id).unwrap_or_default();
        Ok(presets::preset_status(&collection, &settings))
    }

    /// Merge a preset over the current settings (`{..current, ..preset}`)
    pub async fn load_preset(&self, virtual_id: &str, name: &str) -> Result<()> {
        let (effect_id, _) = self.working_settings(virtual_id)?;
        let collection = self.load_presets(&effect_id, false).await?;
        let preset = collection
            .user
            .get(name)
            .or_else(|| collection.built_in.get(name))
            .cloned()
            .ok_or_else(|| ControlError::UnknownPreset {
                effect_id: effect_id.clone(),
                name: name.to_string(),
            })?;

        let active = self.store.set_state(|s| {
            let settings = s.settings_mut(virtual_id, &effect_id);
            for (key, value) in preset.config {
                settings.insert(key, value);
            }
            s.is_active(virtual_id)
        });
        info!("Loaded preset '{}' on {}", name, virtual_id);

        if active {
            self.push_now(virtual_id).await?;
        }
        Ok(())
    }

    /// Save the current settings as a user preset; only allowed while dirty
    pub async fn save_preset(&self, virtual_id: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if !self.preset_status(virtual_id)?.can_save() {
            return Err(ControlError::PresetRule("Settings already match a saved preset"));
        }

        let (effect_id, settings) = self.working_settings(virtual_id)?;
        self.engine
            .save_preset(&effect_id, name, EffectConfig::new(effect_id.clone(), settings))
            .await
            .into_result("save_preset")
            .map_err(|e| self.report(e.into()))?;

        info!("Saved preset '{}' for {}", name, effect_id);
        self.refresh_presets(&effect_id).await;
        Ok(())
    }

    /// Delete the user preset the current settings match exactly
    ///
    /// Returns the deleted preset's name.
    pub async fn delete_preset(&self, virtual_id: &str) -> Result<String> {
        let status = self.preset_status(virtual_id)?;
        if !status.can_delete() {
            return Err(ControlError::PresetRule("Only a matching user preset can be deleted"));
        }
        let name = status.matched_name().unwrap_or_default().to_string();
        let (effect_id, _) = self.working_settings(virtual_id)?;

        self.engine
            .delete_preset(&effect_id, &name)
            .await
            .into_result("delete_preset")
            .map_err(|e| self.report(e.into()))?;

        info!("Deleted preset '{}' for {}", name, effect_id);
        self.refresh_presets(&effect_id).await;
        Ok(name)
    }

    async fn refresh_presets(&self, effect_id: &str) {
        self.presets.remove(effect_id);
        if let Err(e) = self.load_presets(effect_id, true).await {
            warn!("Failed to refetch presets for {}: {}", effect_id, e);
        }
    }

    /// Whether a debounced push is waiting for this virtual
    pub fn has_pending_push(&self, virtual_id: &str) -> bool {
        self.pushes.is_pending(virtual_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConsoleEngine;
    use crate::types::{EffectInfo, PhysicalDevice};
    use serde_json::json;

    const V: &str = "device_10.0.0.1";

    fn setup(debounce_ms: u64) -> (Arc<ConsoleEngine>, StateStore<AppState>, EffectReconciler) {
        let (engine, _rx) = ConsoleEngine::new("effects");
        let device = PhysicalDevice {
            id: "10.0.0.1".to_string(),
            name: "Desk".to_string(),
            pixel_count: 8,
        };
        engine.seed_device(device.clone());
        let engine = Arc::new(engine);

        let store = StateStore::new(AppState::default());
        store.set_state(|s| s.device_found(device));
        let reconciler = EffectReconciler::new(engine.clone(), store.clone(), Duration::from_millis(debounce_ms));
        (engine, store, reconciler)
    }

    #[tokio::test]
    async fn test_select_fetches_schema_once_and_materializes_defaults() {
        let (engine, store, reconciler) = setup(0);
        assert_eq!(reconciler.schema_state("fire"), SchemaState::NoSchema);

        reconciler.select_effect(V, "fire").await.unwrap();
        assert!(matches!(reconciler.schema_state("fire"), SchemaState::Ready(_)));
        assert_eq!(
            store.read(|s| s.settings(V, "fire").and_then(|m| m.get("cooling").cloned())),
            Some(json!(55.0))
        );

        reconciler.select_effect(V, "scan").await.unwrap();
        reconciler.select_effect(V, "fire").await.unwrap();
        assert_eq!(engine.call_count("get_effect_schema"), 2);
        assert_eq!(engine.call_count("start_effect"), 0);
    }

    #[tokio::test]
    async fn test_select_keeps_existing_settings() {
        let (_engine, store, reconciler) = setup(0);
        reconciler.select_effect(V, "fire").await.unwrap();
        reconciler.update_setting(V, "cooling", json!(80)).await.unwrap();
        reconciler.select_effect(V, "scan").await.unwrap();
        reconciler.select_effect(V, "fire").await.unwrap();
        assert_eq!(
            store.read(|s| s.settings(V, "fire").and_then(|m| m.get("cooling").cloned())),
            Some(json!(80))
        );
    }

    #[tokio::test]
    async fn test_select_on_active_virtual_restarts_with_config() {
        let (engine, store, reconciler) = setup(0);
        reconciler.select_effect(V, "scan").await.unwrap();
        reconciler.start_effect(V).await.unwrap();

        reconciler.select_effect(V, "bladepower").await.unwrap();
        let running = engine.running_effect(V).unwrap();
        assert_eq!(running.effect_id, "bladepower");
        assert_eq!(running.config.get("decay"), Some(&json!(0.7)));
        assert!(store.read(|s| s.is_active(V)));
    }

    #[tokio::test]
    async fn test_unknown_virtual_and_effect_rejected() {
        let (_engine, store, reconciler) = setup(0);
        store.set_state(|s| {
            s.available_effects = vec![EffectInfo {
                id: "fire".to_string(),
                name: "Fire".to_string(),
            }]
        });
        assert_eq!(
            reconciler.select_effect("ghost", "fire").await,
            Err(ControlError::UnknownVirtual("ghost".to_string()))
        );
        assert_eq!(
            reconciler.select_effect(V, "strobe").await,
            Err(ControlError::UnknownEffect("strobe".to_string()))
        );
    }

    #[tokio::test]
    async fn test_setting_change_debounced_whole_object() {
        tokio::time::pause();
        let (engine, _store, reconciler) = setup(300);
        reconciler.select_effect(V, "scan").await.unwrap();
        reconciler.start_effect(V).await.unwrap();

        for speed in [2, 3, 4] {
            reconciler.update_setting(V, "speed", json!(speed)).await.unwrap();
        }
        assert!(reconciler.has_pending_push(V));
        assert_eq!(engine.call_count("update_effect_settings"), 0);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(engine.call_count("update_effect_settings"), 1);
        let running = engine.running_effect(V).unwrap();
        assert_eq!(running.config.get("speed"), Some(&json!(4)));
        assert_eq!(running.config.get("width"), Some(&json!(10.0)));
    }

    #[tokio::test]
    async fn test_inactive_virtual_does_not_push() {
        let (engine, _store, reconciler) = setup(0);
        reconciler.select_effect(V, "scan").await.unwrap();
        reconciler.update_setting(V, "speed", json!(2)).await.unwrap();
        assert_eq!(engine.call_count("update_effect_settings"), 0);
        assert_eq!(
            reconciler.update_setting("other", "speed", json!(2)).await,
            Err(ControlError::NoEffectSelected("other".to_string()))
        );
    }

    #[tokio::test]
    async fn test_start_failure_keeps_inactive_and_sets_banner() {
        let (engine, store, reconciler) = setup(0);
        reconciler.select_effect(V, "scan").await.unwrap();
        engine.fail_command("start_effect", "device offline");

        let err = reconciler.start_effect(V).await.unwrap_err();
        assert_eq!(err.banner(), "device offline");
        assert!(!store.read(|s| s.is_active(V)));
        assert_eq!(store.read(|s| s.error.clone()), Some("device offline".to_string()));
    }

    #[tokio::test]
    async fn test_schema_fetch_failure_surfaces_engine_message() {
        let (engine, store, reconciler) = setup(0);
        engine.fail_command("get_effect_schema", "engine offline");

        let err = reconciler.select_effect(V, "fire").await.unwrap_err();
        assert_eq!(err.banner(), "engine offline");
        assert_eq!(store.read(|s| s.error.clone()), Some("engine offline".to_string()));
        assert_eq!(reconciler.schema_state("fire"), SchemaState::NoSchema);

        engine.clear_failure("get_effect_schema");
        reconciler.select_effect(V, "fire").await.unwrap();
        assert!(matches!(reconciler.schema_state("fire"), SchemaState::Ready(_)));
    }

    #[tokio::test]
    async fn test_toggle_flips_running_state() {
        let (engine, store, reconciler) = setup(0);
        assert!(matches!(
            reconciler.toggle_effect(V).await,
            Err(ControlError::NoEffectSelected(_))
        ));

        reconciler.select_effect(V, "scan").await.unwrap();
        reconciler.toggle_effect(V).await.unwrap();
        assert!(store.read(|s| s.is_active(V)));
        assert!(engine.running_effect(V).is_some());

        reconciler.toggle_effect(V).await.unwrap();
        assert!(!store.read(|s| s.is_active(V)));
        assert_eq!(engine.call_count("stop_effect"), 1);
    }

    #[tokio::test]
    async fn test_update_failure_keeps_optimistic_value() {
        let (engine, store, reconciler) = setup(0);
        reconciler.select_effect(V, "scan").await.unwrap();
        reconciler.start_effect(V).await.unwrap();
        engine.fail_command("update_effect_settings", "engine busy");

        assert!(reconciler.update_setting(V, "speed", json!(9)).await.is_err());
        assert_eq!(
            store.read(|s| s.settings(V, "scan").and_then(|m| m.get("speed").cloned())),
            Some(json!(9))
        );
    }

    #[tokio::test]
    async fn test_preset_load_merges_and_matches() {
        let (engine, _store, reconciler) = setup(0);
        reconciler.select_effect(V, "fire").await.unwrap();
        assert!(reconciler.preset_status(V).unwrap().is_dirty());

        reconciler.load_preset(V, "Soul Fire").await.unwrap();
        let status = reconciler.preset_status(V).unwrap();
        assert_eq!(status.matched_name(), Some("Soul Fire"));
        assert!(!status.can_delete());
        assert!(matches!(
            reconciler.save_preset(V, "Copy").await,
            Err(ControlError::PresetRule(_))
        ));
        assert_eq!(engine.call_count("update_effect_settings"), 0);
    }

    #[tokio::test]
    async fn test_save_then_delete_user_preset() {
        let (engine, _store, reconciler) = setup(0);
        reconciler.select_effect(V, "scan").await.unwrap();
        assert_eq!(
            reconciler.save_preset(V, "   ").await,
            Err(ValidationError::EmptyName.into())
        );

        reconciler.save_preset(V, " Slow ").await.unwrap();
        assert_eq!(engine.call_count("load_presets"), 2);
        let status = reconciler.preset_status(V).unwrap();
        assert_eq!(status.matched_name(), Some("Slow"));
        assert!(status.can_delete());

        assert_eq!(reconciler.delete_preset(V).await.unwrap(), "Slow");
        assert!(reconciler.preset_status(V).unwrap().is_dirty());
        assert!(reconciler.delete_preset(V).await.is_err());
    }
}
