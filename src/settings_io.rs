//! Settings import and export
//!
//! Three document shapes are recognized, tried in this order:
//!
//! - full: `{ "engine_state": {...}, "frontend_state": {...} }`
//! - engine: `{ "devices": ..., "virtuals": ..., ... }` as produced by the engine
//! - frontend: `{ "selectedEffects": {...}, "effectSettings": {...} }`
//!
//! Anything else is rejected as an unrecognized format. Engine state is
//! handed to the engine verbatim and followed by a reload; frontend state is
//! applied to the store.

use crate::engine::EngineCommands;
use crate::error::{ControlError, Result, ValidationError};
use crate::store::{AppState, StateStore};
use crate::types::{DspSettings, SettingsMap};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Local effect state as stored in settings documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontendState {
    #[serde(rename = "selectedEffects")]
    pub selected_effects: HashMap<String, String>,
    #[serde(rename = "effectSettings")]
    pub effect_settings: HashMap<String, HashMap<String, SettingsMap>>,
    #[serde(rename = "activeEffects", default, skip_serializing_if = "Option::is_none")]
    pub active_effects: Option<HashMap<String, bool>>,
}

impl FrontendState {
    pub fn capture(state: &AppState) -> Self {
        Self {
            selected_effects: state.selected_effects.clone(),
            effect_settings: state.effect_settings.clone(),
            active_effects: Some(state.active_effects.clone()),
        }
    }

    /// Replace the store's effect maps; active flags only when present
    pub fn apply(self, state: &mut AppState) {
        state.selected_effects = self.selected_effects;
        state.effect_settings = self.effect_settings;
        if let Some(active) = self.active_effects {
            state.active_effects = active;
        }
    }
}

/// Engine state, kept as the engine wrote it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDocument {
    pub devices: Value,
    pub virtuals: Value,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullDocument {
    pub engine_state: Value,
    pub frontend_state: FrontendState,
}

/// A recognized settings document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingsDocument {
    Full(FullDocument),
    Engine(EngineDocument),
    Frontend(FrontendState),
}

impl SettingsDocument {
    /// Parse and classify a document
    pub fn parse(text: &str) -> std::result::Result<Self, ValidationError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ValidationError::MalformedJson(e.to_string()))?;
        serde_json::from_value(value).map_err(|_| ValidationError::UnrecognizedFormat)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SettingsDocument::Full(_) => "Full Configuration",
            SettingsDocument::Engine(_) => "Engine Settings",
            SettingsDocument::Frontend(_) => "UI Settings",
        }
    }
}

/// Import/export against the engine and the local store
pub struct SettingsIo {
    engine: Arc<dyn EngineCommands>,
    store: StateStore<AppState>,
}

impl SettingsIo {
    pub fn new(engine: Arc<dyn EngineCommands>, store: StateStore<AppState>) -> Self {
        Self { engine, store }
    }

    fn report(&self, err: ControlError) -> ControlError {
        warn!("{}", err);
        let banner = err.banner();
        self.store.set_state(|s| s.set_error(banner));
        err
    }

    /// Build an export document with the requested parts
    pub async fn export(&self, include_engine: bool, include_frontend: bool) -> Result<String> {
        self.store.set_state(|s| s.clear_error());
        let mut document = Map::new();

        if include_engine {
            let raw = self
                .engine
                .export_settings()
                .await
                .into_result("export_settings")
                .map_err(|e| self.report(e.into()))?;
            let engine_state: Value = serde_json::from_str(&raw)
                .map_err(|e| self.report(ValidationError::MalformedJson(e.to_string()).into()))?;
            document.insert("engine_state".to_string(), engine_state);
        }
        if include_frontend {
            let frontend = self.store.read(FrontendState::capture);
            let frontend = serde_json::to_value(frontend)
                .map_err(|e| self.report(ValidationError::MalformedJson(e.to_string()).into()))?;
            document.insert("frontend_state".to_string(), frontend);
        }

        serde_json::to_string_pretty(&Value::Object(document))
            .map_err(|e| self.report(ValidationError::MalformedJson(e.to_string()).into()))
    }

    /// Import a document, returning its kind
    pub async fn import(&self, text: &str) -> Result<&'static str> {
        self.store.set_state(|s| s.clear_error());
        let document = SettingsDocument::parse(text).map_err(|e| self.report(e.into()))?;
        let label = document.label();
        info!("Importing {}", label);

        match document {
            SettingsDocument::Full(full) => {
                self.import_engine(&full.engine_state).await?;
                self.store.set_state(|s| full.frontend_state.apply(s));
            }
            SettingsDocument::Engine(engine) => {
                let value = serde_json::to_value(engine)
                    .map_err(|e| self.report(ValidationError::MalformedJson(e.to_string()).into()))?;
                self.import_engine(&value).await?;
            }
            SettingsDocument::Frontend(frontend) => {
                self.store.set_state(|s| frontend.apply(s));
            }
        }
        Ok(label)
    }

    async fn import_engine(&self, engine_state: &Value) -> Result<()> {
        self.engine
            .import_settings(engine_state.to_string())
            .await
            .into_result("import_settings")
            .map_err(|e| self.report(e.into()))?;
        self.engine
            .trigger_reload()
            .await
            .into_result("trigger_reload")
            .map_err(|e| self.report(e.into()))
    }

    /// Reset the engine to no devices and default DSP settings
    pub async fn clear_all(&self) -> Result<()> {
        self.store.set_state(|s| s.clear_error());
        let empty = json!({
            "devices": [],
            "virtuals": [],
            "dsp_settings": DspSettings::default(),
        });
        self.import_engine(&empty).await?;
        self.store.set_state(|s| {
            s.selected_effects.clear();
            s.effect_settings.clear();
        });
        info!("Cleared all settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConsoleEngine;
    use crate::types::PhysicalDevice;

    #[test]
    fn test_document_shapes_in_priority_order() {
        let full = r#"{"engine_state": {"devices": [], "virtuals": []},
                       "frontend_state": {"selectedEffects": {}, "effectSettings": {}},
                       "devices": []}"#;
        assert!(matches!(SettingsDocument::parse(full), Ok(SettingsDocument::Full(_))));

        let engine = r#"{"devices": [], "virtuals": [], "scenes": []}"#;
        match SettingsDocument::parse(engine) {
            Ok(SettingsDocument::Engine(doc)) => assert!(doc.rest.contains_key("scenes")),
            other => panic!("expected engine document, got {:?}", other),
        }

        let frontend = r#"{"selectedEffects": {"v1": "fire"}, "effectSettings": {}}"#;
        assert!(matches!(
            SettingsDocument::parse(frontend),
            Ok(SettingsDocument::Frontend(_))
        ));
    }

    #[test]
    fn test_unrecognized_and_malformed() {
        assert_eq!(
            SettingsDocument::parse(r#"{"hello": 1}"#),
            Err(ValidationError::UnrecognizedFormat)
        );
        assert_eq!(
            SettingsDocument::parse(r#"{"engine_state": {}}"#),
            Err(ValidationError::UnrecognizedFormat)
        );
        assert!(matches!(
            SettingsDocument::parse("{not json"),
            Err(ValidationError::MalformedJson(_))
        ));
    }

    fn setup() -> (Arc<ConsoleEngine>, StateStore<AppState>, SettingsIo) {
        let (engine, _rx) = ConsoleEngine::new("io");
        engine.seed_device(PhysicalDevice {
            id: "10.0.0.7".to_string(),
            name: "Porch".to_string(),
            pixel_count: 12,
        });
        let engine = Arc::new(engine);
        let store = StateStore::new(AppState::default());
        let io = SettingsIo::new(engine.clone(), store.clone());
        (engine, store, io)
    }

    #[tokio::test]
    async fn test_full_export_imports_back() {
        let (engine, store, io) = setup();
        store.set_state(|s| {
            s.selected_effects.insert("device_10.0.0.7".to_string(), "scan".to_string());
        });

        let exported = io.export(true, true).await.unwrap();
        store.set_state(|s| s.selected_effects.clear());

        assert_eq!(io.import(&exported).await.unwrap(), "Full Configuration");
        assert_eq!(engine.call_count("import_settings"), 1);
        assert_eq!(engine.call_count("trigger_reload"), 1);
        assert_eq!(
            store.read(|s| s.selected_effect("device_10.0.0.7").map(str::to_string)),
            Some("scan".to_string())
        );
    }

    #[tokio::test]
    async fn test_frontend_import_stays_local() {
        let (engine, store, io) = setup();
        let text = r#"{"selectedEffects": {"v1": "fire"}, "effectSettings": {"v1": {"fire": {"cooling": 70}}}}"#;
        io.import(text).await.unwrap();
        assert_eq!(engine.call_count("import_settings"), 0);
        assert_eq!(store.read(|s| s.selected_effect("v1").map(str::to_string)), Some("fire".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_import_sets_banner() {
        let (engine, store, io) = setup();
        assert!(io.import("[1, 2, 3]").await.is_err());
        assert_eq!(
            store.read(|s| s.error.clone()),
            Some("Unrecognized JSON file format".to_string())
        );

        engine.fail_command("import_settings", "bad document");
        let err = io.import(r#"{"devices": [], "virtuals": []}"#).await.unwrap_err();
        assert_eq!(err.banner(), "bad document");
        assert_eq!(engine.call_count("trigger_reload"), 0);
    }

    #[tokio::test]
    async fn test_clear_all_resets_engine_and_effects() {
        let (engine, store, io) = setup();
        store.set_state(|s| {
            s.selected_effects.insert("v1".to_string(), "fire".to_string());
        });
        io.clear_all().await.unwrap();
        assert!(engine.get_devices().await.into_result("get_devices").unwrap().is_empty());
        assert!(store.read(|s| s.selected_effects.is_empty()));
    }
}
