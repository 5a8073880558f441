//! Audio analysis (DSP) settings editor
//!
//! DSP settings are engine-wide. Keys are partitioned into live keys, pushed
//! through a debounced fire-and-forget update, and critical keys, which only
//! change a pending draft until [`DspEditor::apply`] commits them and
//! restarts audio capture.
//!
//! Apply is two steps with no rollback: if the restart fails after the
//! settings were committed, the engine runs the new settings on the old
//! capture pipeline until the next restart.

use super::presets::values_equal;
use crate::debounce::Debouncer;
use crate::engine::EngineCommands;
use crate::error::{ControlError, Result, ValidationError};
use crate::prefs::PrefsHandle;
use crate::store::{AppState, StateStore};
use crate::types::{DspSettings, SettingsMap};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keys applied live without restarting audio capture
pub const LIVE_KEYS: &[&str] = &["agc_attack", "agc_decay", "audio_delay_ms"];

const PUSH_KEY: &str = "dsp";

pub fn is_live_key(key: &str) -> bool {
    LIVE_KEYS.contains(&key)
}

fn to_map(settings: &DspSettings) -> SettingsMap {
    match serde_json::to_value(settings) {
        Ok(Value::Object(map)) => map,
        _ => SettingsMap::new(),
    }
}

/// Top-level keys whose values differ structurally
fn diff_keys(committed: &DspSettings, pending: &DspSettings) -> Vec<String> {
    let committed = to_map(committed);
    let pending = to_map(pending);
    pending
        .iter()
        .filter(|(key, value)| !committed.get(*key).is_some_and(|c| values_equal(c, value)))
        .map(|(key, _)| key.clone())
        .collect()
}

fn with_field(settings: &DspSettings, key: &str, value: Value) -> std::result::Result<DspSettings, ValidationError> {
    let mut map = to_map(settings);
    if !map.contains_key(key) {
        return Err(ValidationError::InvalidSetting {
            key: key.to_string(),
            reason: "unknown DSP setting".to_string(),
        });
    }
    map.insert(key.to_string(), value);
    serde_json::from_value(Value::Object(map)).map_err(|e| ValidationError::InvalidSetting {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Copy `keys` from `source` over `settings`, skipping values that no longer fit
fn replay<'a>(mut settings: DspSettings, source: &SettingsMap, keys: impl IntoIterator<Item = &'a str>) -> DspSettings {
    for key in keys {
        if let Some(value) = source.get(key) {
            match with_field(&settings, key, value.clone()) {
                Ok(next) => settings = next,
                Err(e) => debug!("Dropping draft field: {}", e),
            }
        }
    }
    settings
}

#[derive(Debug, Default)]
struct Draft {
    committed: Option<DspSettings>,
    pending: Option<DspSettings>,
}

/// Committed/pending DSP settings with dirty tracking
pub struct DspEditor {
    engine: Arc<dyn EngineCommands>,
    store: StateStore<AppState>,
    draft: Arc<Mutex<Draft>>,
    pushes: Debouncer,
    prefs: Option<PrefsHandle>,
}

impl DspEditor {
    pub fn new(
        engine: Arc<dyn EngineCommands>,
        store: StateStore<AppState>,
        live_debounce: Duration,
        prefs: Option<PrefsHandle>,
    ) -> Self {
        Self {
            engine,
            store,
            draft: Arc::new(Mutex::new(Draft::default())),
            pushes: Debouncer::new(live_debounce),
            prefs,
        }
    }

    pub fn committed(&self) -> Option<DspSettings> {
        self.draft.lock().committed.clone()
    }

    pub fn pending(&self) -> Option<DspSettings> {
        self.draft.lock().pending.clone()
    }

    /// Critical keys whose pending value differs from the committed one
    pub fn dirty_fields(&self) -> Vec<String> {
        let draft = self.draft.lock();
        match (&draft.committed, &draft.pending) {
            (Some(committed), Some(pending)) => diff_keys(committed, pending),
            _ => Vec::new(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_fields().is_empty()
    }

    /// Take authoritative settings from the engine
    ///
    /// Pending critical edits are replayed on top so an open editor session
    /// keeps its draft. Live edits still waiting for their push are replayed
    /// too, so an older echo cannot replace the value about to be sent.
    pub async fn on_settings_changed(&self, settings: DspSettings) {
        let dirty = self.dirty_fields();
        let unsent = self.pushes.is_pending(PUSH_KEY);
        let committed = {
            let mut draft = self.draft.lock();
            let mut committed = settings;
            if unsent {
                if let Some(old_committed) = &draft.committed {
                    committed = replay(committed, &to_map(old_committed), LIVE_KEYS.iter().copied());
                }
            }
            let mut pending = committed.clone();
            if let Some(old_pending) = &draft.pending {
                pending = replay(pending, &to_map(old_pending), dirty.iter().map(String::as_str));
            }
            draft.committed = Some(committed.clone());
            draft.pending = Some(pending);
            committed
        };
        self.store.set_state(|s| s.dsp_settings = Some(committed));
        self.persist_draft().await;
    }

    /// Restore a persisted draft over the committed settings
    pub async fn restore_draft(&self, draft: DspSettings) {
        {
            let mut state = self.draft.lock();
            if state.committed.is_none() {
                state.committed = Some(draft.clone());
            }
            state.pending = Some(draft);
        }
        info!("Restored DSP draft ({} dirty fields)", self.dirty_fields().len());
    }

    /// Edit one field
    ///
    /// Live keys update both copies and schedule a debounced push of the
    /// committed settings. Critical keys only touch the pending copy.
    pub async fn set_field(&self, key: &str, value: Value) -> Result<()> {
        let live = is_live_key(key);
        {
            let mut draft = self.draft.lock();
            let (Some(committed), Some(pending)) = (&draft.committed, &draft.pending) else {
                return Err(ValidationError::InvalidSetting {
                    key: key.to_string(),
                    reason: "DSP settings not loaded yet".to_string(),
                }
                .into());
            };

            let next_pending = with_field(pending, key, value.clone())?;
            if live {
                let next_committed = with_field(committed, key, value)?;
                draft.committed = Some(next_committed);
            }
            draft.pending = Some(next_pending);
        }

        if live {
            debug!("Live DSP change: {}", key);
            self.schedule_push();
        } else {
            debug!("Critical DSP change held until apply: {}", key);
            self.persist_draft().await;
        }
        Ok(())
    }

    fn schedule_push(&self) {
        let engine = Arc::clone(&self.engine);
        let store = self.store.clone();
        let draft = Arc::clone(&self.draft);
        self.pushes.schedule(PUSH_KEY, async move {
            let Some(settings) = draft.lock().committed.clone() else {
                return;
            };
            if let Err(e) = engine
                .update_dsp_settings(settings)
                .await
                .into_result("update_dsp_settings")
            {
                warn!("{}", e);
                store.set_state(|s| s.set_error(e.message.clone()));
            }
        });
    }

    /// Commit the pending settings, then restart audio capture
    pub async fn apply(&self) -> Result<()> {
        let Some(pending) = self.pending() else {
            return Ok(());
        };
        self.pushes.cancel(PUSH_KEY);

        if let Err(e) = self
            .engine
            .update_dsp_settings(pending.clone())
            .await
            .into_result("update_dsp_settings")
        {
            return Err(self.report(e.into()));
        }
        self.draft.lock().committed = Some(pending.clone());
        self.store.set_state(|s| s.dsp_settings = Some(pending));
        self.persist_draft().await;
        info!("DSP settings committed, restarting audio capture");

        self.engine
            .restart_audio_capture()
            .await
            .into_result("restart_audio_capture")
            .map_err(|e| self.report(e.into()))
    }

    /// Drop pending critical edits
    pub async fn discard(&self) {
        {
            let mut draft = self.draft.lock();
            draft.pending = draft.committed.clone();
        }
        self.persist_draft().await;
    }

    fn report(&self, err: ControlError) -> ControlError {
        warn!("{}", err);
        let banner = err.banner();
        self.store.set_state(|s| s.set_error(banner));
        err
    }

    async fn persist_draft(&self) {
        let Some(prefs) = &self.prefs else {
            return;
        };
        let draft = if self.is_dirty() { self.pending() } else { None };
        if let Err(e) = prefs.update(|p| p.dsp_draft = draft).await {
            warn!("Failed to persist DSP draft: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConsoleEngine;
    use crate::types::{BladePlusParams, FilterbankType};
    use serde_json::json;

    fn setup() -> (Arc<ConsoleEngine>, StateStore<AppState>, DspEditor) {
        let (engine, _rx) = ConsoleEngine::new("dsp");
        let engine = Arc::new(engine);
        let store = StateStore::new(AppState::default());
        let editor = DspEditor::new(engine.clone(), store.clone(), Duration::from_millis(300), None);
        (engine, store, editor)
    }

    #[tokio::test]
    async fn test_critical_change_waits_for_apply() {
        let (engine, store, editor) = setup();
        editor.on_settings_changed(DspSettings::default()).await;

        editor.set_field("smoothing_factor", json!(0.8)).await.unwrap();
        assert!(editor.is_dirty());
        assert_eq!(editor.dirty_fields(), vec!["smoothing_factor".to_string()]);
        assert_eq!(engine.call_count("update_dsp_settings"), 0);

        editor.apply().await.unwrap();
        assert!(!editor.is_dirty());
        assert_eq!(engine.call_count("update_dsp_settings"), 1);
        assert_eq!(engine.call_count("restart_audio_capture"), 1);
        assert_eq!(store.read(|s| s.dsp_settings.as_ref().map(|d| d.smoothing_factor)), Some(0.8));
    }

    #[tokio::test]
    async fn test_live_change_debounced_and_not_dirty() {
        tokio::time::pause();
        let (engine, _store, editor) = setup();
        editor.on_settings_changed(DspSettings::default()).await;

        editor.set_field("agc_attack", json!(0.02)).await.unwrap();
        editor.set_field("agc_attack", json!(0.03)).await.unwrap();
        assert!(!editor.is_dirty());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(engine.call_count("update_dsp_settings"), 1);
        assert_eq!(engine.call_count("restart_audio_capture"), 0);
    }

    #[tokio::test]
    async fn test_live_push_excludes_pending_critical_edits() {
        tokio::time::pause();
        let (engine, _store, editor) = setup();
        editor.on_settings_changed(DspSettings::default()).await;

        editor.set_field("fft_size", json!(4096)).await.unwrap();
        editor.set_field("agc_decay", json!(0.2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        let pushed = engine.get_dsp_settings().await.into_result("get_dsp_settings").unwrap();
        assert_eq!(pushed.agc_decay, 0.2);
        assert_eq!(pushed.fft_size, 1024);
        assert_eq!(editor.dirty_fields(), vec!["fft_size".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_echo_does_not_undo_unsent_live_edit() {
        tokio::time::pause();
        let (engine, store, editor) = setup();
        editor.on_settings_changed(DspSettings::default()).await;

        editor.set_field("agc_attack", json!(0.03)).await.unwrap();
        editor
            .on_settings_changed(DspSettings {
                agc_attack: 0.02,
                num_bands: 48,
                ..DspSettings::default()
            })
            .await;
        assert_eq!(editor.committed().map(|d| d.agc_attack), Some(0.03));
        assert_eq!(store.read(|s| s.dsp_settings.as_ref().map(|d| d.num_bands)), Some(48));

        tokio::time::sleep(Duration::from_millis(350)).await;
        let pushed = engine.get_dsp_settings().await.into_result("get_dsp_settings").unwrap();
        assert_eq!(pushed.agc_attack, 0.03);
        assert_eq!(pushed.num_bands, 48);

        // Once the push has gone out the engine value wins again
        editor
            .on_settings_changed(DspSettings {
                agc_attack: 0.05,
                ..DspSettings::default()
            })
            .await;
        assert_eq!(editor.committed().map(|d| d.agc_attack), Some(0.05));
    }

    #[tokio::test]
    async fn test_nested_filterbank_change_is_dirty() {
        let (_engine, _store, editor) = setup();
        let base = DspSettings {
            filterbank_type: FilterbankType::BladePlus(BladePlusParams {
                log_base: 2.0,
                multiplier: 1.0,
                divisor: 700.0,
            }),
            ..DspSettings::default()
        };
        editor.on_settings_changed(base).await;
        editor
            .set_field(
                "filterbank_type",
                json!({"BladePlus": {"log_base": 2.0, "multiplier": 1.0, "divisor": 700.0}}),
            )
            .await
            .unwrap();
        assert!(!editor.is_dirty());

        editor
            .set_field(
                "filterbank_type",
                json!({"BladePlus": {"log_base": 2.0, "multiplier": 1.5, "divisor": 700.0}}),
            )
            .await
            .unwrap();
        assert_eq!(editor.dirty_fields(), vec!["filterbank_type".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_fields_rejected() {
        let (_engine, _store, editor) = setup();
        assert!(editor.set_field("fft_size", json!(512)).await.is_err());

        editor.on_settings_changed(DspSettings::default()).await;
        assert!(matches!(
            editor.set_field("warp_factor", json!(9)).await,
            Err(ControlError::Validation(ValidationError::InvalidSetting { .. }))
        ));
        assert!(editor.set_field("fft_size", json!("big")).await.is_err());
        assert!(!editor.is_dirty());
    }

    #[tokio::test]
    async fn test_restart_failure_leaves_settings_committed() {
        let (engine, store, editor) = setup();
        editor.on_settings_changed(DspSettings::default()).await;
        editor.set_field("num_bands", json!(32)).await.unwrap();
        engine.fail_command("restart_audio_capture", "no input device");

        let err = editor.apply().await.unwrap_err();
        assert_eq!(err.banner(), "no input device");
        assert_eq!(editor.committed().map(|d| d.num_bands), Some(32));
        assert!(!editor.is_dirty());
        assert_eq!(store.read(|s| s.error.clone()), Some("no input device".to_string()));
    }

    #[tokio::test]
    async fn test_engine_event_rebases_draft() {
        let (_engine, _store, editor) = setup();
        editor.on_settings_changed(DspSettings::default()).await;
        editor.set_field("min_freq", json!(40.0)).await.unwrap();

        let from_engine = DspSettings {
            agc_decay: 0.5,
            ..DspSettings::default()
        };
        editor.on_settings_changed(from_engine).await;

        let pending = editor.pending().unwrap();
        assert_eq!(pending.agc_decay, 0.5);
        assert_eq!(pending.min_freq, 40.0);
        assert_eq!(editor.dirty_fields(), vec!["min_freq".to_string()]);

        editor.discard().await;
        assert!(!editor.is_dirty());
    }
}
