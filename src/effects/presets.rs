//! Preset matching
//!
//! A (virtual, effect) pair is "clean" when its working settings equal some
//! cached preset exactly and "dirty" otherwise. User presets are searched
//! before built-in ones, each in name order; the first match wins.

use crate::types::{PresetCollection, SettingsMap};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetOrigin {
    User,
    BuiltIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetMatch {
    pub name: String,
    pub origin: PresetOrigin,
}

/// Preset state of the current settings of one (virtual, effect) pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetStatus {
    pub matched: Option<PresetMatch>,
}

impl PresetStatus {
    pub fn is_dirty(&self) -> bool {
        self.matched.is_none()
    }

    pub fn matched_name(&self) -> Option<&str> {
        self.matched.as_ref().map(|m| m.name.as_str())
    }

    /// Saving is only offered while dirty
    pub fn can_save(&self) -> bool {
        self.is_dirty()
    }

    /// Only an exactly matching user preset may be deleted
    pub fn can_delete(&self) -> bool {
        matches!(
            self.matched,
            Some(PresetMatch {
                origin: PresetOrigin::User,
                ..
            })
        )
    }
}

/// Deep structural equality on JSON values
///
/// Objects compare by key set and per-key value, arrays element-wise, and
/// numbers by value so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => settings_equal(x, y),
        _ => a == b,
    }
}

pub fn settings_equal(a: &SettingsMap, b: &SettingsMap) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, value)| b.get(key).is_some_and(|other| values_equal(value, other)))
}

/// First preset whose config equals `settings`
pub fn find_matching_preset(collection: &PresetCollection, settings: &SettingsMap) -> Option<PresetMatch> {
    let user = collection.user.iter().map(|entry| (entry, PresetOrigin::User));
    let built_in = collection.built_in.iter().map(|entry| (entry, PresetOrigin::BuiltIn));

    user.chain(built_in)
        .find(|((_, preset), _)| settings_equal(&preset.config, settings))
        .map(|((name, _), origin)| PresetMatch {
            name: name.clone(),
            origin,
        })
}

pub fn preset_status(collection: &PresetCollection, settings: &SettingsMap) -> PresetStatus {
    PresetStatus {
        matched: find_matching_preset(collection, settings),
    }
}
