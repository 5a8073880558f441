//! Built-in effects served by the console engine

use crate::types::{Control, EffectConfig, EffectInfo, EffectSchema, EffectSetting, SettingsMap};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const EFFECTS: &[(&str, &str)] = &[
    ("bladepower", "Blade Power"),
    ("fire", "Fire"),
    ("scan", "Scan"),
];

pub(crate) fn available_effects() -> Vec<EffectInfo> {
    EFFECTS
        .iter()
        .map(|(id, name)| EffectInfo {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect()
}

pub(crate) fn is_known(effect_id: &str) -> bool {
    EFFECTS.iter().any(|(id, _)| *id == effect_id)
}

fn setting(id: &str, name: &str, description: &str, control: Control, default_value: Value) -> EffectSetting {
    EffectSetting {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        control,
        default_value,
    }
}

fn slider(min: f64, max: f64, step: f64) -> Control {
    Control::Slider { min, max, step }
}

fn base_schema() -> EffectSchema {
    vec![
        setting("mirror", "Mirror", "Mirror the effect around the center", Control::Checkbox, json!(false)),
        setting("flip", "Flip", "Reverse the effect direction", Control::Checkbox, json!(false)),
        setting("blur", "Blur", "Amount of blur applied to the output", slider(0.0, 10.0, 0.1), json!(0.0)),
        setting(
            "background_color",
            "Background Color",
            "Color shown behind the effect",
            Control::ColorPicker,
            json!("#000000"),
        ),
    ]
}

pub(crate) fn schema(effect_id: &str) -> Option<EffectSchema> {
    let mut schema = base_schema();
    let extra = match effect_id {
        "bladepower" => vec![
            setting("decay", "Decay", "Rate of color decay", slider(0.0, 1.0, 0.01), json!(0.7)),
            setting(
                "multiplier",
                "Multiplier",
                "Make the reactive bar bigger/smaller",
                slider(0.0, 1.0, 0.01),
                json!(0.5),
            ),
            setting(
                "frequency_range",
                "Frequency Range",
                "Frequency range for the beat detection",
                Control::Select {
                    options: vec!["Lows (beat+bass)".to_string(), "Mids".to_string(), "High".to_string()],
                },
                json!("Lows (beat+bass)"),
            ),
            setting(
                "gradient",
                "Gradient",
                "Color gradient for the effect",
                Control::ColorPicker,
                json!("linear-gradient(90deg, #ff0000 0%, #0000ff 100%)"),
            ),
        ],
        "fire" => vec![
            setting("cooling", "Cooling", "How fast the flames cool down", slider(20.0, 100.0, 1.0), json!(55.0)),
            setting("sparking", "Sparking", "Chance of new sparks", slider(50.0, 200.0, 1.0), json!(120.0)),
            setting(
                "gradient",
                "Gradient",
                "Flame colors",
                Control::ColorPicker,
                json!("linear-gradient(90deg, #000000 0%, #D43300 30%, #FF8000 70%, #FFFF00 100%)"),
            ),
        ],
        "scan" => vec![
            setting("speed", "Speed", "Scan speed", slider(0.1, 10.0, 0.1), json!(1.0)),
            setting("width", "Width", "Width of the scanning bar", slider(1.0, 100.0, 1.0), json!(10.0)),
            setting(
                "gradient",
                "Gradient",
                "Color of the scanning bar",
                Control::ColorPicker,
                json!("linear-gradient(90deg, #ff0000 0%, #0000ff 100%)"),
            ),
        ],
        _ => return None,
    };
    schema.extend(extra);
    Some(schema)
}

fn preset(effect_id: &str, values: Value) -> EffectConfig {
    let mut config: SettingsMap = json!({
        "mirror": false,
        "flip": false,
        "blur": 1.0,
        "background_color": "#000000",
    })
    .as_object()
    .cloned()
    .unwrap_or_default();
    if let Value::Object(values) = values {
        config.extend(values);
    }
    EffectConfig::new(effect_id, config)
}

pub(crate) fn built_in_presets(effect_id: &str) -> BTreeMap<String, EffectConfig> {
    let entries: Vec<(&str, Value)> = match effect_id {
        "bladepower" => vec![
            (
                "Ocean Breeze",
                json!({"decay": 0.8, "multiplier": 0.6, "frequency_range": "Lows (beat+bass)",
                       "gradient": "linear-gradient(90deg, #00c6ff 0%, #0072ff 100%)"}),
            ),
            (
                "Sunset",
                json!({"decay": 0.75, "multiplier": 0.5, "frequency_range": "Mids", "mirror": true, "blur": 0.0,
                       "gradient": "linear-gradient(90deg, #ff4e50 0%, #f9d423 100%)"}),
            ),
        ],
        "fire" => vec![
            (
                "Classic Campfire",
                json!({"cooling": 45.0, "sparking": 60.0, "blur": 1.5,
                       "gradient": "linear-gradient(90deg, #000000 0%, #D43300 30%, #FF8000 70%, #FFFF00 100%)"}),
            ),
            (
                "Soul Fire",
                json!({"cooling": 60.0, "sparking": 40.0, "blur": 2.0,
                       "gradient": "linear-gradient(90deg, #000000 0%, #00FFFF 50%, #FFFFFF 100%)"}),
            ),
        ],
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .map(|(name, values)| (name.to_string(), preset(effect_id, values)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::default_settings;

    #[test]
    fn test_every_listed_effect_has_a_schema() {
        for info in available_effects() {
            let schema = schema(&info.id).unwrap();
            assert!(schema.iter().any(|s| s.id == "mirror"));
        }
        assert!(schema("nope").is_none());
    }

    #[test]
    fn test_presets_cover_schema_keys() {
        let keys: Vec<String> = default_settings(&schema("fire").unwrap()).keys().cloned().collect();
        for (_, preset) in built_in_presets("fire") {
            for key in &keys {
                assert!(preset.config.contains_key(key), "missing {}", key);
            }
        }
        assert!(built_in_presets("scan").is_empty());
    }
}
