//! End-to-end run of the control core against the console engine

use ledfx_control::codec::{decode, encode, Segment, SegmentKind};
use ledfx_control::bridge::BridgeHandle;
use ledfx_control::engine::ConsoleEngine;
use ledfx_control::types::{MatrixCell, PhysicalDevice};
use ledfx_control::{Controller, CoreOptions};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn core_with(devices: &[(&str, u32)], options: CoreOptions) -> (Arc<ConsoleEngine>, Controller, BridgeHandle) {
    let (engine, events) = ConsoleEngine::new("scenario");
    for (id, pixels) in devices {
        engine.seed_device(PhysicalDevice {
            id: id.to_string(),
            name: format!("Strip {}", id),
            pixel_count: *pixels,
        });
    }
    let engine = Arc::new(engine);
    let core = Controller::new(engine.clone(), options, None);
    let bridge = core.start(events);
    (engine, core, bridge)
}

#[test]
fn decode_mixed_matrix_into_segments() {
    let matrix = vec![
        Some(MatrixCell::new("A", 0)),
        Some(MatrixCell::new("A", 1)),
        None,
        Some(MatrixCell::new("B", 3)),
    ];
    let segments = decode(&matrix);
    let kinds: Vec<SegmentKind> = segments.iter().map(|s| s.kind().clone()).collect();
    assert_eq!(
        kinds,
        vec![
            SegmentKind::DeviceRange {
                device_id: "A".to_string(),
                start: 0,
                end: 1
            },
            SegmentKind::Gap { length: 1 },
            SegmentKind::DeviceRange {
                device_id: "B".to_string(),
                start: 3,
                end: 3
            },
        ]
    );
    assert_eq!(encode(&segments), matrix);

    let gaps = vec![Segment::gap(1).unwrap(), Segment::gap(1).unwrap(), Segment::gap(1).unwrap()];
    assert_eq!(decode(&encode(&gaps)).len(), 1);
}

#[tokio::test]
async fn select_effect_on_active_virtual_pushes_defaults() {
    let options = CoreOptions {
        settings_debounce: Duration::ZERO,
        ..CoreOptions::default()
    };
    let (engine, core, _bridge) = core_with(&[("10.0.0.1", 16)], options);
    core.bootstrap().await;
    let v1 = "device_10.0.0.1";

    core.effects().select_effect(v1, "scan").await.unwrap();
    core.effects().start_effect(v1).await.unwrap();
    let schema_calls = engine.call_count("get_effect_schema");

    core.effects().select_effect(v1, "bladepower").await.unwrap();
    assert_eq!(engine.call_count("get_effect_schema"), schema_calls + 1);

    let running = engine.running_effect(v1).unwrap();
    assert_eq!(running.effect_id, "bladepower");
    assert_eq!(running.config.get("decay"), Some(&json!(0.7)));
    assert_eq!(running.config.get("multiplier"), Some(&json!(0.5)));
}

#[tokio::test]
async fn critical_dsp_edit_waits_for_apply() {
    let (engine, core, _bridge) = core_with(&[("10.0.0.1", 16)], CoreOptions::default());
    core.bootstrap().await;

    core.dsp().set_field("smoothing_factor", json!(0.9)).await.unwrap();
    assert!(core.dsp().is_dirty());
    settle().await;
    assert_eq!(engine.call_count("update_dsp_settings"), 0);

    core.dsp().apply().await.unwrap();
    assert_eq!(engine.call_count("update_dsp_settings"), 1);
    assert_eq!(engine.call_count("restart_audio_capture"), 1);
    settle().await;
    assert!(!core.dsp().is_dirty());
    assert_eq!(
        core.store().read(|s| s.dsp_settings.as_ref().map(|d| d.smoothing_factor)),
        Some(0.9)
    );
}

#[tokio::test]
async fn shared_previews_hold_one_upstream_feed() {
    let (engine, core, _bridge) = core_with(&[("10.0.0.1", 4)], CoreOptions::default());
    core.bootstrap().await;
    let v1 = "device_10.0.0.1";

    let a = core.frames().subscribe(v1).await;
    let b = core.frames().subscribe(v1).await;
    let c = core.frames().subscribe(v1).await;
    assert_eq!(engine.call_count("subscribe_to_frames"), 1);

    a.release().await;
    b.release().await;
    assert_eq!(engine.call_count("unsubscribe_from_frames"), 0);
    assert_eq!(engine.frame_feeds(), vec!["10.0.0.1".to_string()]);

    c.release().await;
    assert_eq!(engine.call_count("unsubscribe_from_frames"), 1);
    assert!(engine.frame_feeds().is_empty());
}

#[tokio::test]
async fn preset_then_scene_round_trip() {
    let options = CoreOptions {
        settings_debounce: Duration::ZERO,
        ..CoreOptions::default()
    };
    let (engine, core, _bridge) = core_with(&[("10.0.0.1", 8), ("10.0.0.2", 8)], options);
    core.bootstrap().await;
    let (v1, v2) = ("device_10.0.0.1", "device_10.0.0.2");

    core.effects().select_effect(v1, "fire").await.unwrap();
    core.effects().load_preset(v1, "Classic Campfire").await.unwrap();
    core.effects().start_effect(v1).await.unwrap();
    core.effects().select_effect(v2, "scan").await.unwrap();
    core.effects().update_setting(v2, "speed", json!(4.5)).await.unwrap();
    core.effects().start_effect(v2).await.unwrap();
    assert!(core.effects().preset_status(v2).unwrap().is_dirty());

    let draft = core.scenes().draft().await;
    let scene = core.scenes().save(&draft, "Party").await.unwrap();
    settle().await;
    assert_eq!(core.store().read(|s| s.scenes.len()), 1);

    core.effects().stop_effect(v1).await.unwrap();
    core.effects().stop_effect(v2).await.unwrap();
    core.scenes().activate(&scene.id).await.unwrap();
    settle().await;

    let state = core.store().get_state();
    assert_eq!(state.active_scene_id.as_deref(), Some(scene.id.as_str()));
    assert_eq!(state.active_virtual_ids(), vec![v1.to_string(), v2.to_string()]);
    assert_eq!(
        state.settings(v2, "scan").and_then(|m| m.get("speed").cloned()),
        Some(json!(4.5))
    );
    assert_eq!(engine.running_effect(v1).map(|c| c.effect_id), Some("fire".to_string()));
}
