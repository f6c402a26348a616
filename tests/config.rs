use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use blink_processor::config::BlinkProcessorConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BLINK_CONFIG",
        "BLINK_UAV_NAME",
        "BLINK_PROCESS_RATE",
        "BLINK_FREQUENCIES",
        "BLINK_RETURN_FREQUENCIES",
        "BLINK_INVERTED_POINTS",
        "BLINK_PUBLISH_VISUALIZATION",
        "BLINK_POINTS_SEEN_TOPICS",
        "BLINK_BLINKERS_SEEN_TOPICS",
        "BLINK_FRAMERATE_TOPICS",
        "BLINK_CAMERA_TOPICS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "uav_name": "uav7",
        "topics": {
            "points_seen": ["uav7/left/points", "uav7/right/points"],
            "blinkers_seen": ["uav7/left/blinkers", "uav7/right/blinkers"],
            "estimated_framerate": ["uav7/left/fps", "uav7/right/fps"],
            "camera": ["uav7/left/image", "uav7/right/image"],
            "visualization": "uav7/blink_vis"
        },
        "frequencies": [5.0, 12.0],
        "process_rate": 15.0,
        "legacy": true,
        "legacy_delay_secs": 0.5,
        "tracker": {
            "accumulator_length": 30,
            "image_width": 640,
            "image_height": 480
        },
        "visualization": {
            "enabled": true,
            "rate": 2.0,
            "rainbow": true
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("BLINK_CONFIG", file.path());
    std::env::set_var("BLINK_FREQUENCIES", "6, 10, 15, 30");
    std::env::set_var("BLINK_RETURN_FREQUENCIES", "true");
    std::env::set_var("BLINK_PUBLISH_VISUALIZATION", "0");

    let cfg = BlinkProcessorConfig::load().expect("load config");

    assert_eq!(cfg.uav_name, "uav7");
    assert_eq!(cfg.channel_count(), 2);
    assert_eq!(cfg.topics.camera[1], "uav7/right/image");
    assert_eq!(cfg.topics.visualization, "uav7/blink_vis");
    assert_eq!(cfg.frequencies, vec![6.0, 10.0, 15.0, 30.0]);
    assert_eq!(cfg.process_rate, 15.0);
    assert!(cfg.return_frequencies);
    assert_eq!(cfg.legacy_delay, Some(Duration::from_millis(500)));
    assert_eq!(cfg.tracker.accumulator_length, 30);
    assert_eq!(cfg.tracker.image_size, (640, 480));
    assert_eq!(cfg.tracker.pitch_steps, 16);
    assert!(!cfg.visualization.enabled);
    assert!(cfg.visualization.rainbow);
    assert_eq!(cfg.visualization.rate, 2.0);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        process_rate = 20.0
        inverted_points = true

        [topics]
        points_seen = ["cam/points"]
        blinkers_seen = ["cam/blinkers"]
        estimated_framerate = ["cam/fps"]
    "#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = BlinkProcessorConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.channel_count(), 1);
    assert_eq!(cfg.process_rate, 20.0);
    assert!(cfg.inverted_points);
    assert_eq!(cfg.frequencies, vec![6.0, 10.0, 15.0, 30.0]);

    clear_env();
}

#[test]
fn topics_can_come_from_env_alone() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BLINK_POINTS_SEEN_TOPICS", "a/points,b/points");
    std::env::set_var("BLINK_BLINKERS_SEEN_TOPICS", "a/blinkers,b/blinkers");
    std::env::set_var("BLINK_FRAMERATE_TOPICS", "a/fps,b/fps");
    std::env::set_var("BLINK_INVERTED_POINTS", "yes");

    let cfg = BlinkProcessorConfig::load().expect("load config");
    assert_eq!(cfg.topics.points_seen, vec!["a/points", "b/points"]);
    assert!(cfg.inverted_points);

    clear_env();
}

#[test]
fn mismatched_topic_lists_are_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BLINK_POINTS_SEEN_TOPICS", "a/points,b/points");
    std::env::set_var("BLINK_BLINKERS_SEEN_TOPICS", "a/blinkers,b/blinkers");
    std::env::set_var("BLINK_FRAMERATE_TOPICS", "a/fps");

    let err = BlinkProcessorConfig::load().unwrap_err();
    assert!(err.to_string().contains("estimated_framerate"));

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BLINK_POINTS_SEEN_TOPICS", "a/points");
    std::env::set_var("BLINK_BLINKERS_SEEN_TOPICS", "a/blinkers");
    std::env::set_var("BLINK_FRAMERATE_TOPICS", "a/fps");

    std::env::set_var("BLINK_PROCESS_RATE", "fast");
    assert!(BlinkProcessorConfig::load().is_err());
    std::env::set_var("BLINK_PROCESS_RATE", "0");
    assert!(BlinkProcessorConfig::load().is_err());
    std::env::remove_var("BLINK_PROCESS_RATE");

    std::env::set_var("BLINK_FREQUENCIES", "30,15");
    assert!(BlinkProcessorConfig::load().is_err());
    std::env::remove_var("BLINK_FREQUENCIES");

    std::env::set_var("BLINK_RETURN_FREQUENCIES", "maybe");
    assert!(BlinkProcessorConfig::load().is_err());

    clear_env();
}
