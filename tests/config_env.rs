use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use fallwatch::config::FallwatchConfig;
use fallwatch::{DetectorKind, DispatchMode, MissPolicy};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FALLWATCH_CONFIG",
        "FALLWATCH_SOURCE",
        "FALLWATCH_SERVER_URL",
        "FALLWATCH_CAPTURE_DIR",
        "FALLWATCH_LOCATION",
        "FALLWATCH_COOLDOWN_SECS",
        "FALLWATCH_RATIO_THRESHOLD",
        "FALLWATCH_DETECTOR",
        "FALLWATCH_MODEL_PATH",
        "FALLWATCH_DISPATCH_MODE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = FallwatchConfig::load().expect("load defaults");
    assert_eq!(cfg.source, "0");
    assert_eq!(cfg.location, "living_room");
    assert_eq!(cfg.ratio_threshold, 1.3);
    assert_eq!(cfg.cooldown, Duration::from_secs(10));
    assert_eq!(cfg.upload.mode, DispatchMode::Inline);
    assert_eq!(cfg.detector.kind, DetectorKind::Stub);
    assert_eq!(cfg.miss_policy(), MissPolicy::Freeze);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": "rtsp://camera-1/stream",
        "detector": { "backend": "tract", "model_path": "models/person.onnx", "confidence": 0.4 },
        "posture": { "ratio_threshold": 1.5, "miss_reset_frames": 15 },
        "alert": { "cooldown_secs": 30, "lead_up_secs": 1.5, "location": "Bedroom" },
        "storage": { "capture_dir": "/var/lib/fallwatch" },
        "upload": { "url": "http://backend.local/api/fall-events/", "timeout_secs": 5, "dispatch_mode": "background" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FALLWATCH_CONFIG", file.path());
    std::env::set_var("FALLWATCH_LOCATION", "hallway");
    std::env::set_var("FALLWATCH_COOLDOWN_SECS", "2.5");

    let cfg = FallwatchConfig::load().expect("load config");
    assert_eq!(cfg.source, "rtsp://camera-1/stream");
    assert_eq!(cfg.detector.kind, DetectorKind::Tract);
    assert_eq!(cfg.detector.confidence, 0.4);
    assert_eq!(cfg.ratio_threshold, 1.5);
    assert_eq!(cfg.miss_policy(), MissPolicy::ResetAfter(15));
    assert_eq!(cfg.cooldown, Duration::from_millis(2500));
    assert_eq!(cfg.lead_up, Duration::from_millis(1500));
    assert_eq!(cfg.location, "hallway");
    assert_eq!(cfg.capture_dir.to_str(), Some("/var/lib/fallwatch"));
    assert_eq!(cfg.upload.url, "http://backend.local/api/fall-events/");
    assert_eq!(cfg.upload.timeout, Duration::from_secs(5));
    assert_eq!(cfg.upload.mode, DispatchMode::Background);

    let settings = cfg.pipeline_settings();
    assert_eq!(settings.location, "hallway");
    assert_eq!(settings.cooldown, Duration::from_millis(2500));

    clear_env();
}

#[test]
fn file_location_is_lowercased() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "alert": { "location": "Kitchen" } }"#)
        .expect("write config");
    std::env::set_var("FALLWATCH_CONFIG", file.path());

    let cfg = FallwatchConfig::load().expect("load config");
    assert_eq!(cfg.location, "kitchen");

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("FALLWATCH_SERVER_URL", "ftp://backend/upload"),
        ("FALLWATCH_LOCATION", "living room!"),
        ("FALLWATCH_COOLDOWN_SECS", "-1"),
        ("FALLWATCH_RATIO_THRESHOLD", "0"),
        ("FALLWATCH_DETECTOR", "cascade"),
        ("FALLWATCH_DISPATCH_MODE", "sometimes"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            FallwatchConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FALLWATCH_CONFIG", "/nonexistent/fallwatch.json");
    assert!(FallwatchConfig::load().is_err());

    clear_env();
}
