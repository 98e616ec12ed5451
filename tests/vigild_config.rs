use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use vigil_engine::config::VigildConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VIGIL_CONFIG",
        "VIGIL_SOURCE_URL",
        "VIGIL_TARGET_FPS",
        "VIGIL_FRAME_DEADLINE_MS",
        "VIGIL_MAX_PENDING_FRAMES",
        "VIGIL_FAILURE_THRESHOLD",
        "VIGIL_SLOT_RETRY_SECS",
        "VIGIL_DETECTORS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = VigildConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://front_camera");
    assert_eq!(cfg.source.target_fps, 10);
    assert_eq!(cfg.detectors.len(), 4);
    assert!(cfg.detectors.iter().all(|det| det.enabled));

    let people = cfg
        .detectors
        .iter()
        .find(|det| det.id == "people_counter")
        .unwrap();
    assert!(people.config.per_subject);
    let fire = cfg.detectors.iter().find(|det| det.id == "fire").unwrap();
    assert!(!fire.config.per_subject);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": {
            "url": "stub://yard",
            "target_fps": 12,
            "width": 800,
            "height": 600
        },
        "engine": {
            "frame_deadline_ms": 750,
            "max_pending_frames": 8,
            "failure_threshold": 7,
            "slot_retry_secs": 120
        },
        "detectors": {
            "fire": {
                "confidence_threshold": 0.7,
                "min_consecutive_positive": 5,
                "cooldown_ms": 30000
            },
            "phone": {
                "enabled": false
            }
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("VIGIL_CONFIG", file.path());
    std::env::set_var("VIGIL_SOURCE_URL", "stub://gate");
    std::env::set_var("VIGIL_FAILURE_THRESHOLD", "3");

    let cfg = VigildConfig::load().expect("load config");

    // Env wins over file, file wins over defaults.
    assert_eq!(cfg.source.url, "stub://gate");
    assert_eq!(cfg.source.target_fps, 12);
    assert_eq!(cfg.engine.frame_deadline, Duration::from_millis(750));
    assert_eq!(cfg.engine.max_pending_frames, 8);
    assert_eq!(cfg.engine.failure_threshold, 3);
    assert_eq!(cfg.engine.slot_retry_after, Some(Duration::from_secs(120)));

    let fire = cfg.detectors.iter().find(|det| det.id == "fire").unwrap();
    assert!((fire.config.confidence_threshold - 0.7).abs() < f32::EPSILON);
    assert_eq!(fire.config.min_consecutive_positive, 5);
    assert_eq!(fire.config.cooldown, Duration::from_secs(30));
    // Untouched fields keep their defaults.
    assert_eq!(fire.config.min_consecutive_negative, 5);

    let phone = cfg.detectors.iter().find(|det| det.id == "phone").unwrap();
    assert!(!phone.enabled);

    clear_env();
}

#[test]
fn detector_csv_selects_the_enabled_set() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_DETECTORS", "fire, people_counter");
    let cfg = VigildConfig::load().expect("load config");
    let enabled: Vec<&str> = cfg
        .enabled_detectors()
        .map(|det| det.id.as_str())
        .collect();
    assert_eq!(enabled, vec!["fire", "people_counter"]);

    clear_env();
}

#[test]
fn rejects_unknown_detector_in_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "detectors": { "license_plate": {} } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("VIGIL_CONFIG", file.path());

    let err = VigildConfig::load().unwrap_err();
    assert!(err.to_string().contains("unknown detector"));

    clear_env();
}

#[test]
fn rejects_unknown_detector_in_env_csv() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_DETECTORS", "fire,sasquatch");
    let err = VigildConfig::load().unwrap_err();
    assert!(err.to_string().contains("sasquatch"));

    clear_env();
}

#[test]
fn rejects_invalid_detector_parameters() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "detectors": { "fire": { "confidence_threshold": 1.5 } } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("VIGIL_CONFIG", file.path());

    let err = VigildConfig::load().unwrap_err();
    assert!(err.to_string().contains("fire"));

    clear_env();
}

#[test]
fn rejects_zero_fps() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_TARGET_FPS", "0");
    let err = VigildConfig::load().unwrap_err();
    assert!(err.to_string().contains("target_fps"));

    clear_env();
}

#[test]
fn rejects_empty_detector_set() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "detectors": {
            "fire": { "enabled": false },
            "phone": { "enabled": false },
            "hands_in_pockets": { "enabled": false },
            "people_counter": { "enabled": false }
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("VIGIL_CONFIG", file.path());

    let err = VigildConfig::load().unwrap_err();
    assert!(err.to_string().contains("no detectors enabled"));

    clear_env();
}
