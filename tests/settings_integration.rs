//! Settings store integration tests.
//!
//! Exercises persistence, reload and migration against temporary files so
//! the real settings in the home directory are never touched.

use std::fs;
use tempfile::TempDir;

use voxlink_lib::config::{Config, DetectionSettings, SettingsStore, CURRENT_VERSION};

fn store_in(dir: &TempDir) -> SettingsStore {
    SettingsStore::open(dir.path().join("config.json"))
}

// =============================================================================
// Round trip
// =============================================================================

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);

    assert_eq!(store.snapshot(), Config::default());
    assert!(!dir.path().join("config.json").exists());
}

#[test]
fn test_thresholds_survive_reload() {
    let dir = TempDir::new().unwrap();
    let tuned = DetectionSettings {
        positive_speech_threshold: 72,
        negative_speech_threshold: 41,
        redemption_frames: 18,
    };

    {
        let store = store_in(&dir);
        store.update(|cfg| cfg.detection = tuned).unwrap();
    }

    let reopened = store_in(&dir);
    assert_eq!(reopened.snapshot().detection, tuned);
    assert_eq!(reopened.snapshot().version, CURRENT_VERSION);
}

#[test]
fn test_engagement_preferences_survive_reload() {
    let dir = TempDir::new().unwrap();
    {
        let store = store_in(&dir);
        store
            .update(|cfg| {
                cfg.engagement.processing_enabled = false;
                cfg.engagement.auto_start_on_init = true;
                cfg.transcription.language = "de".to_string();
            })
            .unwrap();
    }

    let config = store_in(&dir).snapshot();
    assert!(!config.engagement.processing_enabled);
    assert!(config.engagement.auto_start_on_init);
    assert_eq!(config.transcription.language, "de");
}

#[test]
fn test_update_creates_parent_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("voxlink").join("config.json");
    let store = SettingsStore::open(&path);

    store
        .update(|cfg| cfg.detection.redemption_frames = 12)
        .unwrap();
    assert!(path.exists());
}

#[test]
fn test_reset_restores_defaults_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store
        .update(|cfg| cfg.detection.positive_speech_threshold = 90)
        .unwrap();

    store.reset().unwrap();
    assert_eq!(store_in(&dir).snapshot(), Config::default());
}

// =============================================================================
// Migration and damaged files
// =============================================================================

#[test]
fn test_fractional_thresholds_are_migrated_and_saved() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{
            "version": 1,
            "detection": {
                "positive_speech_threshold": 0.6,
                "negative_speech_threshold": 0.25,
                "redemption_frames": 20
            }
        }"#,
    )
    .unwrap();

    let store = SettingsStore::open(&path);
    let detection = store.snapshot().detection;
    assert_eq!(detection.positive_speech_threshold, 60);
    assert_eq!(detection.negative_speech_threshold, 25);
    assert_eq!(detection.redemption_frames, 20);

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["version"], CURRENT_VERSION);
    assert_eq!(saved["detection"]["positive_speech_threshold"], 60);
}

#[test]
fn test_unversioned_file_is_migrated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{"engagement": {"processing_enabled": false}}"#,
    )
    .unwrap();

    let config = SettingsStore::open(&path).snapshot();
    assert_eq!(config.version, CURRENT_VERSION);
    assert!(!config.engagement.processing_enabled);
    assert_eq!(config.detection, DetectionSettings::default());
}

#[test]
fn test_corrupt_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not valid json").unwrap();

    let store = SettingsStore::open(&path);
    assert_eq!(store.snapshot(), Config::default());

    // The next write replaces the damaged file
    store
        .update(|cfg| cfg.engagement.auto_start_on_init = true)
        .unwrap();
    assert!(store_in(&dir).snapshot().engagement.auto_start_on_init);
}

#[test]
fn test_future_version_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{"version": 99}"#).unwrap();

    assert_eq!(SettingsStore::open(&path).snapshot(), Config::default());
}
