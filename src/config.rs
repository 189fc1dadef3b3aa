//! Settings store for voxlink
//!
//! Provides persistent settings storage with schema versioning and migrations.
//! Settings are stored in `~/.voxlink/config.json` by default and are reloaded
//! when the store is opened at process start.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::voice::engine::EngineConfig;

/// Current config schema version
pub const CURRENT_VERSION: u32 = 2;

/// Errors raised by the settings store
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown config version: {0}")]
    UnknownVersion(u32),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version for migrations
    pub version: u32,
    /// Speech detection thresholds
    pub detection: DetectionSettings,
    /// Engagement preferences (engine running, processing enabled, auto-start)
    pub engagement: EngagementPrefs,
    /// Transcription backend identity
    pub transcription: TranscriptionPrefs,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            detection: DetectionSettings::default(),
            engagement: EngagementPrefs::default(),
            transcription: TranscriptionPrefs::default(),
        }
    }
}

/// Speech detection thresholds
///
/// Thresholds are stored as whole percentages and scaled to probabilities
/// when handed to the detection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Frame probability (0-100) above which a frame counts as speech
    pub positive_speech_threshold: u8,
    /// Frame probability (0-100) below which a frame counts as silence
    pub negative_speech_threshold: u8,
    /// Silent frames tolerated before speech is considered ended
    pub redemption_frames: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            positive_speech_threshold: 50,
            negative_speech_threshold: 35,
            redemption_frames: 35,
        }
    }
}

impl DetectionSettings {
    /// Check the thresholds are within range and consistently ordered
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.positive_speech_threshold > 100 {
            return Err(ConfigError::Invalid(format!(
                "positive speech threshold must be 0-100, got {}",
                self.positive_speech_threshold
            )));
        }
        if self.negative_speech_threshold > 100 {
            return Err(ConfigError::Invalid(format!(
                "negative speech threshold must be 0-100, got {}",
                self.negative_speech_threshold
            )));
        }
        if self.negative_speech_threshold > self.positive_speech_threshold {
            return Err(ConfigError::Invalid(format!(
                "negative speech threshold ({}) exceeds positive threshold ({})",
                self.negative_speech_threshold, self.positive_speech_threshold
            )));
        }
        if self.redemption_frames == 0 {
            return Err(ConfigError::Invalid(
                "redemption frames must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Scale the stored percentages into the engine's 0..1 probabilities
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            positive_speech_threshold: f32::from(self.positive_speech_threshold) / 100.0,
            negative_speech_threshold: f32::from(self.negative_speech_threshold) / 100.0,
            redemption_frames: self.redemption_frames,
        }
    }
}

/// Engagement preferences restored at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementPrefs {
    /// Whether the detection engine was running when last saved
    pub engine_running: bool,
    /// Whether detected speech is acted upon
    pub processing_enabled: bool,
    /// Start the detection engine automatically once the client is ready
    pub auto_start_on_init: bool,
}

impl Default for EngagementPrefs {
    fn default() -> Self {
        Self {
            engine_running: false,
            processing_enabled: true,
            auto_start_on_init: false,
        }
    }
}

/// Transcription backend identity
///
/// Any change to these values while the engine runs forces an engine restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionPrefs {
    /// Backend provider name (e.g. "whisper", "sherpa-onnx")
    pub provider: String,
    /// Selected model ID, or None for the provider's default
    pub model_id: Option<String>,
    /// Transcription language code (e.g. "en", "auto")
    pub language: String,
}

impl Default for TranscriptionPrefs {
    fn default() -> Self {
        Self {
            provider: "whisper".to_string(),
            model_id: None,
            language: "en".to_string(),
        }
    }
}

/// Get the path to the default config file (~/.voxlink/config.json)
pub fn get_config_path() -> PathBuf {
    home_dir_or_fallback().join(".voxlink").join("config.json")
}

/// Get the home directory, falling back to /tmp if unavailable
fn home_dir_or_fallback() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        tracing::error!("Could not determine home directory, using /tmp");
        PathBuf::from("/tmp")
    })
}

/// Durable key/value record of detection thresholds and user preferences
///
/// Reads are served from an in-memory cache; writes go to disk first and
/// then replace the cache. A store without a path keeps settings in memory only.
pub struct SettingsStore {
    path: Option<PathBuf>,
    cache: RwLock<Config>,
}

impl SettingsStore {
    /// Open the store at `path`, loading and migrating any existing file
    ///
    /// A missing file yields defaults. A file that cannot be read or parsed
    /// is logged and replaced by defaults in memory.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = load_from_disk(&path).unwrap_or_else(|e| {
            tracing::error!("Failed to load settings, using defaults: {}", e);
            Config::default()
        });
        tracing::info!(
            "Settings loaded from {}: detection={:?}, engagement={:?}",
            path.display(),
            config.detection,
            config.engagement
        );
        Self {
            path: Some(path),
            cache: RwLock::new(config),
        }
    }

    /// Open the store at the default location
    pub fn open_default() -> Self {
        Self::open(get_config_path())
    }

    /// Create a store that never touches disk
    pub fn in_memory() -> Self {
        Self::with_config(Config::default())
    }

    /// Create an in-memory store seeded with `config`
    pub fn with_config(config: Config) -> Self {
        Self {
            path: None,
            cache: RwLock::new(config),
        }
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current settings
    pub fn snapshot(&self) -> Config {
        self.cache.read().clone()
    }

    /// Apply `mutate` to a copy of the settings and persist the result
    ///
    /// The cache only changes once the write has succeeded.
    pub fn update<F>(&self, mutate: F) -> Result<Config, ConfigError>
    where
        F: FnOnce(&mut Config),
    {
        let mut cached = self.cache.write();
        let mut next = cached.clone();
        mutate(&mut next);
        next.version = CURRENT_VERSION;

        if let Some(path) = &self.path {
            save_to_disk(path, &next)?;
        }
        *cached = next.clone();
        Ok(next)
    }

    /// Reset all settings to their defaults and persist them
    pub fn reset(&self) -> Result<Config, ConfigError> {
        let config = self.update(|cfg| *cfg = Config::default())?;
        tracing::info!("Settings reset to defaults");
        Ok(config)
    }
}

/// Load configuration from disk
fn load_from_disk(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&contents)?;
    let original_version = version_of(&raw);

    let migrated = migrate_value(raw)?;
    let config: Config = serde_json::from_value(migrated)?;

    if config.version != original_version {
        tracing::info!(
            "Migrated settings from version {} to {}",
            original_version,
            config.version
        );
        save_to_disk(path, &config)?;
    }

    Ok(config)
}

/// Save configuration to disk, creating the parent directory if needed
fn save_to_disk(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;

    tracing::debug!("Settings saved to {}", path.display());
    Ok(())
}

fn version_of(raw: &Value) -> u32 {
    raw.get("version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

/// Migrate a raw settings document from older schema versions
fn migrate_value(mut raw: Value) -> Result<Value, ConfigError> {
    let mut version = version_of(&raw);

    while version < CURRENT_VERSION {
        raw = apply_migration(raw, version)?;
        version = version_of(&raw);
    }

    if version > CURRENT_VERSION {
        return Err(ConfigError::UnknownVersion(version));
    }

    Ok(raw)
}

/// Apply a single migration step
fn apply_migration(mut raw: Value, version: u32) -> Result<Value, ConfigError> {
    let Some(obj) = raw.as_object_mut() else {
        return Err(ConfigError::Invalid(
            "settings document is not an object".to_string(),
        ));
    };

    match version {
        // Version 0 -> 1: version field introduced
        0 => {
            obj.insert("version".to_string(), Value::from(1));
        }
        // Version 1 -> 2: thresholds stored as fractions become percentages
        1 => {
            if let Some(detection) = obj.get_mut("detection").and_then(Value::as_object_mut) {
                for key in ["positive_speech_threshold", "negative_speech_threshold"] {
                    if let Some(fraction) = detection.get(key).and_then(Value::as_f64) {
                        if fraction <= 1.0 {
                            let percent = (fraction * 100.0).round().clamp(0.0, 100.0) as u64;
                            detection.insert(key.to_string(), Value::from(percent));
                        }
                    }
                }
            }
            obj.insert("version".to_string(), Value::from(2));
        }
        v => return Err(ConfigError::UnknownVersion(v)),
    }

    Ok(raw)
}
