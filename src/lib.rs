//! voxlink - voice input for a conversational avatar client
//!
//! Sequences speech-detection events into utterance sessions, transcribes
//! them and forwards the text to the conversational backend.

use std::path::{Path, PathBuf};

pub mod config;
pub mod error;
pub mod messages;
pub mod remote;
pub mod services;
pub mod voice;

pub use config::{Config, DetectionSettings, SettingsStore};
pub use error::VoiceError;
pub use voice::{EngagementManager, SessionController};

/// Format timestamps using the system's local time via chrono
struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Default log directory (~/.voxlink/logs)
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".voxlink").join("logs"))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Install the global tracing subscriber
///
/// Logs go to stdout and, when `log_dir` (or the default directory) is
/// writable, to `voxlink-debug.log` inside it. The filter comes from
/// `RUST_LOG`, defaulting to `info`. Does nothing if a subscriber is already
/// installed.
pub fn init_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::prelude::*;

    let log_dir = log_dir.map(Path::to_path_buf).unwrap_or_else(default_log_dir);
    let _ = std::fs::create_dir_all(&log_dir);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("voxlink-debug.log"))
        .ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stdout_layer = tracing_subscriber::fmt::layer().with_timer(LocalTimer);

    let result = if let Some(file) = log_file {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_timer(LocalTimer)
            .with_ansi(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init()
    };

    if result.is_ok() {
        tracing::info!("voxlink logging to {}", log_dir.display());
    }
}
