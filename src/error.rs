//! Error taxonomy for the voice input subsystem

use crate::config::ConfigError;

/// Failures surfaced by the engagement manager and session controller
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// The detection engine could not be constructed or started
    /// (device, permission or asset-load failure)
    #[error("Failed to start voice detection: {0}")]
    EngineCreation(String),

    /// The transcription backend failed
    #[error("Transcription failed: {0}")]
    Transcription(String),

    /// The message could not be delivered to the conversational backend
    #[error("Failed to send message: {0}")]
    Dispatch(String),

    /// Engagement was attempted while the client is not ready
    #[error("Voice input unavailable: {0}")]
    Configuration(String),

    /// The settings store could not be read or written
    #[error(transparent)]
    Settings(#[from] ConfigError),
}

impl VoiceError {
    /// Short machine-readable tag, used as the log prefix and the
    /// notification kind
    pub fn kind(&self) -> &'static str {
        match self {
            VoiceError::EngineCreation(_) => "engine_creation",
            VoiceError::Transcription(_) => "transcription",
            VoiceError::Dispatch(_) => "dispatch",
            VoiceError::Configuration(_) => "configuration",
            VoiceError::Settings(_) => "settings",
        }
    }
}
