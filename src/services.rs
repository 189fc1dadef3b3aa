//! Collaborators supplied by the host application
//!
//! The voice subsystem does not transcribe audio, talk to the network or draw
//! anything itself. Those concerns are injected through the traits below when
//! the controller and manager are constructed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::VoiceError;
use crate::messages::{OutboundMessage, Priority};
use crate::voice::state::AiState;

/// Converts captured audio into text
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe 16kHz mono PCM samples
    async fn transcribe(&self, audio: &[f32]) -> anyhow::Result<String>;
}

/// Forwards messages to the remote conversational backend
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    /// Send a message and wait for the channel to accept it
    async fn send(&self, message: OutboundMessage, priority: Priority) -> anyhow::Result<()>;

    /// Send a message without waiting for the outcome
    fn post(&self, message: OutboundMessage);
}

/// Receives the conversational backend's activity state
pub trait AiStateSink: Send + Sync {
    fn state(&self) -> AiState;

    fn set_state(&self, state: AiState);

    /// Text of the reply the user has heard so far
    fn heard_response(&self) -> String {
        String::new()
    }
}

/// Queue of synthesized reply audio waiting to be played
pub trait AudioOutput: Send + Sync {
    /// Drop queued audio and stop what is currently playing
    fn clear_queue(&self);
}

/// Severity of a user-visible notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Error,
}

/// User-visible notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    /// Failure tag from [`VoiceError::kind`], for error notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
            kind: None,
        }
    }

    /// Error notification describing `error`
    pub fn failure(error: &VoiceError) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: error.to_string(),
            kind: Some(error.kind().to_string()),
        }
    }
}

/// Shows notifications to the user
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info => tracing::info!("{}", notification.message),
            NotificationLevel::Error => tracing::error!(
                "[{}] {}",
                notification.kind.as_deref().unwrap_or("error"),
                notification.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_notification_carries_kind() {
        let error = VoiceError::Dispatch("channel closed".to_string());
        let notification = Notification::failure(&error);

        assert_eq!(notification.level, NotificationLevel::Error);
        assert_eq!(notification.message, "Failed to send message: channel closed");
        assert_eq!(notification.kind.as_deref(), Some("dispatch"));
    }

    #[test]
    fn test_info_notification_serialisation() {
        let json = serde_json::to_string(&Notification::info("Voice input muted")).unwrap();
        assert_eq!(json, r#"{"level":"info","message":"Voice input muted"}"#);
    }
}

/// Everything the session controller calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn TranscriptionService>,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub ai_state: Arc<dyn AiStateSink>,
    pub audio_output: Arc<dyn AudioOutput>,
    pub notifier: Arc<dyn Notifier>,
}
