//! Utterance session state
//!
//! Defines the session states and the transitions between them. A session
//! covers one detected utterance, from speech start to its resolution by
//! speech end, misfire or timeout.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::timer::Deadline;

/// Externally visible session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No utterance is being captured
    #[default]
    NoSession,
    /// An utterance is being captured
    Active,
}

impl SessionPhase {
    /// Returns a human-readable description of the phase
    pub fn description(&self) -> &'static str {
        match self {
            SessionPhase::NoSession => "Waiting for speech",
            SessionPhase::Active => "Capturing speech",
        }
    }
}

/// Activity state of the conversational backend as shown by the avatar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AiState {
    #[default]
    Idle,
    Listening,
    ThinkingSpeaking,
    Interrupted,
}

/// Outcome of the most recent utterance's transcription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStatus {
    #[default]
    Idle,
    Processing,
    Complete,
    Error,
}

/// Why a session left the `Active` phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// The engine reported the end of speech with captured audio
    SpeechEnded,
    /// The engine decided the speech start was spurious
    Misfire,
    /// The engine never resolved the session within the timeout
    Timeout,
    /// The engine was stopped while the session was active
    Teardown,
}

impl SessionEndReason {
    /// Returns a human-readable description of the reason
    pub fn description(&self) -> &'static str {
        match self {
            SessionEndReason::SpeechEnded => "Speech ended",
            SessionEndReason::Misfire => "Speech misfire",
            SessionEndReason::Timeout => "Session timed out",
            SessionEndReason::Teardown => "Detection stopped",
        }
    }
}

/// Illegal session transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Session {0} is already active")]
    AlreadyActive(Uuid),
    #[error("No session is active")]
    NotActive,
}

/// One utterance being captured
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    started_at: Instant,
    timeout: Deadline,
}

impl Session {
    /// Creates a session that owns its armed timeout
    pub fn new(id: Uuid, timeout: Deadline) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            timeout,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the session timeout is still armed
    pub fn timeout_pending(&self) -> bool {
        self.timeout.is_pending()
    }

    /// Close the session, cancelling its timeout
    pub fn close(mut self) -> std::time::Duration {
        self.timeout.cancel();
        self.started_at.elapsed()
    }

    /// Close the session from inside its own timeout callback
    pub fn close_expired(self) -> std::time::Duration {
        let elapsed = self.started_at.elapsed();
        self.timeout.detach();
        elapsed
    }
}

/// Session state machine
///
/// At most one session exists at a time. Transitions check their
/// preconditions and refuse rather than overwrite.
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    NoSession,
    Active(Session),
}

impl SessionState {
    /// Returns the current phase
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::NoSession => SessionPhase::NoSession,
            SessionState::Active(_) => SessionPhase::Active,
        }
    }

    /// Returns the active session, if any
    pub fn active(&self) -> Option<&Session> {
        match self {
            SessionState::NoSession => None,
            SessionState::Active(session) => Some(session),
        }
    }

    /// Whether `id` identifies the active session
    pub fn is_current(&self, id: Uuid) -> bool {
        self.active().is_some_and(|s| s.id() == id)
    }

    /// NoSession -> Active
    ///
    /// Hands the rejected session back when one is already active.
    pub fn begin(&mut self, session: Session) -> Result<(), (TransitionError, Session)> {
        if let SessionState::Active(current) = self {
            return Err((TransitionError::AlreadyActive(current.id()), session));
        }
        tracing::info!("Session {} started", session.id());
        *self = SessionState::Active(session);
        Ok(())
    }

    /// Active -> NoSession, returning the session that was active
    pub fn finish(&mut self) -> Result<Session, TransitionError> {
        match std::mem::take(self) {
            SessionState::Active(session) => Ok(session),
            SessionState::NoSession => Err(TransitionError::NotActive),
        }
    }
}
