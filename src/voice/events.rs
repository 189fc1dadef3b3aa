//! Events broadcast to observers of the voice subsystem

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::engagement::EngagementState;
use super::state::{SessionEndReason, SessionPhase, TranscriptionStatus};

/// Capacity of the observer channel; slow subscribers miss older events
const EVENT_CAPACITY: usize = 64;

/// State change notification for UI and diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// The session phase changed
    SessionChanged {
        previous: SessionPhase,
        new: SessionPhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<SessionEndReason>,
    },
    /// The transcription status of the latest utterance changed
    TranscriptionStatusChanged { status: TranscriptionStatus },
    /// Engine running or processing enabled changed
    EngagementChanged { state: EngagementState },
}

/// Broadcast channel shared by the controller and the engagement manager
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<VoiceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: VoiceEvent) {
        tracing::debug!("Voice event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
