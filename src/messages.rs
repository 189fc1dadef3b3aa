//! Messages sent to the conversational backend

use serde::{Deserialize, Serialize};

/// Outbound message to the conversational backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    /// A finished user utterance
    TextInput { text: String },
    /// The user started speaking over the reply; `text` is what was heard so far
    InterruptSignal { text: String },
}

impl OutboundMessage {
    pub fn text_input(text: impl Into<String>) -> Self {
        Self::TextInput { text: text.into() }
    }

    pub fn interrupt(heard: impl Into<String>) -> Self {
        Self::InterruptSignal { text: heard.into() }
    }
}

/// Delivery priority for queued messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
}
