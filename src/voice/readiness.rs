//! Readiness gate
//!
//! Combines the client's connection, authentication and transcription state
//! into the single precondition for engaging voice input.

use serde::{Deserialize, Serialize};

/// State of the channel to the conversational backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

/// External signals observed at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReadinessSnapshot {
    /// A non-empty credential is configured
    pub credential_present: bool,
    pub channel_state: ChannelState,
    /// Authentication has been requested but not yet confirmed
    pub auth_pending: bool,
    /// The transcription backend reports it has finished initialising
    pub transcription_ready: bool,
}

impl ReadinessSnapshot {
    /// Snapshot with every precondition satisfied
    pub fn ready() -> Self {
        Self {
            credential_present: true,
            channel_state: ChannelState::Open,
            auth_pending: false,
            transcription_ready: true,
        }
    }

    /// Whether voice input may be engaged
    pub fn is_ready(&self) -> bool {
        self.blocking_reason().is_none()
    }

    /// The first unmet precondition, phrased for the user
    pub fn blocking_reason(&self) -> Option<&'static str> {
        if !self.credential_present {
            Some("no credential is configured")
        } else if self.channel_state != ChannelState::Open {
            Some("the connection is not open")
        } else if self.auth_pending {
            Some("authentication has not completed")
        } else if !self.transcription_ready {
            Some("speech recognition is still loading")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_signals_ready() {
        assert!(ReadinessSnapshot::ready().is_ready());
    }

    #[test]
    fn test_default_is_not_ready() {
        let snapshot = ReadinessSnapshot::default();
        assert!(!snapshot.is_ready());
        assert_eq!(
            snapshot.blocking_reason(),
            Some("no credential is configured")
        );
    }

    #[test]
    fn test_each_signal_blocks() {
        let mut snapshot = ReadinessSnapshot::ready();
        snapshot.channel_state = ChannelState::Connecting;
        assert_eq!(snapshot.blocking_reason(), Some("the connection is not open"));

        let mut snapshot = ReadinessSnapshot::ready();
        snapshot.auth_pending = true;
        assert_eq!(
            snapshot.blocking_reason(),
            Some("authentication has not completed")
        );

        let mut snapshot = ReadinessSnapshot::ready();
        snapshot.transcription_ready = false;
        assert_eq!(
            snapshot.blocking_reason(),
            Some("speech recognition is still loading")
        );
    }

    #[test]
    fn test_channel_state_wire_format() {
        assert_eq!(serde_json::to_string(&ChannelState::Open).unwrap(), "\"OPEN\"");
        assert_eq!(
            serde_json::from_str::<ChannelState>("\"CLOSED\"").unwrap(),
            ChannelState::Closed
        );
    }
}
