//! Remote control of voice input
//!
//! Another process (a companion window, a hotkey daemon) can mute or unmute
//! voice input by sending JSON commands. Commands go through the same
//! engagement manager operations as the local controls.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::VoiceError;
use crate::voice::EngagementManager;

/// Command received from outside the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RemoteCommand {
    /// Flip whether detected speech is acted upon
    #[serde(alias = "toggle-mic")]
    ToggleProcessing,
}

impl RemoteCommand {
    /// Parse a command from its JSON text
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw.trim())
    }

    /// Run the command against `manager`
    pub fn apply(self, manager: &EngagementManager) -> Result<(), VoiceError> {
        match self {
            RemoteCommand::ToggleProcessing => {
                let enabled = manager.toggle_processing_enabled()?;
                tracing::info!(
                    "Remote toggle: voice processing {}",
                    if enabled { "enabled" } else { "muted" }
                );
            }
        }
        Ok(())
    }
}

/// Apply commands from `commands` until the sender side closes
///
/// Malformed commands are logged and skipped.
pub fn spawn_listener(
    manager: EngagementManager,
    mut commands: mpsc::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(raw) = commands.recv().await {
            let command = match RemoteCommand::parse(&raw) {
                Ok(command) => command,
                Err(e) => {
                    tracing::warn!("Ignoring malformed remote command {:?}: {}", raw, e);
                    continue;
                }
            };
            if let Err(e) = command.apply(&manager) {
                tracing::error!("Remote command {:?} failed: {}", command, e);
            }
        }
        tracing::debug!("Remote control channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toggle() {
        assert_eq!(
            RemoteCommand::parse(r#"{"type":"toggle-processing"}"#).unwrap(),
            RemoteCommand::ToggleProcessing
        );
    }

    #[test]
    fn test_parse_alias_and_whitespace() {
        assert_eq!(
            RemoteCommand::parse("  {\"type\":\"toggle-mic\"}\n").unwrap(),
            RemoteCommand::ToggleProcessing
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(RemoteCommand::parse(r#"{"type":"self-destruct"}"#).is_err());
        assert!(RemoteCommand::parse("toggle").is_err());
    }
}
