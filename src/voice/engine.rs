//! Detection engine contract
//!
//! The speech-frame classifier itself lives outside this crate. It is
//! constructed through an [`EngineFactory`] and reports its callbacks as
//! [`EngineEvent`]s on a channel, so the session controller can be driven by
//! synthetic events in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Engine construction parameters, thresholds as 0..1 probabilities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub positive_speech_threshold: f32,
    pub negative_speech_threshold: f32,
    pub redemption_frames: u32,
}

/// Event emitted by the detection engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Speech has started
    Start,
    /// Speech probability (0..1) of the latest frame
    Frame(f32),
    /// Speech has ended; carries the captured 16kHz mono PCM
    End(Vec<f32>),
    /// Speech start turned out to be too short to count as an utterance
    Misfire,
}

impl EngineEvent {
    /// Event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Start => "start",
            EngineEvent::Frame(_) => "frame",
            EngineEvent::End(_) => "end",
            EngineEvent::Misfire => "misfire",
        }
    }
}

/// Sending half handed to the engine at construction
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Receiving half consumed by the event pump
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Create the channel that connects an engine to the session controller
pub fn event_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

/// Handle to a constructed detection engine
///
/// `start` also resumes a paused engine. After `destroy` the handle must not
/// be used again.
pub trait DetectionEngine: Send + Sync {
    fn start(&mut self) -> anyhow::Result<()>;
    fn pause(&mut self) -> anyhow::Result<()>;
    fn destroy(&mut self) -> anyhow::Result<()>;
}

/// Builds detection engines
///
/// Construction may be slow (loading model assets, opening the input device)
/// and fails on device, permission or asset-load errors.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        config: EngineConfig,
        events: EngineEventSender,
    ) -> anyhow::Result<Box<dyn DetectionEngine>>;
}
