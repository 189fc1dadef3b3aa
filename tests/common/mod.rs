//! Recording stand-ins for the host application's collaborators.
//!
//! Each mock keeps a log of what the voice subsystem asked it to do so tests
//! can assert on side effects without a real engine, network or speaker.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use voxlink_lib::messages::{OutboundMessage, Priority};
use voxlink_lib::services::{
    AiStateSink, AudioOutput, Collaborators, MessageDispatcher, Notification, NotificationLevel,
    Notifier, TranscriptionService,
};
use voxlink_lib::voice::{
    AiState, DetectionEngine, EngineConfig, EngineEvent, EngineEventSender, EngineFactory,
};

// =============================================================================
// Collaborators
// =============================================================================

/// Transcriber returning a fixed reply, optionally held back until released
pub struct MockTranscriber {
    reply: Mutex<Result<String, String>>,
    gate: Option<Arc<Notify>>,
    pub calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(Ok(text.to_string())),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(Err(message.to_string())),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Transcriber that waits for `gate` to be notified before replying
    pub fn gated(reply: Result<&str, &str>, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply.map(str::to_string).map_err(str::to_string)),
            gate: Some(gate),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionService for MockTranscriber {
    async fn transcribe(&self, _audio: &[f32]) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.reply.lock().clone().map_err(|e| anyhow::anyhow!(e))
    }
}

/// Dispatcher recording sent and posted messages
#[derive(Default)]
pub struct MockDispatcher {
    pub sent: Mutex<Vec<(OutboundMessage, Priority)>>,
    pub posted: Mutex<Vec<OutboundMessage>>,
    pub fail: AtomicBool,
}

impl MockDispatcher {
    pub fn sent(&self) -> Vec<(OutboundMessage, Priority)> {
        self.sent.lock().clone()
    }

    pub fn posted(&self) -> Vec<OutboundMessage> {
        self.posted.lock().clone()
    }
}

#[async_trait]
impl MessageDispatcher for MockDispatcher {
    async fn send(&self, message: OutboundMessage, priority: Priority) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("channel closed");
        }
        self.sent.lock().push((message, priority));
        Ok(())
    }

    fn post(&self, message: OutboundMessage) {
        self.posted.lock().push(message);
    }
}

/// AI state holder recording every state it is set to
pub struct MockAiState {
    current: Mutex<AiState>,
    pub history: Mutex<Vec<AiState>>,
    pub heard: Mutex<String>,
}

impl Default for MockAiState {
    fn default() -> Self {
        Self {
            current: Mutex::new(AiState::Idle),
            history: Mutex::new(Vec::new()),
            heard: Mutex::new(String::new()),
        }
    }
}

impl MockAiState {
    /// Set the state as the backend would, without recording it
    pub fn force(&self, state: AiState) {
        *self.current.lock() = state;
    }

    pub fn state_now(&self) -> AiState {
        *self.current.lock()
    }

    pub fn history(&self) -> Vec<AiState> {
        self.history.lock().clone()
    }
}

impl AiStateSink for MockAiState {
    fn state(&self) -> AiState {
        *self.current.lock()
    }

    fn set_state(&self, state: AiState) {
        *self.current.lock() = state;
        self.history.lock().push(state);
    }

    fn heard_response(&self) -> String {
        self.heard.lock().clone()
    }
}

#[derive(Default)]
pub struct MockOutput {
    pub clears: AtomicUsize,
}

impl MockOutput {
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl AudioOutput for MockOutput {
    fn clear_queue(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pub notes: Mutex<Vec<Notification>>,
}

impl MockNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.notes.lock().clone()
    }

    pub fn errors(&self) -> Vec<Notification> {
        self.notes
            .lock()
            .iter()
            .filter(|n| n.level == NotificationLevel::Error)
            .cloned()
            .collect()
    }
}

impl Notifier for MockNotifier {
    fn notify(&self, notification: Notification) {
        self.notes.lock().push(notification);
    }
}

/// All mocks plus the bundle handed to the voice subsystem
pub struct Harness {
    pub transcriber: Arc<MockTranscriber>,
    pub dispatcher: Arc<MockDispatcher>,
    pub ai_state: Arc<MockAiState>,
    pub output: Arc<MockOutput>,
    pub notifier: Arc<MockNotifier>,
}

impl Harness {
    pub fn new(transcriber: Arc<MockTranscriber>) -> Self {
        Self {
            transcriber,
            dispatcher: Arc::new(MockDispatcher::default()),
            ai_state: Arc::new(MockAiState::default()),
            output: Arc::new(MockOutput::default()),
            notifier: Arc::new(MockNotifier::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transcriber: self.transcriber.clone(),
            dispatcher: self.dispatcher.clone(),
            ai_state: self.ai_state.clone(),
            audio_output: self.output.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

// =============================================================================
// Detection engine
// =============================================================================

/// Engine that logs lifecycle calls into a log shared with its factory
pub struct MockEngine {
    id: usize,
    log: Arc<Mutex<Vec<String>>>,
    fail_pause: bool,
}

impl DetectionEngine for MockEngine {
    fn start(&mut self) -> anyhow::Result<()> {
        self.log.lock().push(format!("start#{}", self.id));
        Ok(())
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.log.lock().push(format!("pause#{}", self.id));
        if self.fail_pause {
            anyhow::bail!("device lost");
        }
        Ok(())
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        self.log.lock().push(format!("destroy#{}", self.id));
        Ok(())
    }
}

/// Factory recording every configuration and keeping each engine's sender
#[derive(Default)]
pub struct MockFactory {
    pub log: Arc<Mutex<Vec<String>>>,
    pub configs: Mutex<Vec<EngineConfig>>,
    pub senders: Mutex<Vec<EngineEventSender>>,
    pub fail: AtomicBool,
    pub fail_pause: AtomicBool,
    /// When set, `create` waits for a notification before building
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl MockFactory {
    pub fn created(&self) -> usize {
        self.configs.lock().len()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn last_config(&self) -> Option<EngineConfig> {
        self.configs.lock().last().copied()
    }

    /// Inject an event as the most recently created engine
    pub fn emit(&self, event: EngineEvent) {
        if let Some(sender) = self.senders.lock().last() {
            let _ = sender.send(event);
        }
    }
}

#[async_trait]
impl EngineFactory for MockFactory {
    async fn create(
        &self,
        config: EngineConfig,
        events: EngineEventSender,
    ) -> anyhow::Result<Box<dyn DetectionEngine>> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("microphone permission denied");
        }
        let id = {
            let mut configs = self.configs.lock();
            configs.push(config);
            configs.len()
        };
        self.senders.lock().push(events);
        Ok(Box::new(MockEngine {
            id,
            log: self.log.clone(),
            fail_pause: self.fail_pause.load(Ordering::SeqCst),
        }))
    }
}

// =============================================================================
// Scheduling helpers
// =============================================================================

/// Let spawned tasks (event pump, transcription) run to their next await
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock and let woken tasks run
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}
