//! Session lifecycle controller
//!
//! Turns detection engine events into utterance sessions, bounds each session
//! with a timeout, and forwards finished utterances through transcription to
//! the conversational backend.
//!
//! Every session creation and every teardown advances an epoch counter. An
//! utterance handed to transcription remembers the epoch it started under and
//! drops its result if the epoch has moved on by the time the result arrives.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::engine::{EngineEvent, EngineEventReceiver};
use super::events::{EventBus, VoiceEvent};
use super::state::{
    AiState, Session, SessionEndReason, SessionPhase, SessionState, TranscriptionStatus,
};
use super::timer::Deadline;
use crate::error::VoiceError;
use crate::messages::{OutboundMessage, Priority};
use crate::services::{Collaborators, Notification, TranscriptionService};

/// How long a session may stay active without an end or misfire event
pub const SESSION_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub processing_enabled: bool,
    pub transcription_status: TranscriptionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transcription: Option<String>,
    /// Highest frame probability seen since the last utterance resolved
    pub peak_probability: f32,
}

#[derive(Debug, Default)]
struct ControllerState {
    session: SessionState,
    epoch: u64,
    peak_probability: f32,
    transcription_status: TranscriptionStatus,
    last_transcription: Option<String>,
}

struct Inner {
    state: Mutex<ControllerState>,
    processing_enabled: AtomicBool,
    transcriber: RwLock<Arc<dyn TranscriptionService>>,
    services: Collaborators,
    events: EventBus,
    timeout: Duration,
}

/// Session lifecycle controller
///
/// Cheap to clone; clones share the same session state.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Creates a controller with the standard session timeout
    pub fn new(services: Collaborators) -> Self {
        Self::with_timeout(services, SESSION_TIMEOUT)
    }

    /// Creates a controller with a custom session timeout
    pub fn with_timeout(services: Collaborators, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ControllerState::default()),
                processing_enabled: AtomicBool::new(true),
                transcriber: RwLock::new(services.transcriber.clone()),
                services,
                events: EventBus::new(),
                timeout,
            }),
        }
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub(crate) fn services(&self) -> &Collaborators {
        &self.inner.services
    }

    /// Whether detected speech is acted upon
    pub fn processing_enabled(&self) -> bool {
        self.inner.processing_enabled.load(Ordering::SeqCst)
    }

    /// Gate detected speech; does not touch an active session
    pub fn set_processing_enabled(&self, enabled: bool) {
        self.inner.processing_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Point transcription at a different backend
    ///
    /// Utterances already being transcribed finish on the old backend.
    pub fn set_transcriber(&self, transcriber: Arc<dyn TranscriptionService>) {
        *self.inner.transcriber.write() = transcriber;
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().session.phase()
    }

    pub fn transcription_status(&self) -> TranscriptionStatus {
        self.inner.state.lock().transcription_status
    }

    pub fn last_transcription(&self) -> Option<String> {
        self.inner.state.lock().last_transcription.clone()
    }

    pub fn peak_probability(&self) -> f32 {
        self.inner.state.lock().peak_probability
    }

    /// Whether the active session (if any) still has its timeout armed
    pub fn timeout_armed(&self) -> bool {
        self.inner
            .state
            .lock()
            .session
            .active()
            .is_some_and(Session::timeout_pending)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock();
        SessionSnapshot {
            phase: state.session.phase(),
            processing_enabled: self.processing_enabled(),
            transcription_status: state.transcription_status,
            last_transcription: state.last_transcription.clone(),
            peak_probability: state.peak_probability,
        }
    }

    /// Dispatch one engine event
    ///
    /// Returns the handle of the transcription task when an end event hands
    /// an utterance on; every other event completes synchronously.
    pub fn handle_event(&self, event: EngineEvent) -> Option<JoinHandle<()>> {
        match event {
            EngineEvent::Start => {
                self.on_speech_start();
                None
            }
            EngineEvent::Frame(probability) => {
                self.on_frame(probability);
                None
            }
            EngineEvent::End(audio) => self.on_speech_end(audio),
            EngineEvent::Misfire => {
                self.on_misfire();
                None
            }
        }
    }

    /// Feed events from an engine into this controller until the engine's
    /// sender is dropped or the task is aborted
    pub fn spawn_event_pump(&self, mut events: EngineEventReceiver) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                tracing::trace!("Engine event: {}", event.name());
                controller.handle_event(event);
            }
            tracing::debug!("Engine event stream closed");
        })
    }

    fn on_speech_start(&self) {
        if !self.processing_enabled() {
            tracing::debug!("Speech start ignored: processing disabled");
            return;
        }

        let ai_state = self.inner.services.ai_state.state();
        let id = Uuid::new_v4();
        {
            let mut state = self.inner.state.lock();
            if let Some(active) = state.session.active() {
                tracing::warn!(
                    "Speech start while session {} is still active; detector misbehaving, ignoring",
                    active.id()
                );
                return;
            }

            let timeout = self.arm_timeout(id);
            if let Err((e, rejected)) = state.session.begin(Session::new(id, timeout)) {
                tracing::warn!("Refused to start session: {}", e);
                rejected.close();
                return;
            }
            state.epoch += 1;
            state.transcription_status = TranscriptionStatus::Idle;
        }

        let services = &self.inner.services;
        if ai_state == AiState::ThinkingSpeaking {
            tracing::info!("User spoke over the reply, interrupting");
            services
                .dispatcher
                .post(OutboundMessage::interrupt(services.ai_state.heard_response()));
            services.audio_output.clear_queue();
        }
        services.ai_state.set_state(AiState::Listening);

        self.inner.events.emit(VoiceEvent::SessionChanged {
            previous: SessionPhase::NoSession,
            new: SessionPhase::Active,
            reason: None,
        });
        self.inner.events.emit(VoiceEvent::TranscriptionStatusChanged {
            status: TranscriptionStatus::Idle,
        });
    }

    fn on_frame(&self, probability: f32) {
        if !probability.is_finite() {
            return;
        }
        let probability = probability.clamp(0.0, 1.0);
        let mut state = self.inner.state.lock();
        if probability > state.peak_probability {
            state.peak_probability = probability;
        }
    }

    fn on_speech_end(&self, audio: Vec<f32>) -> Option<JoinHandle<()>> {
        if !self.processing_enabled() {
            tracing::debug!("Speech end ignored: processing disabled");
            return None;
        }

        let (session, attempt) = {
            let mut state = self.inner.state.lock();
            let Ok(session) = state.session.finish() else {
                tracing::debug!("Speech end ignored: no active session");
                return None;
            };
            state.epoch += 1;
            state.peak_probability = 0.0;
            state.transcription_status = TranscriptionStatus::Processing;
            (session, state.epoch)
        };

        let id = session.id();
        let elapsed = session.close();
        tracing::info!(
            "Session {} ended after {:?} with {} samples",
            id,
            elapsed,
            audio.len()
        );

        // A previous reply may still be playing
        self.inner.services.audio_output.clear_queue();

        self.inner.events.emit(VoiceEvent::SessionChanged {
            previous: SessionPhase::Active,
            new: SessionPhase::NoSession,
            reason: Some(SessionEndReason::SpeechEnded),
        });
        self.inner.events.emit(VoiceEvent::TranscriptionStatusChanged {
            status: TranscriptionStatus::Processing,
        });

        let controller = self.clone();
        Some(tokio::spawn(async move {
            controller.process_utterance(attempt, audio).await;
        }))
    }

    fn on_misfire(&self) {
        let session = self.inner.state.lock().session.finish().ok();
        let elapsed = session.map(Session::close);
        self.resolve_without_transcript(SessionEndReason::Misfire, elapsed);
    }

    fn on_timeout(&self, id: Uuid) {
        let session = {
            let mut state = self.inner.state.lock();
            if !state.session.is_current(id) {
                return;
            }
            state.session.finish().ok()
        };
        let Some(session) = session else {
            return;
        };

        let elapsed = session.close_expired();
        tracing::warn!(
            "Session {} timed out after {:?} without an end or misfire event",
            id,
            elapsed
        );
        self.resolve_without_transcript(SessionEndReason::Timeout, Some(elapsed));
    }

    /// Discard any active session without transcribing it
    ///
    /// Used when the engine is torn down. Also invalidates any utterance still
    /// being transcribed.
    pub fn force_reset(&self) {
        let session = self.inner.state.lock().session.finish().ok();
        let elapsed = session.map(Session::close);
        self.resolve_without_transcript(SessionEndReason::Teardown, elapsed);
    }

    /// Shared cleanup for misfire, timeout and teardown
    ///
    /// `elapsed` is the closed session's duration, or None when no session
    /// was active.
    fn resolve_without_transcript(&self, reason: SessionEndReason, elapsed: Option<Duration>) {
        {
            let mut state = self.inner.state.lock();
            if elapsed.is_some() || reason == SessionEndReason::Teardown {
                state.epoch += 1;
            }
            state.peak_probability = 0.0;
            state.transcription_status = TranscriptionStatus::Idle;
        }

        let ai_state = &self.inner.services.ai_state;
        if matches!(ai_state.state(), AiState::Interrupted | AiState::Listening) {
            ai_state.set_state(AiState::Idle);
        }

        if let Some(elapsed) = elapsed {
            tracing::info!("{} after {:?}", reason.description(), elapsed);
            self.inner.events.emit(VoiceEvent::SessionChanged {
                previous: SessionPhase::Active,
                new: SessionPhase::NoSession,
                reason: Some(reason),
            });
        } else {
            tracing::debug!("{} with no active session", reason.description());
        }
        self.inner.events.emit(VoiceEvent::TranscriptionStatusChanged {
            status: TranscriptionStatus::Idle,
        });
    }

    fn arm_timeout(&self, id: Uuid) -> Deadline {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Deadline::arm(self.inner.timeout, async move {
            if let Some(inner) = weak.upgrade() {
                SessionController { inner }.on_timeout(id);
            }
        })
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.inner.state.lock().epoch == attempt
    }

    /// Apply `update` only if `attempt` is still the current epoch
    fn commit<F>(&self, attempt: u64, update: F) -> bool
    where
        F: FnOnce(&mut ControllerState),
    {
        let mut state = self.inner.state.lock();
        if state.epoch != attempt {
            return false;
        }
        update(&mut state);
        true
    }

    fn publish_status(&self, status: TranscriptionStatus) {
        self.inner
            .events
            .emit(VoiceEvent::TranscriptionStatusChanged { status });
    }

    async fn process_utterance(&self, attempt: u64, audio: Vec<f32>) {
        let services = &self.inner.services;
        let transcriber = self.inner.transcriber.read().clone();

        let text = match transcriber.transcribe(&audio).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                let error = VoiceError::Transcription(e.to_string());
                if !self.commit(attempt, |st| {
                    st.transcription_status = TranscriptionStatus::Error
                }) {
                    tracing::debug!("Dropping stale transcription failure: {}", error);
                    return;
                }
                tracing::error!("[{}] {}", error.kind(), error);
                services.ai_state.set_state(AiState::Idle);
                services.notifier.notify(Notification::failure(&error));
                self.publish_status(TranscriptionStatus::Error);
                return;
            }
        };

        if text.is_empty() {
            if self.commit(attempt, |st| {
                st.transcription_status = TranscriptionStatus::Idle
            }) {
                tracing::info!("Transcription was empty, nothing to send");
                services.ai_state.set_state(AiState::Idle);
                self.publish_status(TranscriptionStatus::Idle);
            }
            return;
        }

        let committed = self.commit(attempt, |st| {
            st.last_transcription = Some(text.clone());
            st.transcription_status = TranscriptionStatus::Complete;
        });
        if !committed {
            tracing::debug!("Dropping stale transcription ({} chars)", text.len());
            return;
        }
        tracing::info!("Transcription complete ({} chars)", text.len());
        self.publish_status(TranscriptionStatus::Complete);

        let sent = services
            .dispatcher
            .send(OutboundMessage::text_input(text), Priority::High)
            .await;

        if !self.is_current(attempt) {
            tracing::debug!("Session superseded while sending; leaving AI state alone");
            return;
        }

        match sent {
            Ok(()) => services.ai_state.set_state(AiState::ThinkingSpeaking),
            Err(e) => {
                let error = VoiceError::Dispatch(e.to_string());
                tracing::error!("[{}] {}", error.kind(), error);
                services.ai_state.set_state(AiState::Idle);
                services.notifier.notify(Notification::failure(&error));
            }
        }
    }
}
