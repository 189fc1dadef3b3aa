//! Voice input orchestration
//!
//! Turns speech-detection events into utterance sessions, hands captured audio
//! to transcription, and forwards the text to the conversational backend.
//!
//! ## Session States
//!
//! ```text
//!              start (processing enabled)
//! ┌───────────┐ ─────────────────────────► ┌────────┐
//! │ NoSession │                            │ Active │
//! └───────────┘ ◄───────────────────────── └────────┘
//!    end (transcribe) / misfire / 30s timeout / teardown
//! ```
//!
//! A start event while a session is active is logged and ignored. Frame
//! events only update the peak probability.
//!
//! ## Engagement
//!
//! Two independent flags:
//!
//! - **engine running**: a detection engine exists and is capturing
//! - **processing enabled**: detected speech is acted upon
//!
//! The engine can run muted so unmuting is instantaneous. Changing detection
//! thresholds or the transcription backend while running rebuilds the engine
//! after a short delay.
//!
//! ## Events
//!
//! Observers subscribe to [`VoiceEvent`]s:
//!
//! - `session_changed` - session phase transitions with the end reason
//! - `transcription_status_changed` - status of the latest utterance
//! - `engagement_changed` - engine running / processing enabled changed

pub mod engagement;
pub mod engine;
pub mod events;
pub mod readiness;
pub mod session;
pub mod state;
pub mod timer;

pub use engagement::{
    AutoStartPhase, EngagementManager, EngagementState, EngagementStatus, AUTO_START_SETTLE,
    RESTART_DELAY,
};
pub use engine::{DetectionEngine, EngineConfig, EngineEvent, EngineEventSender, EngineFactory};
pub use events::VoiceEvent;
pub use readiness::{ChannelState, ReadinessSnapshot};
pub use session::{SessionController, SessionSnapshot, SESSION_TIMEOUT};
pub use state::{AiState, SessionEndReason, SessionPhase, TranscriptionStatus};
