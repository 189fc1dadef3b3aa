//! Engagement manager
//!
//! Owns the single detection engine instance and the two engagement flags.
//! `engine_running` says whether an engine exists and is capturing;
//! `processing_enabled` says whether detected speech is acted upon. The engine
//! can run muted, so unmuting does not pay the cost of building an engine.
//!
//! Engine creation and teardown are serialized through an async mutex around
//! the engine slot. The manager also runs the one-shot auto-start check and
//! restarts the engine when detection settings or the transcription backend
//! change while it is running.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::engine::{event_channel, DetectionEngine, EngineFactory};
use super::events::VoiceEvent;
use super::readiness::ReadinessSnapshot;
use super::session::{SessionController, SessionSnapshot};
use crate::config::{DetectionSettings, SettingsStore, TranscriptionPrefs};
use crate::error::VoiceError;
use crate::services::{Collaborators, Notification, TranscriptionService};

/// Pause between tearing down and rebuilding the engine on a restart
pub const RESTART_DELAY: Duration = Duration::from_millis(500);

/// Settle time before the auto-start check re-evaluates readiness
pub const AUTO_START_SETTLE: Duration = Duration::from_millis(1500);

/// The two independent engagement flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngagementState {
    /// A detection engine exists and is capturing
    pub engine_running: bool,
    /// Detected speech is acted upon
    pub processing_enabled: bool,
}

/// Progress of the once-per-process auto-start routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoStartPhase {
    #[default]
    NotAttempted,
    /// The settle delay is running
    Pending,
    /// The delayed check has run; auto-start will not run again
    Attempted,
}

/// Current status of voice input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementStatus {
    pub engagement: EngagementState,
    /// An engine instance exists (running or paused)
    pub engine_present: bool,
    pub engine_paused: bool,
    pub auto_start: AutoStartPhase,
    pub ready: bool,
    pub session: SessionSnapshot,
}

#[derive(Default)]
struct EngineSlot {
    engine: Option<Box<dyn DetectionEngine>>,
    pump: Option<JoinHandle<()>>,
    paused: bool,
    /// Settings changed while paused; the next resume rebuilds the engine
    stale: bool,
}

impl EngineSlot {
    /// Pause and destroy the engine, stop the event pump
    fn teardown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            if !self.paused {
                if let Err(e) = engine.pause() {
                    tracing::warn!("Failed to pause detection engine: {}", e);
                }
            }
            if let Err(e) = engine.destroy() {
                tracing::warn!("Failed to destroy detection engine: {}", e);
            }
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.paused = false;
        self.stale = false;
    }
}

struct ManagerInner {
    factory: Arc<dyn EngineFactory>,
    controller: SessionController,
    store: Arc<SettingsStore>,
    slot: tokio::sync::Mutex<EngineSlot>,
    state: RwLock<EngagementState>,
    readiness: RwLock<ReadinessSnapshot>,
    auto_start: Mutex<AutoStartPhase>,
    auto_start_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every explicit start/stop/pause so a pending restart can
    /// tell it has been overridden
    intent: AtomicU64,
}

/// Engagement manager
///
/// Cheap to clone; clones share the same engine and flags.
#[derive(Clone)]
pub struct EngagementManager {
    inner: Arc<ManagerInner>,
}

impl EngagementManager {
    /// Creates a manager with a session controller built from `services`
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        services: Collaborators,
        store: Arc<SettingsStore>,
    ) -> Self {
        Self::with_controller(factory, SessionController::new(services), store)
    }

    /// Creates a manager around an existing controller
    ///
    /// Engagement preferences are restored from `store`. The engine always
    /// starts out stopped; only auto-start or an explicit request builds one.
    pub fn with_controller(
        factory: Arc<dyn EngineFactory>,
        controller: SessionController,
        store: Arc<SettingsStore>,
    ) -> Self {
        let prefs = store.snapshot().engagement;
        controller.set_processing_enabled(prefs.processing_enabled);
        tracing::info!(
            "Engagement restored: processing_enabled={}, auto_start_on_init={}, last engine_running={}",
            prefs.processing_enabled,
            prefs.auto_start_on_init,
            prefs.engine_running
        );

        Self {
            inner: Arc::new(ManagerInner {
                factory,
                controller,
                store,
                slot: tokio::sync::Mutex::new(EngineSlot::default()),
                state: RwLock::new(EngagementState {
                    engine_running: false,
                    processing_enabled: prefs.processing_enabled,
                }),
                readiness: RwLock::new(ReadinessSnapshot::default()),
                auto_start: Mutex::new(AutoStartPhase::NotAttempted),
                auto_start_task: Mutex::new(None),
                intent: AtomicU64::new(0),
            }),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.inner.controller
    }

    pub fn store(&self) -> &SettingsStore {
        &self.inner.store
    }

    /// Subscribe to session and engagement events
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.inner.controller.subscribe()
    }

    pub fn state(&self) -> EngagementState {
        *self.inner.state.read()
    }

    pub fn readiness(&self) -> ReadinessSnapshot {
        *self.inner.readiness.read()
    }

    pub fn auto_start_phase(&self) -> AutoStartPhase {
        *self.inner.auto_start.lock()
    }

    /// Current status including the engine slot
    pub async fn status(&self) -> EngagementStatus {
        let (engine_present, engine_paused) = {
            let slot = self.inner.slot.lock().await;
            (slot.engine.is_some(), slot.paused)
        };
        EngagementStatus {
            engagement: self.state(),
            engine_present,
            engine_paused,
            auto_start: self.auto_start_phase(),
            ready: self.readiness().is_ready(),
            session: self.inner.controller.snapshot(),
        }
    }

    fn notify(&self, notification: Notification) {
        self.inner.controller.services().notifier.notify(notification);
    }

    // =========================================================================
    // Engine running
    // =========================================================================

    /// Start or stop the detection engine
    ///
    /// Starting requires the readiness gate to pass. A paused engine is
    /// resumed rather than rebuilt unless its settings went stale.
    pub async fn set_engine_running(&self, running: bool) -> Result<(), VoiceError> {
        self.inner.intent.fetch_add(1, Ordering::SeqCst);

        if !running {
            self.stop_engine().await;
            return Ok(());
        }

        if let Some(reason) = self.readiness().blocking_reason() {
            let error = VoiceError::Configuration(reason.to_string());
            tracing::warn!("[{}] Refusing to start voice detection: {}", error.kind(), reason);
            self.notify(Notification::failure(&error));
            return Err(error);
        }

        self.start_engine().await
    }

    /// Pause capture but keep the engine instance warm
    pub async fn pause_engine(&self) {
        self.inner.intent.fetch_add(1, Ordering::SeqCst);

        let mut slot = self.inner.slot.lock().await;
        if slot.paused {
            return;
        }
        let Some(engine) = slot.engine.as_mut() else {
            return;
        };

        if let Err(e) = engine.pause() {
            tracing::warn!("Failed to pause detection engine, tearing it down: {}", e);
            // Pause was already attempted; go straight to destroy
            slot.paused = true;
            slot.teardown();
        } else {
            slot.paused = true;
            tracing::info!("Voice detection paused");
        }
        self.inner.controller.force_reset();
        let change = self.mark_running(&slot, false);
        drop(slot);

        self.publish(change);
    }

    async fn start_engine(&self) -> Result<(), VoiceError> {
        let mut slot = self.inner.slot.lock().await;
        let result = self.bring_up(&mut slot).await;
        let change = self.mark_running(&slot, result.is_ok());
        drop(slot);

        self.publish(change);
        result.map_err(|cause| self.engine_failed(cause))
    }

    /// Resume, rebuild or create the engine; the caller holds the slot lock
    async fn bring_up(&self, slot: &mut EngineSlot) -> anyhow::Result<()> {
        if slot.engine.is_some() {
            if !slot.paused {
                tracing::debug!("Voice detection already running");
                return Ok(());
            }
            if !slot.stale {
                let resumed = match slot.engine.as_mut() {
                    Some(engine) => engine.start(),
                    None => Ok(()),
                };
                if let Err(e) = resumed {
                    slot.teardown();
                    return Err(e);
                }
                slot.paused = false;
                tracing::info!("Voice detection resumed");
                return Ok(());
            }
            tracing::info!("Detection settings changed while paused, rebuilding engine");
            slot.teardown();
        }

        let config = self.inner.store.snapshot().detection.to_engine_config();
        let (sender, receiver) = event_channel();

        let mut engine = self.inner.factory.create(config, sender).await?;
        if let Err(e) = engine.start() {
            if let Err(destroy_err) = engine.destroy() {
                tracing::warn!("Failed to destroy engine after start failure: {}", destroy_err);
            }
            return Err(e);
        }

        slot.pump = Some(self.inner.controller.spawn_event_pump(receiver));
        slot.engine = Some(engine);
        slot.paused = false;
        slot.stale = false;
        tracing::info!("Voice detection started with {:?}", config);
        Ok(())
    }

    async fn stop_engine(&self) {
        let mut slot = self.inner.slot.lock().await;
        let had_engine = slot.engine.is_some();
        slot.teardown();
        self.inner.controller.force_reset();
        let change = self.mark_running(&slot, false);
        drop(slot);

        if had_engine {
            tracing::info!("Voice detection stopped");
        }
        self.publish(change);
    }

    fn engine_failed(&self, cause: anyhow::Error) -> VoiceError {
        let error = VoiceError::EngineCreation(cause.to_string());
        tracing::error!("[{}] {}", error.kind(), error);
        self.notify(Notification::failure(&error));
        error
    }

    /// Record whether the engine runs
    ///
    /// Takes the slot so the flag only changes while the slot lock is held
    /// and always agrees with the slot contents. Returns the state to
    /// publish once the lock is released, or None if nothing changed.
    fn mark_running(&self, _slot: &EngineSlot, running: bool) -> Option<EngagementState> {
        let snapshot = {
            let mut state = self.inner.state.write();
            if state.engine_running == running {
                return None;
            }
            state.engine_running = running;
            *state
        };

        if let Err(e) = self
            .inner
            .store
            .update(|cfg| cfg.engagement.engine_running = running)
        {
            tracing::warn!("Failed to persist engine state: {}", e);
        }
        Some(snapshot)
    }

    fn publish(&self, change: Option<EngagementState>) {
        if let Some(state) = change {
            self.inner
                .controller
                .events()
                .emit(VoiceEvent::EngagementChanged { state });
        }
    }

    /// Whether an unpaused engine exists, checked under the slot lock
    ///
    /// A paused engine is marked stale when `mark_stale` is set, so the next
    /// resume rebuilds it.
    async fn engine_live(&self, mark_stale: bool) -> bool {
        let mut slot = self.inner.slot.lock().await;
        match (slot.engine.is_some(), slot.paused) {
            (true, false) => true,
            (true, true) => {
                if mark_stale {
                    slot.stale = true;
                }
                false
            }
            (false, _) => false,
        }
    }

    // =========================================================================
    // Processing enabled
    // =========================================================================

    /// Mute or unmute detected speech; never touches the engine
    pub fn set_processing_enabled(&self, enabled: bool) -> Result<(), VoiceError> {
        self.apply_processing(|_| enabled).map(|_| ())
    }

    /// Flip processing enabled, returning the new value
    ///
    /// Local controls and the remote-control listener both go through here.
    pub fn toggle_processing_enabled(&self) -> Result<bool, VoiceError> {
        self.apply_processing(|current| !current)
    }

    fn apply_processing<F>(&self, decide: F) -> Result<bool, VoiceError>
    where
        F: FnOnce(bool) -> bool,
    {
        let snapshot = {
            let mut state = self.inner.state.write();
            let enabled = decide(state.processing_enabled);
            self.inner
                .store
                .update(|cfg| cfg.engagement.processing_enabled = enabled)?;
            self.inner.controller.set_processing_enabled(enabled);
            state.processing_enabled = enabled;
            *state
        };

        tracing::info!(
            "Voice processing {}",
            if snapshot.processing_enabled {
                "enabled"
            } else {
                "muted"
            }
        );
        self.notify(Notification::info(if snapshot.processing_enabled {
            "Voice input active"
        } else {
            "Voice input muted"
        }));
        self.inner
            .controller
            .events()
            .emit(VoiceEvent::EngagementChanged { state: snapshot });

        Ok(snapshot.processing_enabled)
    }

    // =========================================================================
    // Auto-start
    // =========================================================================

    /// Persist the auto-start preference
    ///
    /// Enabling it while the client is already ready schedules the check
    /// straight away. Must be called from within a tokio runtime.
    pub fn set_auto_start(&self, enabled: bool) -> Result<(), VoiceError> {
        self.inner
            .store
            .update(|cfg| cfg.engagement.auto_start_on_init = enabled)?;
        self.evaluate_auto_start();
        Ok(())
    }

    /// Record the latest external signals and evaluate auto-start
    pub fn update_readiness(&self, snapshot: ReadinessSnapshot) {
        let previous = std::mem::replace(&mut *self.inner.readiness.write(), snapshot);
        if previous.is_ready() != snapshot.is_ready() {
            tracing::debug!("Readiness changed: {}", snapshot.is_ready());
        }
        self.evaluate_auto_start();
    }

    fn evaluate_auto_start(&self) {
        let mut phase = self.inner.auto_start.lock();
        if *phase != AutoStartPhase::NotAttempted {
            return;
        }
        if !self.inner.store.snapshot().engagement.auto_start_on_init {
            return;
        }
        if !self.readiness().is_ready() || self.state().engine_running {
            return;
        }

        *phase = AutoStartPhase::Pending;
        drop(phase);
        tracing::info!("Auto-start scheduled in {:?}", AUTO_START_SETTLE);

        let manager = self.clone();
        let check_at = tokio::time::Instant::now() + AUTO_START_SETTLE;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(check_at).await;
            manager.run_auto_start_check().await;
        });
        *self.inner.auto_start_task.lock() = Some(task);
    }

    async fn run_auto_start_check(&self) {
        *self.inner.auto_start.lock() = AutoStartPhase::Attempted;

        if !self.readiness().is_ready() {
            tracing::info!("Auto-start skipped: client no longer ready");
            return;
        }
        if self.state().engine_running {
            tracing::debug!("Auto-start skipped: engine already running");
            return;
        }

        tracing::info!("Auto-starting voice detection");
        if let Err(e) = self.set_engine_running(true).await {
            tracing::warn!("Auto-start failed: {}", e);
        }
    }

    // =========================================================================
    // Change reactor
    // =========================================================================

    /// Save new detection thresholds, restarting the engine if it runs
    pub async fn update_detection_settings(
        &self,
        settings: DetectionSettings,
    ) -> Result<(), VoiceError> {
        settings.validate()?;
        self.inner
            .store
            .update(|cfg| cfg.detection = settings)?;
        tracing::info!("Detection settings updated: {:?}", settings);

        // Checked under the slot lock: an engine still being built when the
        // settings changed is live by the time the lock is acquired
        if self.engine_live(true).await {
            self.restart_engine().await;
        }
        Ok(())
    }

    /// Record a new transcription backend, restarting the engine if it runs
    ///
    /// When `transcriber` is given, later utterances go to it.
    pub async fn on_transcription_backend_changed(
        &self,
        prefs: TranscriptionPrefs,
        transcriber: Option<Arc<dyn TranscriptionService>>,
    ) -> Result<(), VoiceError> {
        let changed = self.inner.store.snapshot().transcription != prefs;
        if changed {
            self.inner
                .store
                .update(|cfg| cfg.transcription = prefs.clone())?;
        }
        let swapped = transcriber.is_some();
        if let Some(transcriber) = transcriber {
            self.inner.controller.set_transcriber(transcriber);
        }
        if !changed && !swapped {
            return Ok(());
        }

        tracing::info!("Transcription backend changed to {}", prefs.provider);
        if self.engine_live(false).await {
            self.restart_engine().await;
        }
        Ok(())
    }

    /// Stop the engine, wait, and build a fresh one with current settings
    ///
    /// The rebuild is skipped if an explicit start/stop arrives during the
    /// delay.
    pub async fn restart_engine(&self) {
        tracing::info!("Restarting voice detection");
        self.stop_engine().await;
        let intent = self.inner.intent.load(Ordering::SeqCst);

        tokio::time::sleep(RESTART_DELAY).await;

        if self.inner.intent.load(Ordering::SeqCst) != intent {
            tracing::info!("Restart superseded by an explicit engine request");
            return;
        }
        if let Err(e) = self.start_engine().await {
            tracing::warn!("Engine restart failed: {}", e);
        }
    }

    /// Tear everything down ahead of process exit
    pub async fn shutdown(&self) {
        if let Some(task) = self.inner.auto_start_task.lock().take() {
            task.abort();
        }
        self.inner.intent.fetch_add(1, Ordering::SeqCst);
        self.stop_engine().await;
    }
}
