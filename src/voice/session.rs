//! Speech capture session
//!
//! Owns one lifecycle of the recognition engine. Recognition engines tend to
//! end on their own (silence, network hiccups, browser-style session limits),
//! so the session restarts them transparently until it is explicitly closed.
//!
//! Restart policy:
//! - an unexpected end or transient error schedules a restart after
//!   `RestartPolicy::delay`, stretched by `quiet_backoff` once nothing has
//!   been heard for `quiet_period`
//! - only one restart is ever pending, so an error followed by an end
//!   restarts once
//! - after `max_attempts` restarts without a fragment the engine instance is
//!   torn down and recreated instead of started again
//! - "not-allowed" disables restarts and surfaces a permission error

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::engine::{
    EngineErrorKind, EngineEvent, EngineFactory, EngineOptions, EngineSignal, EngineSink,
    RecognitionEngine, RecognitionResult,
};
use crate::{Error, Result};

/// Asks for microphone access before capture starts
#[async_trait]
pub trait MicrophoneGate: Send + Sync {
    /// Request access
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` if access is refused
    async fn request(&self) -> Result<()>;
}

/// Gate that always grants access (for engines that need no microphone)
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGate;

#[async_trait]
impl MicrophoneGate for AllowAllGate {
    async fn request(&self) -> Result<()> {
        Ok(())
    }
}

/// Timing and bounds for automatic engine restarts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Delay before restarting an engine that ended unexpectedly
    pub delay: Duration,
    /// Quiet time after which restarts slow down
    pub quiet_period: Duration,
    /// Multiplier applied to `delay` after `quiet_period` of silence
    pub quiet_backoff: u32,
    /// Restarts allowed before the engine instance is recreated
    pub max_attempts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            quiet_period: Duration::from_secs(10),
            quiet_backoff: 2,
            max_attempts: 10,
        }
    }
}

/// A transcript chunk delivered to the session owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    /// Transcript text
    pub text: String,
    /// Whether the engine will revise this text further
    pub is_final: bool,
    /// When the fragment was received
    pub timestamp: DateTime<Utc>,
}

impl TranscriptFragment {
    /// Create a fragment stamped with the current time
    #[must_use]
    pub fn new(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
            timestamp: Utc::now(),
        }
    }
}

/// What the session reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// A transcript fragment
    Fragment(TranscriptFragment),
    /// The engine started (true) or stopped (false) listening
    Listening(bool),
    /// Microphone access was refused; capture is closed
    PermissionDenied(String),
    /// The engine was started again after an unexpected end
    Restarted {
        /// Restart attempt since the last fragment
        attempt: u32,
    },
    /// The engine instance was torn down and created anew
    Recreated,
    /// The engine could not be recreated; capture is closed
    Failed(String),
}

/// Proof that capture started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    /// Generation of the engine instance that was started
    pub generation: u64,
}

struct LiveEngine {
    generation: u64,
    engine: Box<dyn RecognitionEngine>,
}

/// One capture lifecycle of the recognition engine
pub struct CaptureSession {
    factory: Arc<dyn EngineFactory>,
    gate: Arc<dyn MicrophoneGate>,
    options: EngineOptions,
    policy: RestartPolicy,

    live: Option<LiveEngine>,
    generation: u64,
    tx: mpsc::UnboundedSender<EngineSignal>,
    rx: mpsc::UnboundedReceiver<EngineSignal>,
    queued: VecDeque<CaptureEvent>,

    active: bool,
    should_restart: bool,
    engine_listening: bool,
    fresh_instance: bool,
    restart_attempts: u32,
    restart_at: Option<Instant>,
    last_activity: Instant,
    permission_error: Option<String>,
}

impl CaptureSession {
    /// Create a closed capture session
    #[must_use]
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        gate: Arc<dyn MicrophoneGate>,
        options: EngineOptions,
        policy: RestartPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            factory,
            gate,
            options,
            policy,
            live: None,
            generation: 0,
            tx,
            rx,
            queued: VecDeque::new(),
            active: false,
            should_restart: false,
            engine_listening: false,
            fresh_instance: false,
            restart_attempts: 0,
            restart_at: None,
            last_activity: Instant::now(),
            permission_error: None,
        }
    }

    /// Request microphone access and start a new engine instance
    ///
    /// A denied request is recorded and returned; it is never retried.
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` or `Error::EngineUnsupported`
    pub async fn open(&mut self) -> Result<Started> {
        let gate = Arc::clone(&self.gate);
        if let Err(e) = gate.request().await {
            self.deny(&e);
            return Err(e);
        }
        self.activate()
    }

    /// Start a new engine instance without asking the gate again
    ///
    /// Any prior instance is aborted first.
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineUnsupported` if no engine can be created
    pub fn activate(&mut self) -> Result<Started> {
        self.permission_error = None;
        self.restart_at = None;

        let generation = match self.spawn_engine() {
            Ok(generation) => generation,
            Err(e) => {
                self.active = false;
                self.should_restart = false;
                return Err(e);
            }
        };

        self.active = true;
        self.should_restart = true;
        self.restart_attempts = 0;
        self.last_activity = Instant::now();

        tracing::debug!(generation, "capture session opened");
        Ok(Started { generation })
    }

    /// Record a refused permission request
    pub fn deny(&mut self, error: &Error) {
        tracing::error!(error = %error, "microphone access denied");
        self.permission_error = Some(error.to_string());
        self.active = false;
        self.should_restart = false;
    }

    /// Stop capturing: disable restarts and abort the engine
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        self.should_restart = false;
        self.active = false;
        self.engine_listening = false;
        self.restart_at = None;
        self.queued.clear();

        if let Some(mut live) = self.live.take() {
            live.engine.abort();
            tracing::debug!(generation = live.generation, "capture session closed");
        }
    }

    /// Wait for the next event for the owner
    ///
    /// Lifecycle events and restarts are handled internally. Cancel safe.
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(event);
            }

            let restart_at = self.restart_at;
            let restart_due = async move {
                match restart_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                signal = self.rx.recv() => match signal {
                    Some(signal) => self.handle_signal(signal),
                    None => return None,
                },
                () = restart_due => {
                    self.restart_at = None;
                    self.restart();
                }
            }
        }
    }

    /// Whether the session is open (capturing or about to restart)
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the engine reported that it is listening right now
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.active && self.engine_listening
    }

    /// Whether an engine instance exists
    #[must_use]
    pub const fn has_engine(&self) -> bool {
        self.live.is_some()
    }

    /// Restarts since the last fragment or fresh start
    #[must_use]
    pub const fn restart_attempts(&self) -> u32 {
        self.restart_attempts
    }

    /// Whether a restart is scheduled
    #[must_use]
    pub const fn restart_pending(&self) -> bool {
        self.restart_at.is_some()
    }

    /// When a fragment was last seen (or the session opened)
    #[must_use]
    pub const fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// The last permission error, cleared by the next successful start
    #[must_use]
    pub fn permission_error(&self) -> Option<&str> {
        self.permission_error.as_deref()
    }

    /// Gate used by [`CaptureSession::open`]
    #[must_use]
    pub fn gate(&self) -> Arc<dyn MicrophoneGate> {
        Arc::clone(&self.gate)
    }

    /// Abort any live instance, then create and start a new one
    fn spawn_engine(&mut self) -> Result<u64> {
        if let Some(mut previous) = self.live.take() {
            previous.engine.abort();
            tracing::debug!(generation = previous.generation, "aborted previous engine");
        }
        self.engine_listening = false;

        self.generation += 1;
        let generation = self.generation;
        let sink = EngineSink::new(generation, self.tx.clone());
        let mut engine = self.factory.create(sink, &self.options)?;
        engine.start()?;

        self.live = Some(LiveEngine { generation, engine });
        self.fresh_instance = true;
        Ok(generation)
    }

    fn handle_signal(&mut self, signal: EngineSignal) {
        let current = self.live.as_ref().map(|l| l.generation);
        if current != Some(signal.generation) {
            tracing::trace!(
                generation = signal.generation,
                event = ?signal.event,
                "ignoring event from stale engine"
            );
            return;
        }

        match signal.event {
            EngineEvent::Started => {
                self.engine_listening = true;
                if self.fresh_instance {
                    self.fresh_instance = false;
                    self.restart_attempts = 0;
                }
                tracing::debug!(generation = signal.generation, "engine started");
                self.queued.push_back(CaptureEvent::Listening(true));
            }
            EngineEvent::Results(results) => {
                self.restart_attempts = 0;
                self.last_activity = Instant::now();
                self.queued.extend(fold_results(&results).map(CaptureEvent::Fragment));
            }
            EngineEvent::Ended => {
                self.engine_listening = false;
                tracing::debug!(generation = signal.generation, "engine ended");
                self.queued.push_back(CaptureEvent::Listening(false));
                self.schedule_restart();
            }
            EngineEvent::Error(kind) => self.handle_error(kind),
        }
    }

    fn handle_error(&mut self, kind: EngineErrorKind) {
        match kind {
            EngineErrorKind::NotAllowed => {
                let reason = "microphone access refused by engine";
                self.deny(&Error::PermissionDenied(reason.to_string()));
                self.restart_at = None;
                if let Some(mut live) = self.live.take() {
                    live.engine.abort();
                }
                self.engine_listening = false;
                self.queued.push_back(CaptureEvent::PermissionDenied(reason.to_string()));
            }
            EngineErrorKind::NoSpeech => {
                tracing::debug!("no speech detected");
            }
            EngineErrorKind::Aborted => {
                tracing::debug!("engine aborted");
            }
            kind @ (EngineErrorKind::Network
            | EngineErrorKind::AudioCapture
            | EngineErrorKind::Other(_)) => {
                tracing::warn!(error = %kind, "recognition engine error");
                self.schedule_restart();
            }
        }
    }

    fn schedule_restart(&mut self) {
        if !self.should_restart {
            return;
        }

        let mut delay = self.policy.delay;
        if self.last_activity.elapsed() >= self.policy.quiet_period {
            delay *= self.policy.quiet_backoff.max(1);
        }

        tracing::trace!(?delay, "restart scheduled");
        self.restart_at = Some(Instant::now() + delay);
    }

    fn restart(&mut self) {
        if !self.should_restart {
            return;
        }

        self.restart_attempts += 1;
        if self.restart_attempts > self.policy.max_attempts || self.live.is_none() {
            self.recreate();
            return;
        }

        let attempt = self.restart_attempts;
        let started = self.live.as_mut().map(|live| live.engine.start());
        match started {
            Some(Ok(())) => {
                tracing::debug!(attempt, "engine restarted");
                self.queued.push_back(CaptureEvent::Restarted { attempt });
            }
            Some(Err(e)) => {
                tracing::warn!(attempt, error = %e, "engine restart failed");
                self.schedule_restart();
            }
            None => {}
        }
    }

    fn recreate(&mut self) {
        tracing::warn!(
            attempts = self.restart_attempts,
            "restart bound exceeded, recreating engine"
        );

        match self.spawn_engine() {
            Ok(generation) => {
                self.restart_attempts = 0;
                tracing::debug!(generation, "engine recreated");
                self.queued.push_back(CaptureEvent::Recreated);
            }
            Err(e) => {
                tracing::error!(error = %e, "engine recreation failed");
                self.active = false;
                self.should_restart = false;
                self.queued.push_back(CaptureEvent::Failed(e.to_string()));
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fold one results event into at most one final and one interim fragment
///
/// Finals come first, matching the order in which they were spoken.
fn fold_results(results: &[RecognitionResult]) -> impl Iterator<Item = TranscriptFragment> {
    let mut final_text = String::new();
    let mut interim_text = String::new();

    for result in results {
        let target = if result.is_final {
            &mut final_text
        } else {
            &mut interim_text
        };
        let transcript = result.transcript().trim();
        if transcript.is_empty() {
            continue;
        }
        if !target.is_empty() {
            target.push(' ');
        }
        target.push_str(transcript);
    }

    let final_fragment = (!final_text.is_empty()).then(|| TranscriptFragment::new(final_text, true));
    let interim_fragment =
        (!interim_text.is_empty()).then(|| TranscriptFragment::new(interim_text, false));

    final_fragment.into_iter().chain(interim_fragment)
}
