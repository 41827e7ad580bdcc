//! Turn-Taking Controller
//!
//! A single task owns the capture session, the silence timer and every piece
//! of conversation state. Commands, capture events and completions of the
//! work it spawns (permission requests, response generation, speech, delays)
//! all arrive on channels and are handled one at a time, so a transition
//! always completes before the next event is looked at.
//!
//! ```text
//!          start            first fragment          silence
//!   Idle ───────▶ Listening ──────────────▶ Accumulating ──────▶ Thinking
//!    ▲               ▲                          │                   │
//!    │               │ resume delay             │ termination       │ reply
//!    │               └──────────── Speaking ◀───┼───────────────────┘
//!    │    grace                                 ▼
//!    └───────────────────────────────────── Ending
//! ```
//!
//! Every spawned operation carries an id; a completion whose id no longer
//! matches the pending slot (cancelled, superseded, or the session stopped)
//! is discarded.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::pipeline::{AudioSink, Reply, ResponseGenerator, ResponseRequest, SpeechSynthesizer};
use super::state::{ChatMessage, ConversationEvent, Snapshot, TurnState};
use crate::voice::engine::{EngineFactory, EngineOptions};
use crate::voice::phrase::{PhraseDetector, PhraseIntent};
use crate::voice::session::{
    CaptureEvent, CaptureSession, MicrophoneGate, RestartPolicy, TranscriptFragment,
};
use crate::voice::silence::{DEFAULT_SILENCE, SilenceTimer, Ticket};
use crate::{Error, Result};

/// Spoken when a session starts
pub const DEFAULT_GREETING: &str =
    "Merhaba! Ben EnerwiseAi. Toplantı hakkında sorularınız varsa yanıtlamaktan memnuniyet duyarım.";

/// Spoken when a session ends
pub const DEFAULT_FAREWELL: &str = "Toplantı notlarını hazırlıyorum, iyi günler!";

/// Appended when a reply cannot be generated
pub const DEFAULT_APOLOGY: &str = "Üzgünüm, bir hata oluştu.";

/// What a termination phrase heard while a reply is pending does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationPolicy {
    /// Capture stays suppressed; nothing is heard until listening resumes
    #[default]
    Ignore,
    /// Keep capture open while thinking and end the conversation on a
    /// termination phrase, dropping the pending reply
    Cancel,
}

impl TerminationPolicy {
    /// Parse "ignore" or "cancel"
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for anything else
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "cancel" => Ok(Self::Cancel),
            other => Err(Error::Config(format!(
                "unknown termination policy: {other}"
            ))),
        }
    }
}

/// Turn timing and gating
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
    /// Quiet time after the last final fragment that completes a turn
    pub silence: Duration,
    /// Pause between the end of a reply and reopening capture
    pub resume_delay: Duration,
    /// Time the farewell gets before teardown
    pub farewell_grace: Duration,
    /// Re-arm the silence timer on interim fragments as well
    pub interim_resets_silence: bool,
    /// Ignore speech until a wake phrase is heard
    pub require_wake_phrase: bool,
    /// Handling of termination phrases while thinking
    pub termination_during_response: TerminationPolicy,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            silence: DEFAULT_SILENCE,
            resume_delay: Duration::from_millis(500),
            farewell_grace: Duration::from_millis(1500),
            interim_resets_silence: false,
            require_wake_phrase: false,
            termination_during_response: TerminationPolicy::default(),
        }
    }
}

/// Fixed assistant texts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Messages {
    /// Spoken on start; empty to skip
    pub greeting: String,
    /// Spoken on end; empty to skip
    pub farewell: String,
    /// Appended when response generation fails
    pub apology: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            farewell: DEFAULT_FAREWELL.to_string(),
            apology: DEFAULT_APOLOGY.to_string(),
        }
    }
}

/// Everything the controller needs besides its collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Turn timing and gating
    pub turn: TurnConfig,
    /// Greeting, farewell and apology
    pub messages: Messages,
    /// Wake and termination phrases
    pub phrases: PhraseDetector,
    /// Engine restart policy
    pub restart: RestartPolicy,
    /// Engine options
    pub engine: EngineOptions,
    /// Speak the greeting on start
    pub greet: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            turn: TurnConfig::default(),
            messages: Messages::default(),
            phrases: PhraseDetector::default(),
            restart: RestartPolicy::default(),
            engine: EngineOptions::default(),
            greet: true,
        }
    }
}

/// External capabilities the controller drives
#[derive(Clone)]
pub struct Collaborators {
    /// Creates recognition engines
    pub engines: Arc<dyn EngineFactory>,
    /// Microphone permission
    pub gate: Arc<dyn MicrophoneGate>,
    /// Produces replies
    pub responder: Arc<dyn ResponseGenerator>,
    /// Turns replies into audio
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Plays audio
    pub sink: Arc<dyn AudioSink>,
}

/// Requests accepted by the controller
#[derive(Debug)]
pub enum Command {
    /// Start a conversation from `Idle`
    Start,
    /// Stop immediately from any state
    Stop,
    /// Say goodbye and stop, as if a termination phrase was heard
    End,
    /// Cut the assistant's speech short
    Interrupt,
    /// Close the microphone until unmuted
    Mute,
    /// Reopen the microphone
    Unmute,
    /// Replace the meeting context used by later turns
    SetContext(String),
    /// Report internal bookkeeping
    Inspect(oneshot::Sender<Diagnostics>),
}

/// Internal bookkeeping, mostly useful to tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    /// Current turn state
    pub state: TurnState,
    /// Whether the silence timer is armed
    pub silence_pending: bool,
    /// Whether the capture session is open
    pub capture_active: bool,
    /// Whether a recognition engine instance exists
    pub has_engine: bool,
    /// Capture restarts since the last fragment
    pub restart_attempts: u32,
    /// Spawned operations still awaited
    pub pending_tasks: usize,
    /// Chat log length
    pub messages: usize,
}

#[derive(Debug)]
enum Internal {
    Silence(Ticket),
    Permission { id: u64, result: Result<()> },
    Response { id: u64, result: Result<Reply> },
    Spoken { id: u64 },
    ResumeDue { id: u64 },
    GraceElapsed { id: u64 },
}

/// What follows the current speech
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterSpeech {
    OpenCapture,
    Resume,
}

struct Task {
    id: u64,
    handle: JoinHandle<()>,
}

/// Clear the slot if it holds operation `id`
fn take_matching(slot: &mut Option<Task>, id: u64) -> bool {
    if slot.as_ref().is_some_and(|task| task.id == id) {
        *slot = None;
        true
    } else {
        false
    }
}

fn cancel(slot: &mut Option<Task>) {
    if let Some(task) = slot.take() {
        task.handle.abort();
    }
}

/// Join two pieces of speech with a space
fn join(head: &str, tail: &str) -> String {
    format!("{head} {tail}").trim().to_string()
}

/// Synthesize (unless audio is supplied) and play; failures only log
async fn say(
    synthesizer: &dyn SpeechSynthesizer,
    sink: &dyn AudioSink,
    text: &str,
    audio: Option<Vec<u8>>,
) {
    let audio = match audio {
        Some(audio) => Some(audio),
        None => match synthesizer.synthesize(text).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed");
                None
            }
        },
    };

    if let Some(audio) = audio
        && let Err(e) = sink.play(audio).await
    {
        tracing::warn!(error = %e, "playback failed, treating as finished");
    }
}

/// The turn-taking state machine
pub struct TurnController {
    config: ControllerConfig,
    responder: Arc<dyn ResponseGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,

    capture: CaptureSession,
    silence: SilenceTimer<Internal>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    events: mpsc::UnboundedSender<ConversationEvent>,
    snapshot: watch::Sender<Snapshot>,

    state: TurnState,
    utterance: String,
    interim: String,
    woke: bool,
    engaged: bool,
    history: Vec<ChatMessage>,
    context: String,
    heard: String,
    muted: bool,
    permission_error: Option<String>,

    next_id: u64,
    opening: Option<Task>,
    request: Option<Task>,
    speech: Option<Task>,
    after_speech: AfterSpeech,
    resume: Option<Task>,
    grace: Option<Task>,
    farewell: Option<JoinHandle<()>>,
}

impl TurnController {
    /// Create an idle controller publishing to `events` and `snapshot`
    #[must_use]
    pub fn new(
        config: ControllerConfig,
        collaborators: Collaborators,
        context: String,
        events: mpsc::UnboundedSender<ConversationEvent>,
        snapshot: watch::Sender<Snapshot>,
    ) -> Self {
        let capture = CaptureSession::new(
            collaborators.engines,
            collaborators.gate,
            config.engine.clone(),
            config.restart.clone(),
        );
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let silence = SilenceTimer::new(internal_tx.clone(), Internal::Silence);

        Self {
            config,
            responder: collaborators.responder,
            synthesizer: collaborators.synthesizer,
            sink: collaborators.sink,
            capture,
            silence,
            internal_tx,
            internal_rx,
            events,
            snapshot,
            state: TurnState::Idle,
            utterance: String::new(),
            interim: String::new(),
            woke: false,
            engaged: false,
            history: Vec::new(),
            context,
            heard: String::new(),
            muted: false,
            permission_error: None,
            next_id: 0,
            opening: None,
            request: None,
            speech: None,
            after_speech: AfterSpeech::Resume,
            resume: None,
            grace: None,
            farewell: None,
        }
    }

    /// Process commands until the command channel closes, then tear down
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.on_command(command);
                }
                Some(message) = self.internal_rx.recv() => self.on_internal(message),
                Some(event) = self.capture.next_event() => self.on_capture(event),
            }
            self.publish();
        }

        self.stop();
        self.publish();
        tracing::debug!("turn controller stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::End => match self.state {
                TurnState::Idle | TurnState::Ending => {
                    tracing::debug!(state = %self.state, "end ignored");
                }
                _ => {
                    tracing::info!("ending conversation on request");
                    self.begin_ending();
                }
            },
            Command::Interrupt => self.interrupt(),
            Command::Mute => self.mute(),
            Command::Unmute => self.unmute(),
            Command::SetContext(context) => {
                tracing::debug!(chars = context.chars().count(), "meeting context replaced");
                self.context = context;
            }
            Command::Inspect(reply) => {
                let _ = reply.send(self.diagnostics());
            }
        }
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::Silence(ticket) => self.on_silence(ticket),
            Internal::Permission { id, result } => self.on_permission(id, result),
            Internal::Response { id, result } => self.on_response(id, result),
            Internal::Spoken { id } => {
                if take_matching(&mut self.speech, id) {
                    self.finish_speaking();
                }
            }
            Internal::ResumeDue { id } => {
                if take_matching(&mut self.resume, id) {
                    self.resume_listening();
                }
            }
            Internal::GraceElapsed { id } => {
                if take_matching(&mut self.grace, id) {
                    tracing::info!("conversation ended");
                    self.teardown();
                }
            }
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Fragment(fragment) => self.on_fragment(&fragment),
            CaptureEvent::Listening(listening) => {
                tracing::trace!(listening, "capture listening changed");
            }
            CaptureEvent::PermissionDenied(reason) => {
                self.fail(&Error::PermissionDenied(reason));
            }
            CaptureEvent::Restarted { attempt } => {
                tracing::debug!(attempt, "capture restarted");
            }
            CaptureEvent::Recreated => {
                tracing::info!("recognition engine recreated");
            }
            CaptureEvent::Failed(reason) => {
                tracing::error!(error = %reason, "capture failed");
                self.emit(ConversationEvent::Failed(reason));
                self.teardown();
            }
        }
    }

    fn start(&mut self) {
        if self.state != TurnState::Idle {
            tracing::debug!(state = %self.state, "conversation already running");
            return;
        }

        tracing::info!("conversation started");
        self.history.clear();
        self.heard.clear();
        self.engaged = false;

        let greeting = self.config.messages.greeting.clone();
        if self.config.greet && !greeting.trim().is_empty() {
            self.append(ChatMessage::assistant(greeting.clone()));
            self.speak(greeting, None, AfterSpeech::OpenCapture);
        } else {
            self.open_capture();
        }
    }

    fn stop(&mut self) {
        if let Some(farewell) = self.farewell.take() {
            farewell.abort();
        }
        self.teardown();
    }

    fn interrupt(&mut self) {
        if self.state != TurnState::Speaking || self.speech.is_none() {
            tracing::debug!(state = %self.state, "nothing to interrupt");
            return;
        }
        tracing::info!("speech interrupted");
        cancel(&mut self.speech);
        self.finish_speaking();
    }

    fn mute(&mut self) {
        if self.muted {
            return;
        }
        self.muted = true;
        self.capture.close();
        tracing::info!("microphone muted");
    }

    fn unmute(&mut self) {
        if !self.muted {
            return;
        }
        self.muted = false;
        tracing::info!("microphone unmuted");

        if self.state.accepts_speech()
            && !self.capture.is_active()
            && self.opening.is_none()
            && self.resume.is_none()
        {
            self.activate_capture();
        }
    }

    /// Request microphone access, then start capture
    fn open_capture(&mut self) {
        self.set_state(TurnState::Listening);

        cancel(&mut self.opening);
        let id = self.next_id();
        let gate = self.capture.gate();
        let tx = self.internal_tx.clone();
        let handle = tokio::spawn(async move {
            let result = gate.request().await;
            let _ = tx.send(Internal::Permission { id, result });
        });
        self.opening = Some(Task { id, handle });
    }

    fn on_permission(&mut self, id: u64, result: Result<()>) {
        if !take_matching(&mut self.opening, id) {
            return;
        }

        match result {
            Ok(()) => {
                self.permission_error = None;
                if self.muted {
                    tracing::debug!("microphone granted while muted, capture deferred");
                } else if self.state.accepts_speech() {
                    self.activate_capture();
                }
            }
            Err(e) => {
                self.capture.deny(&e);
                self.fail(&e);
            }
        }
    }

    fn activate_capture(&mut self) {
        match self.capture.activate() {
            Ok(started) => {
                tracing::debug!(generation = started.generation, "capture active");
            }
            Err(e) if e.is_fatal() => self.fail(&e),
            Err(e) => {
                tracing::warn!(error = %e, "capture failed to start, retrying");
                self.schedule_resume();
            }
        }
    }

    fn on_fragment(&mut self, fragment: &TranscriptFragment) {
        let text = fragment.text.trim();
        if text.is_empty() {
            return;
        }

        if !self.state.accepts_speech() {
            if self.state == TurnState::Thinking
                && self.config.turn.termination_during_response == TerminationPolicy::Cancel
                && self.config.phrases.is_termination(text)
            {
                tracing::info!("termination heard while thinking, dropping pending reply");
                cancel(&mut self.request);
                self.terminate(text.to_string());
            } else {
                tracing::trace!(
                    state = %self.state,
                    is_final = fragment.is_final,
                    "fragment ignored while capture is suppressed"
                );
            }
            return;
        }

        let is_termination = self.config.phrases.is_termination(text);
        let is_wake = !self.woke && self.config.phrases.is_wake(text);

        if self.state == TurnState::Listening {
            if self.config.turn.require_wake_phrase
                && !self.engaged
                && !is_wake
                && !is_termination
            {
                tracing::trace!("waiting for wake phrase");
                if fragment.is_final {
                    self.overhear(text);
                }
                self.interim = text.to_string();
                return;
            }
            self.interim.clear();
            self.set_state(TurnState::Accumulating);
        }

        if is_wake {
            self.woke = true;
            tracing::info!(text, "wake phrase heard");
            self.emit(ConversationEvent::WakePhrase);
        }

        if is_termination {
            let said = join(&self.utterance, text);
            self.terminate(said);
            return;
        }

        if fragment.is_final {
            self.utterance = join(&self.utterance, text);
            self.interim.clear();
            self.silence.arm(self.config.turn.silence);
        } else {
            text.clone_into(&mut self.interim);
            if self.config.turn.interim_resets_silence {
                self.silence.arm(self.config.turn.silence);
            }
        }
    }

    fn on_silence(&mut self, ticket: Ticket) {
        if !self.silence.claim(ticket) {
            return;
        }
        if self.state != TurnState::Accumulating || self.utterance.is_empty() {
            tracing::trace!(state = %self.state, "silence with nothing to finalize");
            return;
        }
        self.finalize_turn();
    }

    /// Send the accumulated utterance to the response generator
    fn finalize_turn(&mut self) {
        let mut text = std::mem::take(&mut self.utterance);
        self.interim.clear();
        self.woke = false;

        if self.config.turn.require_wake_phrase {
            text = self
                .config
                .phrases
                .set(PhraseIntent::Wake)
                .strip_leading(&text);
        }
        if text.trim().is_empty() {
            // The next turn is the question, wake phrase or not
            tracing::debug!("turn held only the wake phrase");
            self.engaged = self.config.turn.require_wake_phrase;
            self.set_state(TurnState::Listening);
            return;
        }
        self.engaged = false;

        tracing::info!(text = %text, "turn finalized");
        self.silence.cancel();
        if self.config.turn.termination_during_response != TerminationPolicy::Cancel {
            self.capture.close();
        }

        let history = self.history.clone();
        self.set_state(TurnState::Thinking);
        self.append(ChatMessage::user(text.clone()));

        let request = ResponseRequest {
            user_text: text,
            context: self.request_context(),
            history,
        };
        let id = self.next_id();
        let responder = Arc::clone(&self.responder);
        let tx = self.internal_tx.clone();
        let handle = tokio::spawn(async move {
            let result = responder.generate(request).await;
            let _ = tx.send(Internal::Response { id, result });
        });
        self.request = Some(Task { id, handle });
    }

    fn on_response(&mut self, id: u64, result: Result<Reply>) {
        if !take_matching(&mut self.request, id) || self.state != TurnState::Thinking {
            tracing::debug!(id, "late response discarded");
            return;
        }

        match result {
            Ok(Reply { text, audio }) => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    self.append(ChatMessage::assistant(text.clone()));
                }
                self.speak(text, audio, AfterSpeech::Resume);
            }
            Err(e) => {
                tracing::warn!(error = %e, "response generation failed");
                let apology = self.config.messages.apology.clone();
                self.append(ChatMessage::assistant(apology));
                self.schedule_resume();
            }
        }
    }

    /// Suppress capture and play `text` (or the supplied audio)
    fn speak(&mut self, text: String, audio: Option<Vec<u8>>, after: AfterSpeech) {
        self.capture.close();
        self.set_state(TurnState::Speaking);

        cancel(&mut self.speech);
        let id = self.next_id();
        let synthesizer = Arc::clone(&self.synthesizer);
        let sink = Arc::clone(&self.sink);
        let tx = self.internal_tx.clone();
        let handle = tokio::spawn(async move {
            say(synthesizer.as_ref(), sink.as_ref(), &text, audio).await;
            let _ = tx.send(Internal::Spoken { id });
        });
        self.speech = Some(Task { id, handle });
        self.after_speech = after;
    }

    fn finish_speaking(&mut self) {
        match self.after_speech {
            AfterSpeech::OpenCapture => self.open_capture(),
            AfterSpeech::Resume => self.schedule_resume(),
        }
    }

    /// Reopen capture after the output device had time to release
    fn schedule_resume(&mut self) {
        cancel(&mut self.resume);
        let id = self.next_id();
        let delay = self.config.turn.resume_delay;
        let tx = self.internal_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::ResumeDue { id });
        });
        self.resume = Some(Task { id, handle });
    }

    fn resume_listening(&mut self) {
        self.utterance.clear();
        self.interim.clear();
        self.woke = false;
        self.set_state(TurnState::Listening);

        if self.muted {
            tracing::debug!("muted, capture resumes on unmute");
            return;
        }
        self.activate_capture();
    }

    /// Record what the user said and move to `Ending`
    fn terminate(&mut self, said: String) {
        tracing::info!(text = %said, "termination phrase heard");
        self.emit(ConversationEvent::Terminated);
        self.silence.cancel();
        self.utterance.clear();
        self.interim.clear();
        if !said.is_empty() {
            self.append(ChatMessage::user(said));
        }
        self.begin_ending();
    }

    /// Say goodbye without waiting for it, then tear down after the grace
    fn begin_ending(&mut self) {
        self.silence.cancel();
        self.capture.close();
        for slot in [
            &mut self.opening,
            &mut self.request,
            &mut self.speech,
            &mut self.resume,
        ] {
            cancel(slot);
        }
        self.utterance.clear();
        self.interim.clear();
        self.set_state(TurnState::Ending);

        let farewell = self.config.messages.farewell.clone();
        if !farewell.trim().is_empty() {
            self.append(ChatMessage::assistant(farewell.clone()));
            let synthesizer = Arc::clone(&self.synthesizer);
            let sink = Arc::clone(&self.sink);
            if let Some(previous) = self.farewell.replace(tokio::spawn(async move {
                say(synthesizer.as_ref(), sink.as_ref(), &farewell, None).await;
            })) {
                previous.abort();
            }
        }

        cancel(&mut self.grace);
        let id = self.next_id();
        let grace = self.config.turn.farewell_grace;
        let tx = self.internal_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(Internal::GraceElapsed { id });
        });
        self.grace = Some(Task { id, handle });
    }

    /// Fatal error: surface it and go idle
    fn fail(&mut self, error: &Error) {
        tracing::error!(error = %error, "conversation stopped");
        let event = match error {
            Error::PermissionDenied(reason) => {
                self.permission_error = Some(reason.clone());
                ConversationEvent::PermissionDenied(reason.clone())
            }
            other => ConversationEvent::Failed(other.to_string()),
        };
        self.emit(event);
        self.teardown();
    }

    /// Close capture, cancel every timer and pending operation, go idle
    ///
    /// A farewell already playing is left to finish.
    fn teardown(&mut self) {
        self.silence.cancel();
        self.capture.close();
        for slot in [
            &mut self.opening,
            &mut self.request,
            &mut self.speech,
            &mut self.resume,
            &mut self.grace,
        ] {
            cancel(slot);
        }
        self.utterance.clear();
        self.interim.clear();
        self.woke = false;
        self.engaged = false;

        if self.state != TurnState::Idle {
            self.set_state(TurnState::Idle);
            self.emit(ConversationEvent::Ended {
                transcript: self.history.clone(),
                meeting_transcript: self.heard.clone(),
            });
        }
    }

    /// Record speech heard while waiting for the wake phrase
    fn overhear(&mut self, text: &str) {
        self.heard = join(&self.heard, text);
        tracing::trace!(chars = self.heard.chars().count(), "meeting transcript extended");
    }

    /// Meeting context plus everything overheard so far
    fn request_context(&self) -> String {
        let context = self.context.trim();
        match (context.is_empty(), self.heard.is_empty()) {
            (_, true) => context.to_string(),
            (true, false) => self.heard.clone(),
            (false, false) => format!("{context}\n\n{}", self.heard),
        }
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "turn state changed");
        self.state = state;
        self.emit(ConversationEvent::StateChanged(state));
    }

    fn append(&mut self, message: ChatMessage) {
        self.history.push(message.clone());
        self.emit(ConversationEvent::Message(message));
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    const fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_text(&self) -> String {
        if self.state.accepts_speech() {
            join(&self.utterance, &self.interim)
        } else {
            String::new()
        }
    }

    fn diagnostics(&self) -> Diagnostics {
        let pending_tasks = [
            &self.opening,
            &self.request,
            &self.speech,
            &self.resume,
            &self.grace,
        ]
        .into_iter()
        .filter(|slot| slot.is_some())
        .count();

        Diagnostics {
            state: self.state,
            silence_pending: self.silence.is_pending(),
            capture_active: self.capture.is_active(),
            has_engine: self.capture.has_engine(),
            restart_attempts: self.capture.restart_attempts(),
            pending_tasks,
            messages: self.history.len(),
        }
    }

    fn publish(&self) {
        let snapshot = Snapshot {
            state: self.state,
            is_listening: self.capture.is_listening(),
            current_partial_text: self.live_text(),
            is_user_speaking: self.state == TurnState::Accumulating
                && !(self.utterance.is_empty() && self.interim.is_empty()),
            is_muted: self.muted,
            permission_error: self.permission_error.clone(),
            meeting_transcript: self.heard.clone(),
        };

        self.snapshot.send_if_modified(move |current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
