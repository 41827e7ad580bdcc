//! Shared test fakes
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use colloquy::conversation::{
    AudioSink, Collaborators, ConversationEvent, ConversationSession, ControllerConfig,
    Diagnostics, Reply, ResponseGenerator, ResponseRequest, SpeechSynthesizer,
};
use colloquy::voice::{
    AllowAllGate, EngineErrorKind, EngineEvent, EngineFactory, EngineOptions, EngineSink,
    MicrophoneGate, RecognitionEngine, RecognitionResult,
};
use colloquy::{Error, Result};

/// Let spawned tasks run; with paused time this also advances the clock by 1ms
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[derive(Default)]
struct EngineLog {
    sinks: Vec<(EngineSink, bool)>,
    creates: usize,
    starts: usize,
    aborts: usize,
    unsupported: bool,
}

/// Engine factory whose instances are driven by the test
#[derive(Default)]
pub struct ScriptedEngines {
    log: Arc<Mutex<EngineLog>>,
}

impl ScriptedEngines {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make later `create` calls fail
    pub fn set_unsupported(&self, unsupported: bool) {
        self.log.lock().unwrap().unsupported = unsupported;
    }

    pub fn creates(&self) -> usize {
        self.log.lock().unwrap().creates
    }

    pub fn starts(&self) -> usize {
        self.log.lock().unwrap().starts
    }

    pub fn aborts(&self) -> usize {
        self.log.lock().unwrap().aborts
    }

    /// Instances created and not yet aborted
    pub fn live(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .sinks
            .iter()
            .filter(|(_, aborted)| !aborted)
            .count()
    }

    /// Generation of the newest instance
    pub fn latest_generation(&self) -> Option<u64> {
        self.log
            .lock()
            .unwrap()
            .sinks
            .last()
            .map(|(sink, _)| sink.generation())
    }

    /// Emit from the instance with `generation`, aborted or not
    pub fn emit_from(&self, generation: u64, event: EngineEvent) {
        let log = self.log.lock().unwrap();
        if let Some((sink, _)) = log.sinks.iter().find(|(s, _)| s.generation() == generation) {
            sink.emit(event);
        }
    }

    /// Emit from the newest instance
    pub fn emit(&self, event: EngineEvent) {
        let log = self.log.lock().unwrap();
        if let Some((sink, _)) = log.sinks.last() {
            sink.emit(event);
        }
    }

    pub fn say_final(&self, text: &str) {
        self.emit(EngineEvent::Results(vec![RecognitionResult::final_text(text)]));
    }

    pub fn say_interim(&self, text: &str) {
        self.emit(EngineEvent::Results(vec![RecognitionResult::interim_text(
            text,
        )]));
    }

    pub fn end(&self) {
        self.emit(EngineEvent::Ended);
    }

    pub fn error(&self, kind: EngineErrorKind) {
        self.emit(EngineEvent::Error(kind));
    }
}

impl EngineFactory for ScriptedEngines {
    fn create(
        &self,
        sink: EngineSink,
        _options: &EngineOptions,
    ) -> Result<Box<dyn RecognitionEngine>> {
        let mut log = self.log.lock().unwrap();
        if log.unsupported {
            return Err(Error::EngineUnsupported("scripted".to_string()));
        }
        log.creates += 1;
        log.sinks.push((sink.clone(), false));
        Ok(Box::new(ScriptedEngine {
            sink,
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedEngine {
    sink: EngineSink,
    log: Arc<Mutex<EngineLog>>,
}

impl RecognitionEngine for ScriptedEngine {
    fn start(&mut self) -> Result<()> {
        self.log.lock().unwrap().starts += 1;
        self.sink.emit(EngineEvent::Started);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.emit(EngineEvent::Ended);
    }

    fn abort(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.aborts += 1;
        let generation = self.sink.generation();
        if let Some(entry) = log.sinks.iter_mut().find(|(s, _)| s.generation() == generation) {
            entry.1 = true;
        }
    }
}

/// Gate that refuses access
pub struct DenyGate;

#[async_trait]
impl MicrophoneGate for DenyGate {
    async fn request(&self) -> Result<()> {
        Err(Error::PermissionDenied("blocked in test".to_string()))
    }
}

/// What the scripted responder does with a request
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer with this text after the delay
    Answer(String),
    /// Fail after the delay
    Fail,
    /// Never answer
    Hang,
}

/// Response generator recording every request
pub struct ScriptedResponder {
    behavior: Behavior,
    delay: Duration,
    requests: Mutex<Vec<ResponseRequest>>,
}

impl ScriptedResponder {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Self::delayed(behavior, Duration::ZERO)
    }

    pub fn delayed(behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn answering(text: &str) -> Arc<Self> {
        Self::new(Behavior::Answer(text.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ResponseRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedResponder {
    async fn generate(&self, request: ResponseRequest) -> Result<Reply> {
        self.requests.lock().unwrap().push(request);
        tokio::time::sleep(self.delay).await;

        match &self.behavior {
            Behavior::Answer(text) => Ok(Reply::text(text.clone())),
            Behavior::Fail => Err(Error::Response("API error 500: boom".to_string())),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// Synthesizer that "encodes" text as its bytes
#[derive(Default)]
pub struct RecordingSynthesizer {
    texts: Mutex<Vec<String>>,
}

impl RecordingSynthesizer {
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(Some(text.as_bytes().to_vec()))
    }
}

/// Sink that takes `duration` to play each clip
#[derive(Default)]
pub struct RecordingSink {
    duration: Duration,
    played: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn taking(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            played: Mutex::new(Vec::new()),
        })
    }

    /// Clips whose playback started, decoded back to text
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        self.played
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&audio).into_owned());
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Meeting context every harness session starts with
pub const MEETING_CONTEXT: &str = "Toplantıda bütçe ve takvim konuşuldu.";

/// Compact, timestamp-free rendering of an event for assertions
pub fn describe(event: &ConversationEvent) -> String {
    match event {
        ConversationEvent::Message(message) => format!("{}: {}", message.role, message.text),
        ConversationEvent::StateChanged(state) => format!("state: {state}"),
        ConversationEvent::WakePhrase => "wake".to_string(),
        ConversationEvent::Terminated => "terminated".to_string(),
        ConversationEvent::PermissionDenied(reason) => format!("denied: {reason}"),
        ConversationEvent::Failed(reason) => format!("failed: {reason}"),
        ConversationEvent::Ended { transcript, .. } => format!("ended: {}", transcript.len()),
    }
}

/// Controller config without the greeting
pub fn quiet_config() -> ControllerConfig {
    ControllerConfig {
        greet: false,
        ..ControllerConfig::default()
    }
}

/// A running session wired to fakes
pub struct Harness {
    pub session: ConversationSession,
    pub events: mpsc::UnboundedReceiver<ConversationEvent>,
    pub engines: Arc<ScriptedEngines>,
    pub responder: Arc<ScriptedResponder>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn spawn(config: ControllerConfig, responder: Arc<ScriptedResponder>) -> Self {
        Self::build(config, responder, Arc::new(AllowAllGate), RecordingSink::taking(Duration::ZERO))
    }

    pub fn build(
        config: ControllerConfig,
        responder: Arc<ScriptedResponder>,
        gate: Arc<dyn MicrophoneGate>,
        sink: Arc<RecordingSink>,
    ) -> Self {
        let engines = ScriptedEngines::new();
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let collaborators = Collaborators {
            engines: engines.clone(),
            gate,
            responder: responder.clone(),
            synthesizer: synthesizer.clone(),
            sink: sink.clone(),
        };

        let mut session = ConversationSession::spawn(config, collaborators, MEETING_CONTEXT);
        let events = session.take_events().unwrap();

        Self {
            session,
            events,
            engines,
            responder,
            synthesizer,
            sink,
        }
    }

    /// Start and wait until capture is live
    pub async fn start(&self) {
        self.session.start().unwrap();
        settle().await;
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.session.diagnostics().await.unwrap()
    }

    /// Events received so far, described
    pub fn drain_described(&mut self) -> Vec<String> {
        self.drain().iter().map(describe).collect()
    }

    /// Events received so far
    pub fn drain(&mut self) -> Vec<ConversationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
