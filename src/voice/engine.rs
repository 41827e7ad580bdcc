//! Speech-recognition engine contract
//!
//! An engine turns microphone audio into transcript results. It is driven
//! with `start`/`stop`/`abort` and reports everything it does through an
//! [`EngineSink`], the single ordered channel its owner consumes.

use std::fmt;

use tokio::sync::mpsc;

use crate::Result;

/// Options applied to every engine instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Recognition locale (e.g. "tr-TR")
    pub locale: String,
    /// Keep recognizing after the first result
    pub continuous: bool,
    /// Emit provisional results while the user speaks
    pub interim_results: bool,
    /// Alternatives requested per result
    pub max_alternatives: u8,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            locale: "tr-TR".to_string(),
            continuous: true,
            interim_results: true,
            max_alternatives: 1,
        }
    }
}

/// One recognition result with its alternatives, best first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Candidate transcripts, most likely first
    pub alternatives: Vec<String>,
    /// Whether the engine will revise this result further
    pub is_final: bool,
}

impl RecognitionResult {
    /// A final result with a single alternative
    #[must_use]
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            alternatives: vec![text.into()],
            is_final: true,
        }
    }

    /// An interim result with a single alternative
    #[must_use]
    pub fn interim_text(text: impl Into<String>) -> Self {
        Self {
            alternatives: vec![text.into()],
            is_final: false,
        }
    }

    /// Best transcript of this result
    #[must_use]
    pub fn transcript(&self) -> &str {
        self.alternatives.first().map_or("", String::as_str)
    }
}

/// Error kinds reported by an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Microphone access refused
    NotAllowed,
    /// Nothing was said for a while
    NoSpeech,
    /// Recognition backend unreachable
    Network,
    /// Instance aborted by its owner
    Aborted,
    /// Audio device failed
    AudioCapture,
    /// Anything else
    Other(String),
}

impl EngineErrorKind {
    /// Parse an engine error string (`not-allowed`, `no-speech`, ...)
    #[must_use]
    pub fn parse(kind: &str) -> Self {
        match kind.trim() {
            "not-allowed" => Self::NotAllowed,
            "no-speech" => Self::NoSpeech,
            "network" => Self::Network,
            "aborted" => Self::Aborted,
            "audio-capture" => Self::AudioCapture,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAllowed => write!(f, "not-allowed"),
            Self::NoSpeech => write!(f, "no-speech"),
            Self::Network => write!(f, "network"),
            Self::Aborted => write!(f, "aborted"),
            Self::AudioCapture => write!(f, "audio-capture"),
            Self::Other(kind) => write!(f, "{kind}"),
        }
    }
}

/// Lifecycle and result events emitted by an engine instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The instance started listening
    Started,
    /// New or revised results
    Results(Vec<RecognitionResult>),
    /// The instance stopped listening
    Ended,
    /// The instance failed
    Error(EngineErrorKind),
}

/// An engine event tagged with the instance that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSignal {
    /// Generation of the producing instance
    pub generation: u64,
    /// The event
    pub event: EngineEvent,
}

/// Write end of the ordered event channel handed to each engine instance
#[derive(Debug, Clone)]
pub struct EngineSink {
    generation: u64,
    tx: mpsc::UnboundedSender<EngineSignal>,
}

impl EngineSink {
    /// Create a sink for the instance with the given generation
    #[must_use]
    pub const fn new(generation: u64, tx: mpsc::UnboundedSender<EngineSignal>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the instance this sink belongs to
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Emit an event; returns false once the owner has gone away
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx
            .send(EngineSignal {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A running recognition engine instance
pub trait RecognitionEngine: Send {
    /// Begin (or resume) recognition
    ///
    /// # Errors
    ///
    /// Returns error if the instance cannot start, e.g. it is already running
    fn start(&mut self) -> Result<()>;

    /// Stop gracefully; pending audio may still produce results
    fn stop(&mut self);

    /// Stop immediately and discard pending audio
    fn abort(&mut self);
}

/// Creates recognition engine instances
pub trait EngineFactory: Send + Sync {
    /// Create a new, not yet started, instance writing to `sink`
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineUnsupported` if no engine is available
    fn create(
        &self,
        sink: EngineSink,
        options: &EngineOptions,
    ) -> Result<Box<dyn RecognitionEngine>>;
}
