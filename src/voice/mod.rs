//! Voice processing module
//!
//! Speech capture (recognition engines and the restarting capture session),
//! phrase detection, the turn silence timer, and the audio collaborators
//! used to speak replies.

pub mod engine;
pub mod phrase;
pub mod session;
pub mod silence;

mod capture;
mod console;
mod playback;
mod stt;
mod tts;

pub use capture::{AudioCapture, CpalMicrophoneGate, SAMPLE_RATE, rms, samples_to_wav};
pub use console::{ConsoleEngineFactory, parse_line};
pub use engine::{
    EngineErrorKind, EngineEvent, EngineFactory, EngineOptions, EngineSignal, EngineSink,
    RecognitionEngine, RecognitionResult,
};
pub use phrase::{PhraseDetector, PhraseIntent, PhraseSet};
pub use playback::{AudioPlayback, DecodedAudio, decode_mp3, resample};
pub use session::{
    AllowAllGate, CaptureEvent, CaptureSession, MicrophoneGate, RestartPolicy, Started,
    TranscriptFragment,
};
pub use silence::{DEFAULT_SILENCE, SilenceTimer, Ticket};
pub use stt::{SpeechToText, SttEngineFactory, SttProvider};
pub use tts::{TextToSpeech, TtsProvider};
