//! Turn-taking conversation
//!
//! The controller decides, from the transcript fragments of the capture
//! session, when the user has finished a turn, asks the response generator
//! for a reply, speaks it with the microphone suppressed and listens again.

mod controller;
mod pipeline;
mod session;
mod state;

pub use controller::{
    Collaborators, Command, ControllerConfig, DEFAULT_APOLOGY, DEFAULT_FAREWELL, DEFAULT_GREETING,
    Diagnostics, Messages, TerminationPolicy, TurnConfig, TurnController,
};
pub use pipeline::{
    AudioSink, NoSynthesis, NullSink, Reply, ResponseGenerator, ResponseRequest,
    SpeechSynthesizer,
};
pub use session::{ConversationSession, SessionHandle};
pub use state::{ChatMessage, ConversationEvent, Role, Snapshot, TurnState, render_transcript};
