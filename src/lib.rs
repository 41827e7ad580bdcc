//! Colloquy - turn-taking voice conversations with an AI assistant
//!
//! This library provides the pieces of a hands-free voice chat:
//! - Speech capture that survives recognition engines ending on their own
//! - Lexical wake and termination phrase detection
//! - A turn-taking controller deciding when the user has finished speaking
//! - Response generation, speech synthesis and playback collaborators
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Conversation Session                 │
//! │   start / stop / end  │  snapshot  │  chat events    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn Controller                      │
//! │  Capture Session │ Phrase Detector │ Silence Timer   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Collaborators                        │
//! │  Recognition engine │ Responder │ TTS │ Playback     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod meeting;
pub mod responder;
pub mod voice;
pub mod webhook;

pub use config::Config;
pub use conversation::{
    ChatMessage, Collaborators, ControllerConfig, ConversationEvent, ConversationSession,
    SessionHandle, Snapshot, TurnState,
};
pub use error::{Error, Result};
pub use meeting::MeetingData;
pub use responder::ChatResponder;
pub use webhook::TranscriptWebhook;
