//! Collaborators the controller calls out to
//!
//! Response generation, speech synthesis and playback are all asynchronous
//! and may fail; the controller absorbs every failure into a transition.

use async_trait::async_trait;

use super::state::ChatMessage;
use crate::Result;

/// Everything the response generator sees for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRequest {
    /// The finalized user utterance
    pub user_text: String,
    /// Meeting context at the time the turn finalized
    pub context: String,
    /// Chat log before this turn
    pub history: Vec<ChatMessage>,
}

/// A generated reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Text to append to the chat log
    pub text: String,
    /// Pre-synthesized audio; synthesized by the controller when absent
    pub audio: Option<Vec<u8>>,
}

impl Reply {
    /// A text-only reply
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            audio: None,
        }
    }
}

/// Produces the assistant's answer to a user turn
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a reply
    ///
    /// # Errors
    ///
    /// Returns `Error::Response` (or a transport error) on failure
    async fn generate(&self, request: ResponseRequest) -> Result<Reply>;
}

/// Turns text into playable audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`; `None` means there is nothing to play
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>>;
}

/// Plays synthesized audio
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio`, resolving when playback ends
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the device fails
    async fn play(&self, audio: Vec<u8>) -> Result<()>;
}

/// Synthesizer that never produces audio
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSynthesis;

#[async_trait]
impl SpeechSynthesizer for NoSynthesis {
    async fn synthesize(&self, _text: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Sink that discards audio
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        tracing::trace!(bytes = audio.len(), "audio discarded");
        Ok(())
    }
}
