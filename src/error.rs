//! Error types for Colloquy

use thiserror::Error;

/// Result type alias for Colloquy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a voice conversation
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access was refused
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No speech-recognition engine is available
    #[error("speech recognition unsupported: {0}")]
    EngineUnsupported(String),

    /// Transient recognition-engine failure
    #[error("recognition engine error: {0}")]
    Engine(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Response generation failed
    #[error("response error: {0}")]
    Response(String),

    /// Audio playback failed
    #[error("playback error: {0}")]
    Playback(String),

    /// Transcript webhook delivery failed
    #[error("webhook error: {0}")]
    Webhook(String),

    /// Conversation session is gone (controller stopped)
    #[error("session error: {0}")]
    Session(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error ends the session and needs user action to retry
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::EngineUnsupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_permission_and_engine_support_are_fatal() {
        assert!(Error::PermissionDenied("denied".to_string()).is_fatal());
        assert!(Error::EngineUnsupported("none".to_string()).is_fatal());
        assert!(!Error::Engine("network".to_string()).is_fatal());
        assert!(!Error::Response("500".to_string()).is_fatal());
        assert!(!Error::Playback("device".to_string()).is_fatal());
    }
}
