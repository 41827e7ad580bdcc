//! Turn state, chat records and what the controller publishes

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the conversation is in the turn-taking cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No session running
    #[default]
    Idle,
    /// Capture open, nothing heard this turn
    Listening,
    /// Collecting the user's utterance
    Accumulating,
    /// Waiting for the response generator; capture suppressed
    Thinking,
    /// Assistant audio playing; capture suppressed
    Speaking,
    /// Farewell spoken, waiting to tear down
    Ending,
}

impl TurnState {
    /// Whether fragments are consumed in this state
    #[must_use]
    pub const fn accepts_speech(self) -> bool {
        matches!(self, Self::Listening | Self::Accumulating)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Accumulating => "accumulating",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Ending => "ending",
        };
        f.write_str(name)
    }
}

/// Who said a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the assistant
    User,
    /// The assistant
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// One entry of the chat log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker
    pub role: Role,
    /// What was said
    pub text: String,
    /// When it was appended
    pub at: DateTime<Utc>,
}

impl ChatMessage {
    /// A user message stamped now
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            at: Utc::now(),
        }
    }

    /// An assistant message stamped now
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Render a chat log as `role: text` lines
#[must_use]
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read-only view of the controller, republished on every change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Current turn state
    pub state: TurnState,
    /// Whether capture is open and the engine is listening
    pub is_listening: bool,
    /// Live text of the turn in progress
    pub current_partial_text: String,
    /// Whether the user is mid-utterance
    pub is_user_speaking: bool,
    /// Whether the user muted the microphone
    pub is_muted: bool,
    /// Last permission failure, cleared on the next successful start
    pub permission_error: Option<String>,
    /// Speech overheard while waiting for the wake phrase
    pub meeting_transcript: String,
}

/// Ordered notifications from the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A chat message was appended
    Message(ChatMessage),
    /// The turn state changed
    StateChanged(TurnState),
    /// A wake phrase was heard
    WakePhrase,
    /// A termination phrase was heard
    Terminated,
    /// Microphone access was refused; the session is idle
    PermissionDenied(String),
    /// Capture could not be (re)started; the session is idle
    Failed(String),
    /// The conversation finished
    Ended {
        /// Full chat log of the session
        transcript: Vec<ChatMessage>,
        /// Speech overheard in passive mode, space separated
        meeting_transcript: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_listening_states_accept_speech() {
        assert!(TurnState::Listening.accepts_speech());
        assert!(TurnState::Accumulating.accepts_speech());
        for state in [
            TurnState::Idle,
            TurnState::Thinking,
            TurnState::Speaking,
            TurnState::Ending,
        ] {
            assert!(!state.accepts_speech(), "{state} should not accept speech");
        }
    }

    #[test]
    fn renders_transcript_lines() {
        let log = vec![
            ChatMessage::assistant("Merhaba!"),
            ChatMessage::user("kararlar nelerdi"),
        ];
        assert_eq!(render_transcript(&log), "assistant: Merhaba!\nuser: kararlar nelerdi");
        assert_eq!(render_transcript(&[]), "");
    }

    #[test]
    fn chat_message_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::user("selam")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["text"], "selam");
    }
}
