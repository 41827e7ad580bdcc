//! End-of-session transcript delivery

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::conversation::{ChatMessage, render_transcript};
use crate::{Error, Result};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Body posted to the webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptPayload {
    /// Meeting transcript, trimmed
    pub transcript: String,
    /// When the payload was built (RFC 3339)
    pub timestamp: String,
}

impl TranscriptPayload {
    /// Build a payload from a transcript
    #[must_use]
    pub fn new(transcript: &str, at: DateTime<Utc>) -> Self {
        Self {
            transcript: transcript.trim().to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// What a finished session delivers
///
/// The overheard meeting transcript when there is one, otherwise the chat
/// log as `role: text` lines.
#[must_use]
pub fn session_transcript(meeting_transcript: &str, messages: &[ChatMessage]) -> String {
    if meeting_transcript.trim().is_empty() {
        render_transcript(messages)
    } else {
        meeting_transcript.trim().to_string()
    }
}

/// Posts finished transcripts to a configured URL
pub struct TranscriptWebhook {
    client: reqwest::Client,
    url: String,
}

impl TranscriptWebhook {
    /// Create a webhook client
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Webhook(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Post a transcript
    ///
    /// # Errors
    ///
    /// Returns `Error::Webhook` if delivery fails
    pub async fn send(&self, transcript: &str) -> Result<()> {
        let payload = TranscriptPayload::new(transcript, Utc::now());

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Webhook(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Webhook(format!("webhook returned {status}: {body}")));
        }

        tracing::info!(
            url = %self.url,
            chars = payload.transcript.len(),
            "transcript delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn payload_trims_transcript_and_stamps_time() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();

        let payload = TranscriptPayload::new("  bütçe onaylandı \n", at);
        assert_eq!(payload.transcript, "bütçe onaylandı");
        assert_eq!(payload.timestamp, "2025-03-01T12:30:00.000Z");

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("transcript").is_some());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn session_transcript_prefers_meeting_transcript() {
        let messages = vec![
            ChatMessage::assistant("Merhaba!"),
            ChatMessage::user("görüşürüz"),
        ];

        assert_eq!(
            session_transcript(" takvim bir hafta kaydı ", &messages),
            "takvim bir hafta kaydı"
        );
        assert_eq!(
            session_transcript("", &messages),
            "assistant: Merhaba!\nuser: görüşürüz"
        );
    }
}
