//! Meeting context document

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A recorded meeting the assistant answers questions about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingData {
    /// Meeting title
    #[serde(default)]
    pub title: String,
    /// Meeting date as written by the recorder
    #[serde(default)]
    pub date: String,
    /// Who attended
    #[serde(default)]
    pub participants: Vec<String>,
    /// Transcript text passed to the response generator
    #[serde(default)]
    pub content: String,
}

impl MeetingData {
    /// Load a meeting from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid meeting JSON
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read meeting {}: {e}", path.display()))
        })?;
        let meeting: Self = serde_json::from_str(&raw)?;

        tracing::info!(
            path = %path.display(),
            title = %meeting.title,
            participants = meeting.participants.len(),
            "loaded meeting"
        );
        Ok(meeting)
    }

    /// Context text for response generation
    #[must_use]
    pub fn context(&self) -> &str {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_meeting_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"title":"Bütçe","date":"2025-03-01","participants":["Ayşe","Mehmet"],"content":"Bütçe onaylandı."}}"#
        )
        .unwrap();

        let meeting = MeetingData::load(file.path()).unwrap();
        assert_eq!(meeting.title, "Bütçe");
        assert_eq!(meeting.participants, vec!["Ayşe", "Mehmet"]);
        assert_eq!(meeting.context(), "Bütçe onaylandı.");
    }

    #[test]
    fn missing_fields_default() {
        let meeting: MeetingData = serde_json::from_str(r#"{"content":"x"}"#).unwrap();
        assert!(meeting.title.is_empty());
        assert!(meeting.participants.is_empty());
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = MeetingData::load(Path::new("/nonexistent/meeting.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
