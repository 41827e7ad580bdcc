//! Wake and termination phrase detection
//!
//! Detection is lexical: a fragment matches when its normalized text contains
//! one of the accepted surface forms of a phrase. Each phrase carries
//! ASCII-folded spellings to tolerate recognition drift.

/// Accepted spellings of the wake phrase
pub const DEFAULT_WAKE_PHRASES: &[&str] = &[
    "hey asistan",
    "hey assistant",
    "heyasistan",
    "he asistan",
    "merhaba asistan",
    "hey asis",
    "heyasis",
];

/// Accepted spellings of the termination phrase
pub const DEFAULT_TERMINATION_PHRASES: &[&str] = &[
    "görüşürüz",
    "gorusuruz",
    "toplantıyı bitir",
    "toplantiyi bitir",
];

/// Which intent a phrase set recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseIntent {
    /// Start talking to the assistant
    Wake,
    /// End the conversation
    Terminate,
}

/// Normalized surface forms for one intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseSet {
    phrases: Vec<String>,
}

impl PhraseSet {
    /// Create a phrase set, normalizing and dropping empty entries
    #[must_use]
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();

        Self { phrases }
    }

    /// Built-in wake phrases
    #[must_use]
    pub fn wake() -> Self {
        Self::new(DEFAULT_WAKE_PHRASES)
    }

    /// Built-in termination phrases
    #[must_use]
    pub fn termination() -> Self {
        Self::new(DEFAULT_TERMINATION_PHRASES)
    }

    /// The normalized phrases
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// First phrase contained in `text`, if any
    #[must_use]
    pub fn find(&self, text: &str) -> Option<&str> {
        let normalized = normalize(text);
        self.phrases
            .iter()
            .find(|p| normalized.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Remove a leading phrase and the separators after it
    ///
    /// Returns the text unchanged if it does not contain a phrase. Text
    /// before the phrase (recognizer noise) is dropped along with it.
    #[must_use]
    pub fn strip_leading(&self, text: &str) -> String {
        let lower = text.to_lowercase();

        // Longest match first so "hey assistant" wins over "hey asis"
        let mut candidates: Vec<&String> = self.phrases.iter().collect();
        candidates.sort_by_key(|p| std::cmp::Reverse(p.len()));

        for phrase in candidates {
            if let Some(pos) = lower.find(phrase.as_str()) {
                // Lowercasing can change byte lengths, so only slice the
                // original when the boundary is valid there too
                let end = pos + phrase.len();
                let rest = if lower.len() == text.len() && text.is_char_boundary(end) {
                    &text[end..]
                } else {
                    &lower[end..]
                };
                return rest
                    .trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.')
                    .to_string();
            }
        }

        text.to_string()
    }
}

/// Stateless matcher for wake and termination phrases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseDetector {
    wake: PhraseSet,
    termination: PhraseSet,
}

impl Default for PhraseDetector {
    fn default() -> Self {
        Self::new(PhraseSet::wake(), PhraseSet::termination())
    }
}

impl PhraseDetector {
    /// Create a detector from explicit phrase sets
    #[must_use]
    pub fn new(wake: PhraseSet, termination: PhraseSet) -> Self {
        tracing::debug!(
            wake = ?wake.phrases(),
            termination = ?termination.phrases(),
            "phrase detector initialized"
        );
        Self { wake, termination }
    }

    /// Check `text` for a phrase of the given intent
    #[must_use]
    pub fn detect(&self, text: &str, intent: PhraseIntent) -> bool {
        matches(text, self.set(intent))
    }

    /// Check `text` for a wake phrase
    #[must_use]
    pub fn is_wake(&self, text: &str) -> bool {
        self.detect(text, PhraseIntent::Wake)
    }

    /// Check `text` for a termination phrase
    #[must_use]
    pub fn is_termination(&self, text: &str) -> bool {
        self.detect(text, PhraseIntent::Terminate)
    }

    /// Phrase set for an intent
    #[must_use]
    pub const fn set(&self, intent: PhraseIntent) -> &PhraseSet {
        match intent {
            PhraseIntent::Wake => &self.wake,
            PhraseIntent::Terminate => &self.termination,
        }
    }
}

/// Whether the normalized `text` contains any phrase of `set`
#[must_use]
pub fn matches(text: &str, set: &PhraseSet) -> bool {
    set.find(text).is_some()
}

/// Lowercase and trim
#[must_use]
pub fn normalize(text: &str) -> String {
    text.to_lowercase().trim().to_string()
}
