//! TOML configuration file loading
//!
//! Supports `~/.config/colloquy/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ColloquyConfigFile {
    /// Turn timing and gating
    #[serde(default)]
    pub turn: TurnFileConfig,

    /// Speech capture and engine restarts
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Wake and termination phrase overrides
    #[serde(default)]
    pub phrases: PhrasesFileConfig,

    /// Greeting, farewell and apology overrides
    #[serde(default)]
    pub messages: MessagesFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Meeting context source
    #[serde(default)]
    pub meeting: MeetingFileConfig,

    /// Transcript webhook
    #[serde(default)]
    pub webhook: WebhookFileConfig,
}

/// Turn-taking configuration
#[derive(Debug, Default, Deserialize)]
pub struct TurnFileConfig {
    /// Quiet period that completes a turn
    pub silence_ms: Option<u64>,

    /// Pause before listening again after a reply
    pub resume_delay_ms: Option<u64>,

    /// Time the farewell gets before teardown
    pub farewell_grace_ms: Option<u64>,

    /// Re-arm the silence timer on interim fragments
    pub interim_resets_silence: Option<bool>,

    /// Ignore speech until a wake phrase is heard
    pub require_wake_phrase: Option<bool>,

    /// "ignore" or "cancel"
    pub termination_during_response: Option<String>,
}

/// Capture restart configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub restart_delay_ms: Option<u64>,
    pub quiet_period_ms: Option<u64>,
    pub quiet_backoff_factor: Option<u32>,
    pub max_restart_attempts: Option<u32>,

    /// Recognition locale (e.g. "tr-TR")
    pub locale: Option<String>,
}

/// Phrase set overrides
#[derive(Debug, Default, Deserialize)]
pub struct PhrasesFileConfig {
    pub wake: Option<Vec<String>>,
    pub termination: Option<Vec<String>>,
}

/// Fixed assistant texts
#[derive(Debug, Default, Deserialize)]
pub struct MessagesFileConfig {
    pub greeting: Option<String>,
    pub farewell: Option<String>,
    pub apology: Option<String>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4o")
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Completion length cap
    pub max_tokens: Option<u32>,

    /// Chat-completions endpoint
    pub api_url: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "nova")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Audio window transcribed at a time
    pub stt_window_ms: Option<u64>,

    /// Play synthesized speech
    pub playback: Option<bool>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Meeting context configuration
#[derive(Debug, Default, Deserialize)]
pub struct MeetingFileConfig {
    /// Path to a meeting JSON document
    pub path: Option<String>,
}

/// Webhook configuration
#[derive(Debug, Default, Deserialize)]
pub struct WebhookFileConfig {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ColloquyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ColloquyConfigFile {
    let Some(path) = config_file_path() else {
        return ColloquyConfigFile::default();
    };

    if !path.exists() {
        return ColloquyConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ColloquyConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn read_config_file(path: &Path) -> Result<ColloquyConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/colloquy/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("colloquy").join("config.toml"))
}
