//! Configuration management for Colloquy
//!
//! Values are layered: environment variables, then the TOML file, then
//! built-in defaults.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use self::file::ColloquyConfigFile;
use crate::conversation::{ControllerConfig, Messages, TerminationPolicy, TurnConfig};
use crate::responder::LlmConfig;
use crate::voice::engine::EngineOptions;
use crate::voice::phrase::{PhraseDetector, PhraseSet};
use crate::voice::session::RestartPolicy;
use crate::voice::{SttProvider, TtsProvider};
use crate::webhook::DEFAULT_TIMEOUT;
use crate::{Error, Result};

/// Colloquy configuration
#[derive(Debug)]
pub struct Config {
    /// Turn timing and gating
    pub turn: TurnConfig,

    /// Speech capture configuration
    pub capture: CaptureConfig,

    /// Wake and termination phrases
    pub phrases: PhraseDetector,

    /// Greeting, farewell and apology
    pub messages: Messages,

    /// Chat model settings
    pub llm: LlmConfig,

    /// Voice processing configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Meeting JSON document providing context
    pub meeting_path: Option<PathBuf>,

    /// Transcript webhook, if configured
    pub webhook: Option<WebhookConfig>,
}

/// Speech capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Engine restart policy
    pub restart: RestartPolicy,

    /// Recognition locale
    pub locale: String,
}

/// Voice processing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// TTS backend
    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1", "eleven_monolingual_v1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// STT backend for the microphone engine
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// Audio window transcribed at a time
    pub stt_window: Duration,

    /// Play synthesized speech on the default output device
    pub playback: bool,
}

/// Transcript webhook configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Endpoint receiving the transcript
    pub url: String,

    /// Request timeout
    pub timeout: Duration,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat, Whisper and TTS)
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,
}

impl ApiKeys {
    /// `OpenAI` key or a config error naming the variable to set
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key is not configured
    pub fn openai(&self) -> Result<SecretString> {
        required(self.openai.as_ref(), "OPENAI_API_KEY")
    }

    /// `ElevenLabs` key
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key is not configured
    pub fn elevenlabs(&self) -> Result<SecretString> {
        required(self.elevenlabs.as_ref(), "ELEVENLABS_API_KEY")
    }

    /// Deepgram key
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key is not configured
    pub fn deepgram(&self) -> Result<SecretString> {
        required(self.deepgram.as_ref(), "DEEPGRAM_API_KEY")
    }
}

fn required(key: Option<&SecretString>, var: &str) -> Result<SecretString> {
    key.map(|k| SecretString::from(k.expose_secret().to_owned()))
        .ok_or_else(|| Error::Config(format!("{var} is not set")))
}

/// Wrap a non-empty key
fn secret(value: Option<String>) -> Option<SecretString> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// An explicit `path` must exist and parse; the default file is optional.
    ///
    /// # Errors
    ///
    /// Returns error if the explicit file is unreadable or a value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };
        Self::from_file_config(fc, |name| std::env::var(name).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a value is invalid
    pub fn from_file_config<F>(fc: ColloquyConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_u64 = |name: &str| -> Result<Option<u64>> {
            env(name)
                .map(|v| {
                    v.trim()
                        .parse()
                        .map_err(|_| Error::Config(format!("{name} must be an integer: {v}")))
                })
                .transpose()
        };

        // Turn config (env > toml > default)
        let defaults = TurnConfig::default();
        let termination_during_response = fc
            .turn
            .termination_during_response
            .as_deref()
            .map(TerminationPolicy::parse)
            .transpose()?
            .unwrap_or_default();
        let turn = TurnConfig {
            silence: env_u64("COLLOQUY_SILENCE_MS")?
                .or(fc.turn.silence_ms)
                .map_or(defaults.silence, Duration::from_millis),
            resume_delay: fc
                .turn
                .resume_delay_ms
                .map_or(defaults.resume_delay, Duration::from_millis),
            farewell_grace: fc
                .turn
                .farewell_grace_ms
                .map_or(defaults.farewell_grace, Duration::from_millis),
            interim_resets_silence: fc
                .turn
                .interim_resets_silence
                .unwrap_or(defaults.interim_resets_silence),
            require_wake_phrase: fc
                .turn
                .require_wake_phrase
                .unwrap_or(defaults.require_wake_phrase),
            termination_during_response,
        };
        if turn.silence.is_zero() {
            return Err(Error::Config("turn.silence_ms must be positive".to_string()));
        }

        // Capture config (env > toml > default)
        let policy = RestartPolicy::default();
        let capture = CaptureConfig {
            restart: RestartPolicy {
                delay: fc
                    .capture
                    .restart_delay_ms
                    .map_or(policy.delay, Duration::from_millis),
                quiet_period: fc
                    .capture
                    .quiet_period_ms
                    .map_or(policy.quiet_period, Duration::from_millis),
                quiet_backoff: fc
                    .capture
                    .quiet_backoff_factor
                    .unwrap_or(policy.quiet_backoff),
                max_attempts: fc
                    .capture
                    .max_restart_attempts
                    .unwrap_or(policy.max_attempts),
            },
            locale: env("COLLOQUY_LOCALE")
                .or(fc.capture.locale)
                .unwrap_or_else(|| EngineOptions::default().locale),
        };

        // Phrase sets (toml > built-in)
        let wake = fc.phrases.wake.map_or_else(PhraseSet::wake, PhraseSet::new);
        let termination = fc
            .phrases
            .termination
            .map_or_else(PhraseSet::termination, PhraseSet::new);
        if wake.phrases().is_empty() || termination.phrases().is_empty() {
            return Err(Error::Config(
                "phrase sets must contain at least one phrase".to_string(),
            ));
        }
        let phrases = PhraseDetector::new(wake, termination);

        let default_messages = Messages::default();
        let messages = Messages {
            greeting: fc.messages.greeting.unwrap_or(default_messages.greeting),
            farewell: fc.messages.farewell.unwrap_or(default_messages.farewell),
            apology: fc.messages.apology.unwrap_or(default_messages.apology),
        };

        let default_llm = LlmConfig::default();
        let llm = LlmConfig {
            model: env("COLLOQUY_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(default_llm.model),
            temperature: fc.llm.temperature.unwrap_or(default_llm.temperature),
            max_tokens: fc.llm.max_tokens.unwrap_or(default_llm.max_tokens),
            api_url: fc.llm.api_url.unwrap_or(default_llm.api_url),
        };

        // Voice config (env > toml > default)
        let tts_provider = fc
            .voice
            .tts_provider
            .as_deref()
            .map(TtsProvider::parse)
            .transpose()?
            .unwrap_or(TtsProvider::OpenAI);
        let stt_provider = fc
            .voice
            .stt_provider
            .as_deref()
            .map(SttProvider::parse)
            .transpose()?
            .unwrap_or(SttProvider::Whisper);
        let voice = VoiceConfig {
            tts_provider,
            tts_model: env("COLLOQUY_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| match tts_provider {
                    TtsProvider::OpenAI => "tts-1".to_string(),
                    TtsProvider::ElevenLabs => "eleven_multilingual_v2".to_string(),
                }),
            tts_voice: env("COLLOQUY_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| tts_provider.default_voice().to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0),
            stt_provider,
            stt_model: env("COLLOQUY_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| match stt_provider {
                    SttProvider::Whisper => "whisper-1".to_string(),
                    SttProvider::Deepgram => "nova-2".to_string(),
                }),
            stt_window: Duration::from_millis(fc.voice.stt_window_ms.unwrap_or(2500)),
            playback: fc.voice.playback.unwrap_or(true),
        };
        if voice.stt_window.is_zero() {
            return Err(Error::Config(
                "voice.stt_window_ms must be positive".to_string(),
            ));
        }

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: secret(env("OPENAI_API_KEY").or(fc.api_keys.openai)),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
            deepgram: secret(env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram)),
        };

        let meeting_path = env("COLLOQUY_MEETING_PATH")
            .or(fc.meeting.path)
            .map(PathBuf::from);

        let webhook = env("COLLOQUY_WEBHOOK_URL")
            .or(fc.webhook.url)
            .filter(|url| !url.trim().is_empty())
            .map(|url| WebhookConfig {
                url,
                timeout: fc
                    .webhook
                    .timeout_secs
                    .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
            });

        Ok(Self {
            turn,
            capture,
            phrases,
            messages,
            llm,
            voice,
            api_keys,
            meeting_path,
            webhook,
        })
    }

    /// Controller settings derived from this configuration
    #[must_use]
    pub fn controller_config(&self, greet: bool) -> ControllerConfig {
        ControllerConfig {
            turn: self.turn.clone(),
            messages: self.messages.clone(),
            phrases: self.phrases.clone(),
            restart: self.capture.restart.clone(),
            engine: EngineOptions {
                locale: self.capture.locale.clone(),
                ..EngineOptions::default()
            },
            greet,
        }
    }
}
