//! Speech-to-text (STT) processing
//!
//! [`SpeechToText`] transcribes WAV clips through Whisper or Deepgram.
//! [`SttEngineFactory`] turns it into a recognition engine: a capture thread
//! records the microphone in fixed windows and every window that contains
//! speech is transcribed and reported as a final result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use tokio::runtime::Handle;

use super::capture::{AudioCapture, SAMPLE_RATE, rms, samples_to_wav};
use super::engine::{
    EngineErrorKind, EngineEvent, EngineFactory, EngineOptions, EngineSink, RecognitionEngine,
    RecognitionResult,
};
use crate::{Error, Result};

/// Windows quieter than this are not sent for transcription
const SPEECH_RMS_THRESHOLD: f32 = 0.01;

/// How often the capture thread checks for stop requests
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    /// `OpenAI` Whisper
    Whisper,
    /// Deepgram listen API
    Deepgram,
}

impl SttProvider {
    /// Parse a provider name ("whisper", "deepgram")
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unknown names
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    language: Option<String>,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language: None,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language: None,
            provider: SttProvider::Deepgram,
        })
    }

    /// Hint the spoken language from a locale such as "tr-TR"
    #[must_use]
    pub fn with_locale(mut self, locale: &str) -> Self {
        self.language = language_of(locale);
        self
    }

    /// Language hint sent with each request
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - WAV audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let mut url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );
        if let Some(language) = &self.language {
            url.push_str("&language=");
            url.push_str(language);
        }

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Token {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Two-letter language code of a locale ("tr-TR" -> "tr")
fn language_of(locale: &str) -> Option<String> {
    let language = locale.split(['-', '_']).next()?.trim().to_lowercase();
    (!language.is_empty()).then_some(language)
}

/// Creates microphone engines backed by a [`SpeechToText`] service
pub struct SttEngineFactory {
    transcriber: Arc<SpeechToText>,
    runtime: Handle,
    window: Duration,
}

impl SttEngineFactory {
    /// Create a factory bound to the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty window and `Error::Engine` if
    /// called outside a tokio runtime
    pub fn new(transcriber: SpeechToText, window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(Error::Config("STT window must be positive".to_string()));
        }
        let runtime = Handle::try_current().map_err(|e| Error::Engine(e.to_string()))?;
        Ok(Self {
            transcriber: Arc::new(transcriber),
            runtime,
            window,
        })
    }
}

impl EngineFactory for SttEngineFactory {
    fn create(
        &self,
        sink: EngineSink,
        options: &EngineOptions,
    ) -> Result<Box<dyn RecognitionEngine>> {
        tracing::debug!(
            generation = sink.generation(),
            locale = %options.locale,
            window_ms = self.window.as_millis(),
            "creating STT engine"
        );
        Ok(Box::new(SttEngine {
            sink,
            transcriber: Arc::clone(&self.transcriber),
            runtime: self.runtime.clone(),
            window: self.window,
            worker: None,
        }))
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Windowed microphone recognizer
struct SttEngine {
    sink: EngineSink,
    transcriber: Arc<SpeechToText>,
    runtime: Handle,
    window: Duration,
    worker: Option<Worker>,
}

impl RecognitionEngine for SttEngine {
    fn start(&mut self) -> Result<()> {
        if self
            .worker
            .as_ref()
            .is_some_and(|w| !w.thread.is_finished())
        {
            return Err(Error::Engine("recognition already started".to_string()));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let aborted = Arc::new(AtomicBool::new(false));
        let job = CaptureJob {
            sink: self.sink.clone(),
            transcriber: Arc::clone(&self.transcriber),
            runtime: self.runtime.clone(),
            window: self.window,
            stop: Arc::clone(&stop),
            aborted: Arc::clone(&aborted),
        };

        let thread = std::thread::Builder::new()
            .name(format!("stt-capture-{}", self.sink.generation()))
            .spawn(move || job.run())?;

        self.worker = Some(Worker {
            stop,
            aborted,
            thread,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.stop.store(true, Ordering::Relaxed);
        }
    }

    fn abort(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.aborted.store(true, Ordering::Relaxed);
            worker.stop.store(true, Ordering::Relaxed);
        }
    }
}

impl Drop for SttEngine {
    fn drop(&mut self) {
        self.abort();
    }
}

/// State owned by the capture thread
struct CaptureJob {
    sink: EngineSink,
    transcriber: Arc<SpeechToText>,
    runtime: Handle,
    window: Duration,
    stop: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
}

impl CaptureJob {
    fn run(self) {
        let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!(error = %e, "failed to open microphone");
                let kind = match e {
                    Error::PermissionDenied(_) => EngineErrorKind::NotAllowed,
                    _ => EngineErrorKind::AudioCapture,
                };
                self.emit(EngineEvent::Error(kind));
                self.emit(EngineEvent::Ended);
                return;
            }
        };

        self.emit(EngineEvent::Started);

        while self.wait_window() {
            let samples = capture.take_buffer();
            if rms(&samples) < SPEECH_RMS_THRESHOLD {
                continue;
            }

            match self.transcribe(&samples) {
                Ok(text) if !text.trim().is_empty() => {
                    self.emit(EngineEvent::Results(vec![RecognitionResult::final_text(
                        text.trim(),
                    )]));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "transcription failed");
                    self.emit(EngineEvent::Error(EngineErrorKind::Network));
                    break;
                }
            }
        }

        capture.stop();
        self.emit(EngineEvent::Ended);
    }

    /// Sleep for one window; false once stopped
    fn wait_window(&self) -> bool {
        let deadline = Instant::now() + self.window;
        while Instant::now() < deadline {
            if self.stop.load(Ordering::Relaxed) {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        !self.stop.load(Ordering::Relaxed)
    }

    fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        self.runtime.block_on(self.transcriber.transcribe(&wav))
    }

    /// Aborted instances report nothing further
    fn emit(&self, event: EngineEvent) {
        if !self.aborted.load(Ordering::Relaxed) {
            self.sink.emit(event);
        }
    }
}
