use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use colloquy::config::file::config_file_path;
use colloquy::conversation::{
    AudioSink, Collaborators, ConversationEvent, ConversationSession, NoSynthesis,
    NullSink, SpeechSynthesizer,
};
use colloquy::voice::phrase::PhraseIntent;
use colloquy::webhook::session_transcript;
use colloquy::voice::{
    AllowAllGate, AudioCapture, AudioPlayback, ConsoleEngineFactory, CpalMicrophoneGate,
    EngineFactory, MicrophoneGate, SpeechToText, SttEngineFactory, SttProvider, TextToSpeech,
    TtsProvider, rms,
};
use colloquy::{ChatResponder, Config, MeetingData, TranscriptWebhook};

/// Colloquy - hands-free voice conversations with a meeting assistant
#[derive(Parser)]
#[command(name = "colloquy", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/colloquy/config.toml)
    #[arg(short, long, env = "COLLOQUY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one voice chat session (default)
    Chat(ChatArgs),
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Merhaba! Bu bir ses sentezi denemesidir.")]
        text: String,
    },
    /// Print the effective wake and termination phrases
    Phrases,
    /// Print the config file location
    ConfigPath,
}

#[derive(Args, Default)]
struct ChatArgs {
    /// Where transcripts come from
    #[arg(long, value_enum, default_value_t)]
    engine: EngineKind,

    /// Start listening without the greeting
    #[arg(long)]
    no_greeting: bool,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum EngineKind {
    /// Microphone transcribed by the configured STT provider
    #[default]
    Stt,
    /// Transcript lines typed on stdin
    Console,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,colloquy=info",
        1 => "info,colloquy=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Chat(ChatArgs::default()));

    if let Command::ConfigPath = command {
        match config_file_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("(no home directory found)"),
        }
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match command {
        Command::Chat(args) => chat(config, args).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestTts { text } => test_tts(&config, &text).await,
        Command::Phrases => {
            print_phrases(&config);
            Ok(())
        }
        Command::ConfigPath => Ok(()),
    }
}

/// Run one conversation until it ends or Ctrl-C
async fn chat(config: Config, args: ChatArgs) -> anyhow::Result<()> {
    let context = match &config.meeting_path {
        Some(path) => MeetingData::load(path)?.context().to_string(),
        None => String::new(),
    };

    let (engines, gate): (Arc<dyn EngineFactory>, Arc<dyn MicrophoneGate>) = match args.engine {
        EngineKind::Console => {
            println!("Type what you would say. ~text is interim, !end ends the engine,");
            println!("!error <kind> reports an engine error. Ctrl-C stops.\n");
            (Arc::new(ConsoleEngineFactory::stdin()), Arc::new(AllowAllGate))
        }
        EngineKind::Stt => {
            let stt = build_stt(&config)?;
            (
                Arc::new(SttEngineFactory::new(stt, config.voice.stt_window)?),
                Arc::new(CpalMicrophoneGate),
            )
        }
    };

    let responder = ChatResponder::new(
        config.api_keys.openai()?,
        config.llm.clone(),
        &config.capture.locale,
    )?;

    let synthesizer: Arc<dyn SpeechSynthesizer> = match build_tts(&config) {
        Ok(tts) => Arc::new(tts),
        Err(e) => {
            tracing::warn!(error = %e, "speech synthesis unavailable, replies are text only");
            Arc::new(NoSynthesis)
        }
    };

    let sink: Arc<dyn AudioSink> = if config.voice.playback {
        match AudioPlayback::new() {
            Ok(playback) => Arc::new(playback),
            Err(e) => {
                tracing::warn!(error = %e, "audio output unavailable, playback disabled");
                Arc::new(NullSink)
            }
        }
    } else {
        Arc::new(NullSink)
    };

    let collaborators = Collaborators {
        engines,
        gate,
        responder: Arc::new(responder),
        synthesizer,
        sink,
    };

    let mut session = ConversationSession::spawn(
        config.controller_config(!args.no_greeting),
        collaborators,
        context,
    );
    let mut events = session
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("conversation events already taken"))?;
    session.start()?;

    let mut transcript = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConversationEvent::Ended { transcript: log, meeting_transcript }) => {
                    transcript = Some(session_transcript(&meeting_transcript, &log));
                    break;
                }
                Some(event) => print_event(&event),
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                println!();
                tracing::info!("interrupted, stopping conversation");
                break;
            }
        }
    }

    session.shutdown().await?;
    while let Ok(event) = events.try_recv() {
        if let ConversationEvent::Ended {
            transcript: log,
            meeting_transcript,
        } = event
        {
            transcript = Some(session_transcript(&meeting_transcript, &log));
        }
    }

    if let (Some(webhook), Some(text)) = (&config.webhook, transcript) {
        deliver_transcript(&webhook.url, webhook.timeout, &text).await;
    }

    Ok(())
}

/// Post the transcript; failures only log
async fn deliver_transcript(url: &str, timeout: Duration, transcript: &str) {
    if transcript.trim().is_empty() {
        return;
    }

    let result = match TranscriptWebhook::new(url, timeout) {
        Ok(webhook) => webhook.send(transcript).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "transcript delivery failed");
    }
}

fn print_event(event: &ConversationEvent) {
    match event {
        ConversationEvent::Message(message) => println!("{}: {}", message.role, message.text),
        ConversationEvent::StateChanged(state) => println!("  [{state}]"),
        ConversationEvent::WakePhrase => println!("  [wake phrase]"),
        ConversationEvent::Terminated => println!("  [termination phrase]"),
        ConversationEvent::PermissionDenied(reason) => {
            eprintln!("Microphone permission denied: {reason}");
        }
        ConversationEvent::Failed(reason) => eprintln!("Speech capture failed: {reason}"),
        ConversationEvent::Ended { .. } => {}
    }
}

fn build_stt(config: &Config) -> colloquy::Result<SpeechToText> {
    let stt = match config.voice.stt_provider {
        SttProvider::Whisper => {
            SpeechToText::new_whisper(config.api_keys.openai()?, config.voice.stt_model.clone())?
        }
        SttProvider::Deepgram => {
            SpeechToText::new_deepgram(config.api_keys.deepgram()?, config.voice.stt_model.clone())?
        }
    };
    Ok(stt.with_locale(&config.capture.locale))
}

fn build_tts(config: &Config) -> colloquy::Result<TextToSpeech> {
    match config.voice.tts_provider {
        TtsProvider::OpenAI => TextToSpeech::new_openai(
            config.api_keys.openai()?,
            config.voice.tts_voice.clone(),
            config.voice.tts_speed,
            config.voice.tts_model.clone(),
        ),
        TtsProvider::ElevenLabs => TextToSpeech::new_elevenlabs(
            config.api_keys.elevenlabs()?,
            config.voice.tts_voice.clone(),
            config.voice.tts_model.clone(),
        ),
    }
}

fn print_phrases(config: &Config) {
    println!("Wake phrases:");
    for phrase in config.phrases.set(PhraseIntent::Wake).phrases() {
        println!("  {phrase}");
    }
    println!("Termination phrases:");
    for phrase in config.phrases.set(PhraseIntent::Terminate).phrases() {
        println!("  {phrase}");
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    CpalMicrophoneGate.request().await?;

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    println!("Sample rate: {} Hz", colloquy::voice::SAMPLE_RATE);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = build_tts(config)?;

    println!("Synthesizing speech...");
    let mp3_data = tts.synthesize_mp3(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    let playback = AudioPlayback::new()?;
    playback.play(mp3_data).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
