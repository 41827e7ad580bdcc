//! Speech capture integration tests
//!
//! Drives the capture session with scripted engines; no audio hardware needed

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use colloquy::voice::{
    AllowAllGate, CaptureEvent, CaptureSession, EngineErrorKind, EngineEvent, EngineOptions,
    RecognitionResult, RestartPolicy, SAMPLE_RATE, parse_line, rms, samples_to_wav,
};

mod common;

use common::{DenyGate, ScriptedEngines};

fn session_with(engines: &Arc<ScriptedEngines>, policy: RestartPolicy) -> CaptureSession {
    CaptureSession::new(
        engines.clone(),
        Arc::new(AllowAllGate),
        EngineOptions::default(),
        policy,
    )
}

/// Next owner event, or `None` if nothing arrives for a minute
async fn next(session: &mut CaptureSession) -> Option<CaptureEvent> {
    tokio::time::timeout(Duration::from_secs(60), session.next_event())
        .await
        .ok()
        .flatten()
}

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_open_starts_engine() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());

    let started = assert_ok!(session.open().await);
    assert_eq!(Some(started.generation), engines.latest_generation());
    assert!(session.is_active());
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));
    assert!(session.is_listening());
    assert_eq!(engines.creates(), 1);
    assert_eq!(engines.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_unexpected_end() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());
    session.open().await.unwrap();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    let ended_at = Instant::now();
    engines.end();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(false)));
    assert!(!session.is_listening());
    assert!(session.restart_pending());

    assert_eq!(
        next(&mut session).await,
        Some(CaptureEvent::Restarted { attempt: 1 })
    );
    let waited = ended_at.elapsed();
    assert!(waited >= Duration::from_millis(100), "{waited:?}");
    assert!(waited < Duration::from_millis(200), "{waited:?}");

    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));
    assert_eq!(engines.creates(), 1);
    assert_eq!(engines.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_slows_down_after_quiet_period() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());
    session.open().await.unwrap();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    tokio::time::sleep(Duration::from_secs(11)).await;

    let ended_at = Instant::now();
    engines.end();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(false)));
    assert_eq!(
        next(&mut session).await,
        Some(CaptureEvent::Restarted { attempt: 1 })
    );
    assert!(ended_at.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_error_then_end_restarts_once() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());
    session.open().await.unwrap();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    engines.error(EngineErrorKind::Network);
    engines.end();

    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(false)));
    assert_eq!(
        next(&mut session).await,
        Some(CaptureEvent::Restarted { attempt: 1 })
    );
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));
    assert_eq!(next(&mut session).await, None);
    assert_eq!(engines.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_speech_does_not_restart() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());
    session.open().await.unwrap();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    engines.error(EngineErrorKind::NoSpeech);
    assert_eq!(next(&mut session).await, None);
    assert!(!session.restart_pending());
    assert_eq!(engines.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recreates_engine_past_restart_bound() {
    let engines = ScriptedEngines::new();
    let policy = RestartPolicy {
        max_attempts: 2,
        ..RestartPolicy::default()
    };
    let mut session = session_with(&engines, policy);
    session.open().await.unwrap();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    for attempt in 1..=2 {
        engines.end();
        assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(false)));
        assert_eq!(
            next(&mut session).await,
            Some(CaptureEvent::Restarted { attempt })
        );
        assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));
    }
    assert_eq!(session.restart_attempts(), 2);

    engines.end();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(false)));
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Recreated));
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    assert_eq!(engines.creates(), 2);
    assert_eq!(engines.aborts(), 1);
    assert_eq!(engines.live(), 1);
    assert_eq!(session.restart_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_recreation_closes_capture() {
    let engines = ScriptedEngines::new();
    let policy = RestartPolicy {
        max_attempts: 0,
        ..RestartPolicy::default()
    };
    let mut session = session_with(&engines, policy);
    session.open().await.unwrap();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    engines.set_unsupported(true);
    engines.end();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(false)));
    assert!(matches!(
        next(&mut session).await,
        Some(CaptureEvent::Failed(_))
    ));
    assert!(!session.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_fragment_resets_restart_counter() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());
    session.open().await.unwrap();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    engines.end();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(false)));
    assert_eq!(
        next(&mut session).await,
        Some(CaptureEvent::Restarted { attempt: 1 })
    );
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));
    assert_eq!(session.restart_attempts(), 1);

    engines.say_final("merhaba");
    match next(&mut session).await {
        Some(CaptureEvent::Fragment(fragment)) => {
            assert_eq!(fragment.text, "merhaba");
            assert!(fragment.is_final);
        }
        other => panic!("expected fragment, got {other:?}"),
    }
    assert_eq!(session.restart_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_results_fold_into_final_then_interim() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());
    session.open().await.unwrap();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    engines.emit(EngineEvent::Results(vec![
        RecognitionResult::final_text("hey asistan"),
        RecognitionResult::interim_text("toplantı"),
    ]));

    let Some(CaptureEvent::Fragment(first)) = next(&mut session).await else {
        panic!("expected final fragment");
    };
    let Some(CaptureEvent::Fragment(second)) = next(&mut session).await else {
        panic!("expected interim fragment");
    };
    assert_eq!((first.text.as_str(), first.is_final), ("hey asistan", true));
    assert_eq!((second.text.as_str(), second.is_final), ("toplantı", false));
}

#[tokio::test(start_paused = true)]
async fn test_denied_gate_never_creates_engine() {
    let engines = ScriptedEngines::new();
    let mut session = CaptureSession::new(
        engines.clone(),
        Arc::new(DenyGate),
        EngineOptions::default(),
        RestartPolicy::default(),
    );

    let err = assert_err!(session.open().await);
    assert!(err.is_fatal());
    assert!(session.permission_error().is_some());
    assert!(!session.is_active());
    assert_eq!(engines.creates(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_not_allowed_disables_restarts() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());
    session.open().await.unwrap();
    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));

    engines.error(EngineErrorKind::NotAllowed);
    engines.end();

    assert!(matches!(
        next(&mut session).await,
        Some(CaptureEvent::PermissionDenied(_))
    ));
    assert_eq!(next(&mut session).await, None);
    assert!(!session.is_active());
    assert!(!session.has_engine());
    assert!(session.permission_error().is_some());
    assert_eq!(engines.starts(), 1);

    // A later explicit start clears the error
    session.activate().unwrap();
    assert!(session.permission_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stale_generation_is_ignored() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());
    let first = session.open().await.unwrap();
    let second = session.activate().unwrap();
    assert!(second.generation > first.generation);
    assert_eq!(engines.aborts(), 1);

    engines.emit_from(
        first.generation,
        EngineEvent::Results(vec![RecognitionResult::final_text("eski")]),
    );
    engines.emit_from(first.generation, EngineEvent::Ended);
    engines.emit_from(
        second.generation,
        EngineEvent::Results(vec![RecognitionResult::final_text("yeni")]),
    );

    assert_eq!(next(&mut session).await, Some(CaptureEvent::Listening(true)));
    match next(&mut session).await {
        Some(CaptureEvent::Fragment(fragment)) => assert_eq!(fragment.text, "yeni"),
        other => panic!("expected fragment, got {other:?}"),
    }
    assert_eq!(next(&mut session).await, None);
    assert!(!session.restart_pending());
}

#[tokio::test(start_paused = true)]
async fn test_close_aborts_and_never_restarts() {
    let engines = ScriptedEngines::new();
    let mut session = session_with(&engines, RestartPolicy::default());
    session.open().await.unwrap();

    session.close();
    session.close();
    assert!(!session.is_active());
    assert!(!session.has_engine());
    assert_eq!(engines.aborts(), 1);

    engines.end();
    assert_eq!(next(&mut session).await, None);
    assert_eq!(engines.starts(), 1);
}

#[test]
fn test_console_lines_map_to_engine_events() {
    assert_eq!(
        parse_line("hey asistan"),
        vec![EngineEvent::Results(vec![RecognitionResult::final_text(
            "hey asistan"
        )])]
    );
    assert_eq!(
        parse_line("~hey"),
        vec![EngineEvent::Results(vec![RecognitionResult::interim_text(
            "hey"
        )])]
    );
    assert_eq!(parse_line("!end"), vec![EngineEvent::Ended]);
    assert_eq!(
        parse_line("!error network"),
        vec![
            EngineEvent::Error(EngineErrorKind::Network),
            EngineEvent::Ended
        ]
    );
}

#[test]
fn test_rms_separates_speech_from_silence() {
    let silence = vec![0.0; SAMPLE_RATE as usize / 10];
    let speech = generate_sine_samples(440.0, 0.1, 0.3);

    assert!(rms(&silence) < 0.001);
    assert!(rms(&speech) > 0.1);
    assert!(rms(&[]).abs() < f32::EPSILON);
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.samples::<i16>().count(), samples.len());
}
