//! End-to-end playback against the simulated output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use voicenote::{
    DecodeError, EncodedAudioPayload, EngineConfig, PlaybackEngine, PlaybackError,
    PlaybackStatus, SimulatedOutput,
};

fn encode(samples: &[i16]) -> EncodedAudioPayload {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes).into()
}

fn engine_for(payload: EncodedAudioPayload) -> (PlaybackEngine, SimulatedOutput) {
    let output = SimulatedOutput::new();
    let engine =
        PlaybackEngine::with_payload(Arc::new(output.clone()), EngineConfig::default(), payload);
    (engine, output)
}

#[test]
fn one_second_of_silence_plays_to_completion() {
    let (engine, _output) = engine_for(encode(&vec![0; 24_000]));

    engine.play().unwrap();
    thread::sleep(Duration::from_millis(1_100));

    let progress = engine.progress();
    assert!(!progress.is_playing);
    assert_eq!(progress.elapsed_fraction, 1.0);
    assert_eq!(engine.status(), PlaybackStatus::Stopped);
}

#[test]
fn replay_after_completion_restarts_from_zero() {
    let (engine, output) = engine_for(encode(&vec![0; 4_800]));
    let first = engine.decode(&encode(&vec![0; 4_800])).unwrap();

    engine.play().unwrap();
    thread::sleep(Duration::from_millis(400));
    assert_eq!(engine.progress().elapsed_fraction, 1.0);

    engine.play().unwrap();
    let restarted = engine.progress();
    assert!(restarted.is_playing);
    assert!(restarted.elapsed_fraction < 0.5);
    assert!(output.active_sources() <= 1);

    let again = engine.decode(&encode(&vec![0; 4_800])).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
}

#[test]
fn odd_byte_payload_never_starts_a_session() {
    let payload: EncodedAudioPayload = STANDARD.encode([0u8, 1, 2, 3, 4]).into();
    let (engine, output) = engine_for(payload.clone());

    assert!(matches!(
        engine.decode(&payload),
        Err(DecodeError::Misaligned { len: 5, .. })
    ));
    assert!(matches!(
        engine.play(),
        Err(PlaybackError::Decode(DecodeError::Misaligned { .. }))
    ));
    assert_eq!(engine.status(), PlaybackStatus::Idle);
    assert_eq!(output.active_sources(), 0);
    assert!(!engine.progress().is_playing);
}

#[test]
fn decoded_samples_match_source_order() {
    let samples: Vec<i16> = (0..2_000).map(|i| ((i * 37) % 65_536 - 32_768) as i16).collect();
    let payload = encode(&samples);
    let (engine, _output) = engine_for(payload.clone());

    let buffer = engine.decode(&payload).unwrap();
    assert_eq!(buffer.num_frames(), samples.len());
    for (decoded, original) in buffer.channel(0).iter().zip(&samples) {
        assert!((decoded - *original as f32 / 32768.0).abs() < 1e-6);
    }
}

#[test]
fn no_ticks_after_stop_or_dispose() {
    let (engine, _output) = engine_for(encode(&vec![0; 48_000]));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    engine.set_progress_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    engine.play().unwrap();
    thread::sleep(Duration::from_millis(100));
    engine.stop();
    let after_stop = calls.load(Ordering::SeqCst);
    assert!(after_stop > 1);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);

    engine.play().unwrap();
    thread::sleep(Duration::from_millis(100));
    engine.dispose();
    let after_dispose = calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), after_dispose);
    assert!(matches!(engine.play(), Err(PlaybackError::Disposed)));
}
