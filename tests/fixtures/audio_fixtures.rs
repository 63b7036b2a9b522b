//! Audio Test Fixtures
//!
//! Programmatically generated audio, so tests need no files on disk:
//! - Wire PCM: 16-bit signed little-endian mono, as the relay sends it
//! - Capture frames: interleaved `f32` at a device's native rate
//!
//! Available fixtures:
//! - Silence
//! - Sine wave tones
//! - Speech-like patterns (variable amplitude)

use std::f32::consts::PI;

use serde_json::{Value, json};

/// Default wire sample rate
pub const WIRE_RATE: u32 = 16000;

/// Samples in one 20 ms wire chunk at 16 kHz
pub const CHUNK_20MS: usize = 320;

/// Generate silence (zeros)
pub fn generate_silence(duration_samples: usize) -> Vec<i16> {
    vec![0i16; duration_samples]
}

/// Generate a sine wave tone at `sample_rate`
pub fn generate_sine_wave(
    duration_samples: usize,
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    let angular_freq = 2.0 * PI * frequency / sample_rate as f32;

    (0..duration_samples)
        .map(|i| ((angular_freq * i as f32).sin() * max_amplitude) as i16)
        .collect()
}

/// Generate a 440Hz (A4) reference tone at the wire rate
pub fn generate_a440_tone(duration_samples: usize) -> Vec<i16> {
    generate_sine_wave(duration_samples, 440.0, 0.5, WIRE_RATE)
}

/// Speech-like pattern: a 200 Hz carrier with a 4 Hz syllable envelope
pub fn generate_speech_pattern(duration_samples: usize, sample_rate: u32) -> Vec<i16> {
    let carrier = 2.0 * PI * 200.0 / sample_rate as f32;
    let envelope = 2.0 * PI * 4.0 / sample_rate as f32;

    (0..duration_samples)
        .map(|i| {
            let t = i as f32;
            let amp = 0.5 * (0.5 + 0.5 * (envelope * t).sin());
            ((carrier * t).sin() * amp * i16::MAX as f32) as i16
        })
        .collect()
}

/// Convert samples to little-endian bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Convert little-endian bytes back to samples
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// One 20 ms wire chunk of agent speech
pub fn agent_chunk_bytes() -> Vec<u8> {
    samples_to_bytes(&generate_a440_tone(CHUNK_20MS))
}

/// `count` capture frames of 10 ms each, as a 48 kHz stereo device delivers them
pub fn capture_frames_48k_stereo(count: usize) -> Vec<Vec<f32>> {
    let mono = generate_speech_pattern(480 * count, 48000);
    mono.chunks(480)
        .map(|frame| {
            frame
                .iter()
                .flat_map(|&s| {
                    let v = s as f32 / i16::MAX as f32;
                    [v, v]
                })
                .collect()
        })
        .collect()
}

/// Peak absolute amplitude
pub fn calculate_peak(samples: &[i16]) -> i16 {
    samples
        .iter()
        .map(|s| s.saturating_abs())
        .max()
        .unwrap_or(0)
}

/// Write a mono 16-bit WAV file
pub fn write_wav(path: &std::path::Path, samples: &[i16], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

// ===== Relay message fixtures =====

pub fn connected_msg() -> Value {
    json!({ "type": "connected" })
}

pub fn agent_turn_complete_msg() -> Value {
    json!({ "type": "agent_turn_complete" })
}

pub fn user_speech_started_msg() -> Value {
    json!({ "type": "user_speech_started" })
}

pub fn agent_transcript_msg(text: &str, is_final: bool) -> Value {
    json!({ "type": "agent_transcript_delta", "text": text, "isFinal": is_final })
}

pub fn user_transcript_msg(text: &str, is_final: bool) -> Value {
    json!({ "type": "user_transcript_delta", "text": text, "isFinal": is_final })
}
