//! Audio pipeline for the interview engine.
//!
//! Outbound: microphone samples are downmixed, resampled and quantized into
//! fixed-size 16-bit PCM wire chunks by the [`AudioEncoder`], which the
//! capture pump forwards to the connection.
//!
//! Inbound: wire chunks are decoded into [`AudioChunk`]s by the
//! [`AudioDecoder`], held in the bounded [`AudioQueue`] jitter buffer, and
//! placed on the output timeline by the [`PlaybackScheduler`].
//!
//! All playback timing is expressed in `f64` seconds of the output clock.

mod capture;
mod chunk;
mod decoder;
mod encoder;
mod error;
mod output;
mod pipeline;
mod queue;
mod recorder;
mod resample;
mod scheduler;

pub use capture::{AudioUplink, CaptureEvent, CaptureFrame, CaptureGate, spawn_capture_pump};
pub use chunk::{AudioChunk, WireAudio};
pub use decoder::AudioDecoder;
pub use encoder::{AudioEncoder, EncodedChunks, EncoderConfig};
pub use error::{AudioError, AudioResult};
pub use output::{
    AudioOutput, ManualClock, MonotonicClock, OutputClock, PlayedSource, SourceId, VirtualOutput,
};
pub use pipeline::{AudioPipeline, IngestOutcome, PipelineConfig};
pub use queue::{AudioQueue, EnqueueOutcome, QueueConfig, QueueStats};
pub use recorder::{WavRecorderOutput, read_wav};
pub use resample::LinearResampler;
pub use scheduler::{PlaybackScheduler, ScheduledSource, SchedulerConfig};

/// Lowest negotiable wire sample rate.
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest negotiable wire sample rate.
pub const MAX_SAMPLE_RATE: u32 = 48_000;

/// Checks that a wire sample rate is within the negotiable range.
pub fn validate_sample_rate(sample_rate: u32) -> AudioResult<()> {
    if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        Ok(())
    } else {
        Err(AudioError::InvalidSampleRate(sample_rate))
    }
}
