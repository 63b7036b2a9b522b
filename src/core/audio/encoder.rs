use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use super::error::{AudioError, AudioResult};
use super::resample::LinearResampler;
use super::validate_sample_rate;

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Sample rate the capture device delivers
    pub native_sample_rate: u32,
    /// Negotiated wire sample rate
    pub target_sample_rate: u32,
    /// Interleaved channel count of captured frames
    pub channels: u16,
    /// Wire chunk length in milliseconds
    pub chunk_ms: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            native_sample_rate: 48_000,
            target_sample_rate: 16_000,
            channels: 1,
            chunk_ms: 20,
        }
    }
}

impl EncoderConfig {
    /// Samples per wire chunk at the target rate.
    pub fn chunk_samples(&self) -> usize {
        (self.target_sample_rate as u64 * self.chunk_ms as u64 / 1000) as usize
    }
}

/// Converts captured `f32` samples into fixed-size 16-bit PCM wire chunks.
///
/// Pushing never blocks: samples are downmixed, resampled and buffered, and
/// every complete chunk is handed out through the returned iterator.
#[derive(Debug)]
pub struct AudioEncoder {
    config: EncoderConfig,
    resampler: LinearResampler,
    chunk_samples: usize,
    mono: Vec<f32>,
    pending: Vec<f32>,
    chunks_emitted: u64,
    stopped: bool,
}

impl AudioEncoder {
    pub fn new(config: EncoderConfig) -> AudioResult<Self> {
        validate_sample_rate(config.target_sample_rate)?;
        if config.native_sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate(config.native_sample_rate));
        }
        if config.channels == 0 {
            return Err(AudioError::InvalidConfiguration(
                "channel count must be at least 1".to_string(),
            ));
        }

        let chunk_samples = config.chunk_samples();
        if chunk_samples == 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "chunk of {} ms holds no samples at {} Hz",
                config.chunk_ms, config.target_sample_rate
            )));
        }

        let resampler = LinearResampler::new(config.native_sample_rate, config.target_sample_rate)?;

        debug!(
            native_rate = config.native_sample_rate,
            target_rate = config.target_sample_rate,
            chunk_samples,
            "Audio encoder created"
        );

        Ok(Self {
            config,
            resampler,
            chunk_samples,
            mono: Vec::new(),
            pending: Vec::with_capacity(chunk_samples * 2),
            chunks_emitted: 0,
            stopped: false,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Bytes in every emitted wire chunk.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples * 2
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Feed interleaved capture samples.
    ///
    /// The returned iterator yields every wire chunk that became complete.
    /// Chunks not taken from the iterator stay buffered for the next call.
    pub fn push(&mut self, interleaved: &[f32]) -> EncodedChunks<'_> {
        if !self.stopped && !interleaved.is_empty() {
            self.downmix(interleaved);
            let mono = std::mem::take(&mut self.mono);
            self.resampler.process(&mono, &mut self.pending);
            self.mono = mono;
        }
        EncodedChunks { encoder: self }
    }

    /// Emit the buffered remainder as a final chunk padded with silence.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.stopped || self.pending.is_empty() {
            return None;
        }
        self.pending.resize(self.chunk_samples.max(self.pending.len()), 0.0);
        self.next_chunk()
    }

    /// Stop encoding; buffered samples are discarded.
    pub fn stop(&mut self) {
        if !self.stopped {
            debug!(chunks = self.chunks_emitted, "Audio encoder stopped");
        }
        self.stopped = true;
        self.pending.clear();
    }

    fn downmix(&mut self, interleaved: &[f32]) {
        self.mono.clear();
        let channels = self.config.channels as usize;
        if channels == 1 {
            self.mono.extend_from_slice(interleaved);
            return;
        }
        self.mono.extend(
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    fn next_chunk(&mut self) -> Option<Bytes> {
        if self.stopped || self.pending.len() < self.chunk_samples {
            return None;
        }

        let mut buf = BytesMut::with_capacity(self.chunk_samples * 2);
        for sample in self.pending.drain(..self.chunk_samples) {
            buf.put_i16_le(quantize(sample));
        }
        self.chunks_emitted += 1;
        Some(buf.freeze())
    }
}

/// Iterator over the wire chunks completed by one [`AudioEncoder::push`].
pub struct EncodedChunks<'a> {
    encoder: &'a mut AudioEncoder,
}

impl Iterator for EncodedChunks<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.encoder.next_chunk()
    }
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}
