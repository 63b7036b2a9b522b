use tracing::debug;

use super::chunk::{AudioChunk, WireAudio};
use super::error::{AudioError, AudioResult};
use super::resample::LinearResampler;

/// Turns inbound 16-bit PCM wire chunks into playable [`AudioChunk`]s at the
/// output device rate.
///
/// Sample-rate conversion happens here and nowhere else in the playback path.
#[derive(Debug)]
pub struct AudioDecoder {
    output_rate: u32,
    resampler: LinearResampler,
    next_sequence: u64,
    decoded: u64,
}

impl AudioDecoder {
    pub fn new(wire_rate: u32, output_rate: u32) -> AudioResult<Self> {
        Ok(Self {
            output_rate,
            resampler: LinearResampler::new(wire_rate, output_rate)?,
            next_sequence: 0,
            decoded: 0,
        })
    }

    pub fn wire_rate(&self) -> u32 {
        self.resampler.from_rate()
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Decode one wire chunk that arrived at output-clock time `now`.
    ///
    /// Chunks without a provider sequence number get the next internal one.
    pub fn decode(&mut self, wire: WireAudio, now: f64) -> AudioResult<AudioChunk> {
        if wire.payload.is_empty() {
            return Err(AudioError::EmptyPayload);
        }
        if wire.payload.len() % 2 != 0 {
            return Err(AudioError::MalformedPayload(wire.payload.len()));
        }

        if let Some(rate) = wire.sample_rate {
            if rate != self.resampler.from_rate() {
                debug!(
                    from = self.resampler.from_rate(),
                    to = rate,
                    "Wire sample rate changed, rebuilding resampler"
                );
                self.resampler = LinearResampler::new(rate, self.output_rate)?;
            }
        }

        let samples: Vec<f32> = wire
            .payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();

        let payload = if self.resampler.is_passthrough() {
            samples
        } else {
            let mut out = Vec::with_capacity(samples.len());
            self.resampler.process(&samples, &mut out);
            out
        };

        let sequence = wire.sequence.unwrap_or(self.next_sequence);
        self.next_sequence = sequence.wrapping_add(1);
        self.decoded += 1;

        Ok(AudioChunk {
            sequence,
            sample_rate: self.output_rate,
            channel_count: 1,
            payload,
            source_timestamp: now,
            response_id: wire.response_id,
        })
    }

    /// Drop interpolation state after a discontinuity such as a barge-in.
    pub fn reset(&mut self) {
        self.resampler.reset();
    }
}
