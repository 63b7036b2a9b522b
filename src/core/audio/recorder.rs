//! WAV file I/O for headless sessions.
//!
//! [`WavRecorderOutput`] is an output device that renders every scheduled
//! source onto a timeline at its scheduled start time (honoring stops, so a
//! barge-in audibly cuts the agent off) and writes the mix as 16-bit mono
//! PCM when the session finishes. [`read_wav`] loads capture input.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::chunk::AudioChunk;
use super::error::{AudioError, AudioResult};
use super::output::{AudioOutput, OutputClock, SourceId};

struct RenderedSource {
    start_frame: usize,
    samples: Vec<f32>,
}

/// Output device that renders agent speech into a WAV file.
pub struct WavRecorderOutput {
    clock: Arc<dyn OutputClock>,
    sample_rate: u32,
    path: PathBuf,
    sources: BTreeMap<SourceId, RenderedSource>,
    next_id: SourceId,
    finished: bool,
}

impl WavRecorderOutput {
    pub fn new(clock: Arc<dyn OutputClock>, sample_rate: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            clock,
            sample_rate,
            path: path.into(),
            sources: BTreeMap::new(),
            next_id: 1,
            finished: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn frame_at(&self, t: f64) -> usize {
        (t.max(0.0) * self.sample_rate as f64).round() as usize
    }

    /// Mix every source onto a single timeline.
    fn mix(&self) -> Vec<f32> {
        let len = self
            .sources
            .values()
            .map(|s| s.start_frame + s.samples.len())
            .max()
            .unwrap_or(0);

        let mut timeline = vec![0.0f32; len];
        for source in self.sources.values() {
            let end = source.start_frame + source.samples.len();
            for (out, sample) in timeline[source.start_frame..end]
                .iter_mut()
                .zip(&source.samples)
            {
                *out += sample;
            }
        }
        timeline
    }
}

impl AudioOutput for WavRecorderOutput {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_source(&mut self, chunk: AudioChunk, at: f64) -> AudioResult<SourceId> {
        if chunk.sample_rate != self.sample_rate {
            return Err(AudioError::SampleRateMismatch {
                chunk: chunk.sample_rate,
                output: self.sample_rate,
            });
        }

        let channels = chunk.channel_count.max(1) as usize;
        let samples = if channels == 1 {
            chunk.payload
        } else {
            chunk
                .payload
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        let id = self.next_id;
        self.next_id += 1;
        self.sources.insert(
            id,
            RenderedSource {
                start_frame: self.frame_at(at),
                samples,
            },
        );
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId, at: f64) {
        let stop_frame = self.frame_at(at);
        if let Some(source) = self.sources.get_mut(&id) {
            let keep = stop_frame.saturating_sub(source.start_frame);
            if keep < source.samples.len() {
                debug!(source = id, kept = keep, "Truncated stopped source");
                source.samples.truncate(keep);
            }
        }
    }

    fn finish(&mut self) -> AudioResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let timeline = self.mix();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&self.path, spec)?;
        for sample in &timeline {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;

        info!(
            path = %self.path.display(),
            sources = self.sources.len(),
            seconds = timeline.len() as f64 / self.sample_rate as f64,
            "Agent audio written"
        );
        Ok(())
    }
}

/// Read a WAV file as interleaved `f32` samples.
///
/// Returns `(samples, sample_rate, channels)`.
pub fn read_wav(path: impl AsRef<Path>) -> AudioResult<(Vec<f32>, u32, u16)> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|s| s as f32 / max_val)
                .collect()
        }
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
    };

    Ok((samples, spec.sample_rate, spec.channels))
}
