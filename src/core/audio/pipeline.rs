use tracing::{debug, warn};

use super::chunk::WireAudio;
use super::decoder::AudioDecoder;
use super::error::AudioResult;
use super::output::AudioOutput;
use super::queue::{AudioQueue, EnqueueOutcome, QueueConfig, QueueStats};
use super::scheduler::{PlaybackScheduler, SchedulerConfig};

/// Inbound playback path configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    /// The jitter buffer only feeds the scheduler while less than this much
    /// audio (seconds) is committed ahead of the clock
    pub max_schedule_ahead: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            max_schedule_ahead: 0.300,
        }
    }
}

/// Result of handing one wire chunk to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub sequence: u64,
    pub queue: EnqueueOutcome,
}

/// Decoder, jitter buffer and scheduler wired in a row.
pub struct AudioPipeline {
    decoder: AudioDecoder,
    queue: AudioQueue,
    scheduler: PlaybackScheduler,
    max_schedule_ahead: f64,
    schedule_failures: u64,
}

impl AudioPipeline {
    /// Build a pipeline decoding `wire_rate` audio for `output`.
    pub fn new(
        output: Box<dyn AudioOutput>,
        wire_rate: u32,
        config: PipelineConfig,
    ) -> AudioResult<Self> {
        let decoder = AudioDecoder::new(wire_rate, output.sample_rate())?;
        Ok(Self {
            decoder,
            queue: AudioQueue::new(config.queue),
            scheduler: PlaybackScheduler::new(output, config.scheduler),
            max_schedule_ahead: config.max_schedule_ahead,
            schedule_failures: 0,
        })
    }

    /// Switch the negotiated wire rate, e.g. when a new session starts.
    pub fn set_wire_rate(&mut self, wire_rate: u32) -> AudioResult<()> {
        if wire_rate != self.decoder.wire_rate() {
            self.decoder = AudioDecoder::new(wire_rate, self.scheduler.output_sample_rate())?;
        }
        Ok(())
    }

    pub fn current_time(&self) -> f64 {
        self.scheduler.current_time()
    }

    /// Decode a wire chunk and append it to the jitter buffer.
    pub fn ingest(&mut self, wire: WireAudio) -> AudioResult<IngestOutcome> {
        let now = self.scheduler.current_time();
        let chunk = self.decoder.decode(wire, now)?;
        let sequence = chunk.sequence;
        let queue = self.queue.enqueue(chunk);
        Ok(IngestOutcome { sequence, queue })
    }

    /// Move chunks from the jitter buffer to the scheduler until the
    /// schedule-ahead horizon is filled. Returns how many were scheduled.
    pub fn pump(&mut self) -> usize {
        let mut scheduled = 0;
        while self.scheduler.scheduled_ahead() < self.max_schedule_ahead {
            let Some(chunk) = self.queue.dequeue_next() else {
                break;
            };
            let sequence = chunk.sequence;
            match self.scheduler.schedule(chunk) {
                Ok(_) => scheduled += 1,
                Err(e) => {
                    self.schedule_failures += 1;
                    warn!(sequence, error = %e, "Dropping chunk the output refused");
                }
            }
        }
        scheduled
    }

    pub fn reap_finished(&mut self) -> usize {
        self.scheduler.reap_finished()
    }

    /// Stop all playing sources.
    pub fn stop_all(&mut self) -> usize {
        self.scheduler.stop_all()
    }

    /// Empty the jitter buffer. Decoder interpolation state is dropped too,
    /// since the next chunk no longer continues the discarded audio.
    pub fn clear(&mut self) -> usize {
        let removed = self.queue.clear();
        self.decoder.reset();
        if removed > 0 {
            debug!(removed, "Cleared audio queue");
        }
        removed
    }

    /// Nothing queued and nothing playing.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.scheduler.is_idle()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_sources(&self) -> usize {
        self.scheduler.active_count()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn scheduled_total(&self) -> u64 {
        self.scheduler.scheduled_total()
    }

    pub fn drift_resets(&self) -> u64 {
        self.scheduler.drift_resets()
    }

    pub fn schedule_failures(&self) -> u64 {
        self.schedule_failures
    }

    pub fn finish_output(&mut self) -> AudioResult<()> {
        self.scheduler.finish_output()
    }
}
