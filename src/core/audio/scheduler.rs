//! Gap-free playback scheduling against the output clock.
//!
//! The scheduler keeps a single `next_play_time` cursor. Each chunk starts at
//! `max(clock, next_play_time)` and pushes the cursor forward by its
//! duration, so consecutive chunks butt up against each other with no gaps
//! or overlaps. When the cursor falls too far behind the clock (the consumer
//! stalled, the device underran) it is re-anchored just ahead of the clock
//! instead of trying to catch up.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::chunk::AudioChunk;
use super::error::AudioResult;
use super::output::{AudioOutput, SourceId};

/// Playback timing parameters, in seconds of output clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Lead before the first chunk of a session
    pub initial_lead: f64,
    /// How far the cursor may trail the clock before it is reset
    pub drift_threshold: f64,
    /// Lead applied when the cursor is reset
    pub lead_time: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_lead: 0.100,
            drift_threshold: 0.100,
            lead_time: 0.005,
        }
    }
}

/// A source registered with the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub sequence: u64,
    pub start: f64,
    pub end: f64,
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    config: SchedulerConfig,
    next_play_time: Option<f64>,
    active: BTreeMap<SourceId, ScheduledSource>,
    scheduled_total: u64,
    stopped_total: u64,
    drift_resets: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>, config: SchedulerConfig) -> Self {
        Self {
            output,
            config,
            next_play_time: None,
            active: BTreeMap::new(),
            scheduled_total: 0,
            stopped_total: 0,
            drift_resets: 0,
        }
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    pub fn next_play_time(&self) -> Option<f64> {
        self.next_play_time
    }

    /// Seconds of audio already committed ahead of the clock.
    pub fn scheduled_ahead(&self) -> f64 {
        match self.next_play_time {
            Some(t) => (t - self.current_time()).max(0.0),
            None => 0.0,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn scheduled_total(&self) -> u64 {
        self.scheduled_total
    }

    pub fn drift_resets(&self) -> u64 {
        self.drift_resets
    }

    /// Place `chunk` on the output timeline. The output device takes
    /// ownership of the chunk.
    pub fn schedule(&mut self, chunk: AudioChunk) -> AudioResult<ScheduledSource> {
        let now = self.output.current_time();
        let duration = chunk.duration();
        let sequence = chunk.sequence;

        let mut cursor = match self.next_play_time {
            Some(t) => t,
            None => now + self.config.initial_lead,
        };

        if now - cursor > self.config.drift_threshold {
            warn!(
                behind_ms = (now - cursor) * 1000.0,
                "Playback drifted behind the output clock, resetting"
            );
            self.drift_resets += 1;
            cursor = now + self.config.lead_time;
        }

        let start = cursor.max(now);
        let id = self.output.start_source(chunk, start)?;
        let source = ScheduledSource {
            id,
            sequence,
            start,
            end: start + duration,
        };

        self.next_play_time = Some(source.end);
        self.active.insert(id, source);
        self.scheduled_total += 1;

        debug!(sequence, start, duration, "Scheduled audio chunk");
        Ok(source)
    }

    /// Stop every registered source immediately. Returns how many were
    /// stopped.
    pub fn stop_all(&mut self) -> usize {
        let now = self.output.current_time();
        let stopped = self.active.len();

        for id in self.active.keys() {
            self.output.stop_source(*id, now);
        }
        self.active.clear();
        self.stopped_total += stopped as u64;

        // The next turn starts from the clock, not behind discarded audio
        if self.next_play_time.is_some() {
            self.next_play_time = Some(now);
        }

        if stopped > 0 {
            debug!(stopped, "Stopped all playback sources");
        }
        stopped
    }

    /// Drop sources that have played out. Returns how many finished.
    pub fn reap_finished(&mut self) -> usize {
        let now = self.output.current_time();
        let before = self.active.len();
        self.active.retain(|_, source| source.end > now);
        before - self.active.len()
    }

    /// Let the output device flush what it rendered.
    pub fn finish_output(&mut self) -> AudioResult<()> {
        self.output.finish()
    }
}
