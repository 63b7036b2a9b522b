//! Bounded jitter buffer for decoded agent speech.
//!
//! The queue absorbs network jitter between the decoder and the playback
//! scheduler. It is strictly FIFO and never grows past `max_queue`: when an
//! enqueue overflows it, the oldest chunks are dropped until the length is
//! back at `trim_target`, so latency stays bounded at the cost of skipping
//! stale speech.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::chunk::AudioChunk;

/// Default maximum number of queued chunks.
pub const DEFAULT_MAX_QUEUE: usize = 50;

/// Default queue length after an overflow trim.
pub const DEFAULT_TRIM_TARGET: usize = 30;

/// Default queue length that triggers a pressure warning.
pub const DEFAULT_WARN_THRESHOLD: usize = 30;

/// Jitter buffer limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_queue: usize,
    pub trim_target: usize,
    pub warn_threshold: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue: DEFAULT_MAX_QUEUE,
            trim_target: DEFAULT_TRIM_TARGET,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
        }
    }
}

/// What happened during a single enqueue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Oldest chunks discarded to honor the length limit
    pub dropped: usize,
    /// The queue length crossed the warning threshold
    pub pressure: bool,
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub cleared: u64,
    pub pressure_events: u64,
    pub current_len: usize,
    pub max_len: usize,
}

#[derive(Debug)]
pub struct AudioQueue {
    chunks: VecDeque<AudioChunk>,
    config: QueueConfig,
    enqueued: u64,
    dequeued: u64,
    dropped: u64,
    cleared: u64,
    pressure_events: u64,
    max_len: usize,
}

impl AudioQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            chunks: VecDeque::with_capacity(config.max_queue + 1),
            config,
            enqueued: 0,
            dequeued: 0,
            dropped: 0,
            cleared: 0,
            pressure_events: 0,
            max_len: 0,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append a chunk, trimming the oldest entries on overflow.
    pub fn enqueue(&mut self, chunk: AudioChunk) -> EnqueueOutcome {
        let before = self.chunks.len();
        self.chunks.push_back(chunk);
        self.enqueued += 1;

        let mut outcome = EnqueueOutcome::default();

        if before <= self.config.warn_threshold && self.chunks.len() > self.config.warn_threshold
        {
            outcome.pressure = true;
            self.pressure_events += 1;
            warn!(
                queue_len = self.chunks.len(),
                threshold = self.config.warn_threshold,
                "Audio queue pressure"
            );
        }

        if self.chunks.len() > self.config.max_queue {
            let keep = self.config.trim_target.min(self.config.max_queue);
            let excess = self.chunks.len() - keep;
            self.chunks.drain(..excess);
            self.dropped += excess as u64;
            outcome.dropped = excess;
            warn!(
                dropped = excess,
                queue_len = self.chunks.len(),
                "Audio queue overflow, dropped oldest chunks"
            );
        }

        self.max_len = self.max_len.max(self.chunks.len());
        outcome
    }

    /// Pop the oldest chunk.
    pub fn dequeue_next(&mut self) -> Option<AudioChunk> {
        let chunk = self.chunks.pop_front()?;
        self.dequeued += 1;
        Some(chunk)
    }

    /// Discard everything queued. Returns the number of chunks removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.chunks.len();
        self.chunks.clear();
        self.cleared += removed as u64;
        removed
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total playback time held in the queue, in seconds.
    pub fn buffered_duration(&self) -> f64 {
        self.chunks.iter().map(AudioChunk::duration).sum()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued,
            dequeued: self.dequeued,
            dropped: self.dropped,
            cleared: self.cleared,
            pressure_events: self.pressure_events,
            current_len: self.chunks.len(),
            max_len: self.max_len,
        }
    }
}
