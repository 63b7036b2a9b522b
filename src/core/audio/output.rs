use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::chunk::AudioChunk;
use super::error::AudioResult;

/// Identifier of a source started on an output device.
pub type SourceId = u64;

/// Monotonic output-device clock, in seconds.
pub trait OutputClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-clock time since creation.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, t: f64) {
        *self.now.lock() = t;
    }

    pub fn advance(&self, dt: f64) {
        *self.now.lock() += dt;
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

/// The output device the scheduler plays through.
///
/// Sources are fire-and-forget: once started they play to completion unless
/// stopped. The device owns the chunk from `start_source` on.
pub trait AudioOutput: Send {
    /// Current output clock time in seconds.
    fn current_time(&self) -> f64;

    /// Device sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Start playing `chunk` at output time `at`.
    fn start_source(&mut self, chunk: AudioChunk, at: f64) -> AudioResult<SourceId>;

    /// Stop a source at output time `at`. Unknown or finished ids are ignored.
    fn stop_source(&mut self, id: SourceId, at: f64);

    /// Flush whatever the device rendered. Called once at session end.
    fn finish(&mut self) -> AudioResult<()> {
        Ok(())
    }
}

/// Record of a source started on a [`VirtualOutput`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedSource {
    pub id: SourceId,
    pub sequence: u64,
    pub start: f64,
    pub duration: f64,
    pub stopped_at: Option<f64>,
}

/// Output device that plays nothing and records what was scheduled.
#[derive(Clone)]
pub struct VirtualOutput {
    clock: Arc<dyn OutputClock>,
    sample_rate: u32,
    next_id: SourceId,
    played: Arc<Mutex<Vec<PlayedSource>>>,
}

impl VirtualOutput {
    pub fn new(clock: Arc<dyn OutputClock>, sample_rate: u32) -> Self {
        Self {
            clock,
            sample_rate,
            next_id: 1,
            played: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every source started so far. Clones of this output share the record.
    pub fn played(&self) -> Vec<PlayedSource> {
        self.played.lock().clone()
    }
}

impl AudioOutput for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_source(&mut self, chunk: AudioChunk, at: f64) -> AudioResult<SourceId> {
        let id = self.next_id;
        self.next_id += 1;
        self.played.lock().push(PlayedSource {
            id,
            sequence: chunk.sequence,
            start: at,
            duration: chunk.duration(),
            stopped_at: None,
        });
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId, at: f64) {
        if let Some(source) = self.played.lock().iter_mut().find(|s| s.id == id) {
            source.stopped_at.get_or_insert(at);
        }
    }
}
