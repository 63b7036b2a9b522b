//! Mock Relay Infrastructure
//!
//! Two ways to stand in for the interview relay:
//! - `relay_mock`: a real WebSocket server on localhost, scripted per test
//! - `fake_transport`: an in-memory `Connector` the test drives frame by frame
//!
//! Both record what the engine sent so tests can assert on the wire traffic.

// Allow dead code in test infrastructure - not every test binary uses every helper
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

pub mod fake_transport;
pub mod relay_mock;

pub use fake_transport::{FakeConnectorFactory, FakeRemote};
pub use relay_mock::{MockRelay, MockRelayState, RelayScript};

/// Statistics for mock relay traffic
#[derive(Debug, Default)]
pub struct MockStats {
    pub connections: AtomicU64,
    pub start_sessions: AtomicU64,
    pub end_sessions: AtomicU64,
    pub audio_frames_in: AtomicU64,
    pub agent_chunks_out: AtomicU64,
}

impl MockStats {
    pub fn record_connection(&self) -> u64 {
        self.connections.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_start(&self) {
        self.start_sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_end(&self) {
        self.end_sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_audio_in(&self) {
        self.audio_frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_out(&self) {
        self.agent_chunks_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> String {
        format!(
            "connections={} start={} end={} audio_in={} chunks_out={}",
            self.connections.load(Ordering::SeqCst),
            self.start_sessions.load(Ordering::SeqCst),
            self.end_sessions.load(Ordering::SeqCst),
            self.audio_frames_in.load(Ordering::Relaxed),
            self.agent_chunks_out.load(Ordering::Relaxed),
        )
    }
}
