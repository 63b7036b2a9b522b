//! Engine bus types: inbound commands and events, outbound snapshots.

use thiserror::Error;

use crate::core::audio::{AudioError, CaptureEvent};
use crate::core::connection::{ConnectionError, ConnectionEvent};
use crate::core::conversation::ConversationState;
use crate::core::router::RouterError;
use crate::core::session::SessionConfig;

/// Commands from the session layer.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    StartSession {
        config: SessionConfig,
        /// Generated when absent
        session_id: Option<String>,
    },
    EndSession,
}

/// Everything the engine reacts to besides commands and the pump tick.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Connection(ConnectionEvent),
    Capture(CaptureEvent),
}

impl From<ConnectionEvent> for EngineEvent {
    fn from(event: ConnectionEvent) -> Self {
        EngineEvent::Connection(event)
    }
}

impl From<CaptureEvent> for EngineEvent {
    fn from(event: CaptureEvent) -> Self {
        EngineEvent::Capture(event)
    }
}

/// Observable engine state, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineSnapshot {
    pub state: ConversationState,
    pub status_message: String,
    pub reconnecting: bool,
    pub queue_len: usize,
    pub active_sources: usize,
    pub transcript_len: usize,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A session is already running")]
    SessionActive,

    #[error("No session is running")]
    NoSession,

    #[error("Microphone capture is already running")]
    CaptureActive,

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),
}

pub type EngineResult<T> = Result<T, EngineError>;
