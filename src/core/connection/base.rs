//! Base traits and types for the relay transport.
//!
//! The connection manager talks to the network only through [`Connector`]
//! and [`TransportLink`], so the retry and session-restore logic can be
//! exercised against an in-memory transport in tests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::session::Session;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on the transport.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection to the relay failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The manager was already started
    #[error("Connection already started")]
    AlreadyStarted,
}

/// Result type for transport operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Retry policy for connecting and reconnecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// Retry failed connection attempts.
    /// Default: true
    pub enabled: bool,

    /// Total connection attempts before giving up.
    /// Set to 0 for unlimited attempts.
    /// Default: 3
    pub max_attempts: u32,

    /// Delay after the first failed attempt (milliseconds).
    /// Default: 500ms
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts (milliseconds).
    /// Default: 8000ms
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Add up to ±25% jitter to each delay.
    /// Default: false
    pub jitter: bool,

    /// Upper bound on a single connection attempt (milliseconds).
    /// Default: 10000ms
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
            jitter: false,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ReconnectionConfig {
    /// A single attempt with no retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay in milliseconds after failed attempt number `attempt` (1-based),
    /// using exponential backoff.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        // Exponential backoff: base_delay * multiplier^(attempt-1)
        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        if self.jitter {
            let jitter = rand_jitter(delay * 0.25);
            (delay + jitter).max(0.0) as u64
        } else {
            delay as u64
        }
    }

    /// Whether another attempt may follow failed attempt number `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

/// Generate a pseudo-random jitter value in `-range..range` using a simple LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    // Simple LCG: (a * seed + c) mod m
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;

    (normalized - 0.5) * 2.0 * range
}

// =============================================================================
// Connection State
// =============================================================================

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the relay
    #[default]
    Disconnected,
    /// First connection in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Reconnecting after connection loss
    Reconnecting,
    /// Every attempt failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// A single transport message.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

/// Retry bookkeeping for one connect or reconnect cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionAttempt {
    /// Attempts made so far in this cycle
    pub attempt: u32,
    pub last_error: Option<String>,
    /// Delay before the next attempt
    pub backoff_ms: u64,
}

/// Notifications from the connection task to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// First connection of the session is open
    Connected { attempt: u32 },
    /// The transport came back after an unexpected close
    Reconnected { attempt: u32 },
    /// The transport closed unexpectedly; reconnection is under way
    Disconnected { reason: String },
    /// Inbound message
    Frame(WireFrame),
    /// Every attempt failed. Sent at most once per session.
    ConnectFailed { attempts: u32, last_error: String },
}

// =============================================================================
// Transport Traits
// =============================================================================

/// An open, bidirectional message transport.
#[async_trait]
pub trait TransportLink: Send {
    async fn send(&mut self, frame: WireFrame) -> ConnectionResult<()>;

    /// Next inbound frame. `None` means the peer closed the transport.
    async fn recv(&mut self) -> Option<ConnectionResult<WireFrame>>;

    async fn close(&mut self) -> ConnectionResult<()>;
}

/// Opens transport links for one session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> ConnectionResult<Box<dyn TransportLink>>;
}

/// Builds the [`Connector`] for a session, which carries its token.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, session: &Session) -> ConnectionResult<Arc<dyn Connector>>;
}
