//! Base types for translating provider messages into domain events.
//!
//! A [`MessageRouter`] owns the whole provider wire vocabulary in both
//! directions. Everything above it (engine, state machine, audio pipeline)
//! only sees [`ConversationEvent`]s and [`WireAudio`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::audio::WireAudio;
use crate::core::connection::WireFrame;
use crate::core::conversation::ConversationEvent;
use crate::core::session::Session;

use super::openai::OpenAiRouter;
use super::relay::RelayRouter;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Error)]
pub enum RouterError {
    /// Outbound message could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
}

pub type RouterResult<T> = Result<T, RouterError>;

// =============================================================================
// Routing Types
// =============================================================================

/// One inbound frame may produce several of these, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Event(ConversationEvent),
    Audio(WireAudio),
    /// An audio message whose payload could not be decoded
    DecodeFailed(String),
}

/// How outbound microphone audio is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFraming {
    /// Raw PCM in a binary frame
    Binary,
    /// Base64 PCM in an `input_audio_buffer.append` text frame
    OpenAiAppend,
}

impl AudioFraming {
    pub fn frame(&self, pcm: Bytes) -> RouterResult<WireFrame> {
        match self {
            AudioFraming::Binary => Ok(WireFrame::Binary(pcm)),
            AudioFraming::OpenAiAppend => super::openai::append_frame(&pcm),
        }
    }
}

/// Provider-specific translation between wire frames and domain events.
pub trait MessageRouter: Send {
    fn provider(&self) -> &'static str;

    /// Translate an inbound frame. Unknown or malformed input yields nothing.
    fn route(&mut self, frame: WireFrame) -> Vec<Routed>;

    /// The session-opening control message. Resent after every reconnect.
    fn encode_start(&self, session: &Session) -> RouterResult<WireFrame>;

    /// Control message announcing that the user ended the session, if the
    /// provider has one.
    fn encode_end(&self, session: &Session) -> Option<WireFrame>;

    /// Sent once after the first acknowledgement to make the agent open the
    /// interview, for providers that wait to be asked.
    fn encode_greeting(&self) -> Option<WireFrame> {
        None
    }

    /// Sent on barge-in to cancel the agent response being played.
    fn encode_interrupt(&self) -> Option<WireFrame> {
        None
    }

    fn audio_framing(&self) -> AudioFraming;

    fn encode_audio(&self, pcm: Bytes) -> RouterResult<WireFrame> {
        self.audio_framing().frame(pcm)
    }

    /// Wire sample rate the provider insists on, if any.
    fn required_sample_rate(&self) -> Option<u32> {
        None
    }

    /// Extra headers for the transport handshake.
    fn handshake_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Forget per-connection state (partial transcripts, sequence counters).
    fn reset(&mut self) {}
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// The interview relay protocol
    #[default]
    Relay,
    /// OpenAI Realtime API
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Relay => "relay",
            ProviderKind::OpenAi => "openai",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "relay" => Ok(ProviderKind::Relay),
            "openai" | "openai-realtime" => Ok(ProviderKind::OpenAi),
            other => Err(RouterError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Provider error codes that are logged instead of ending the session
    #[serde(default)]
    pub non_fatal_error_codes: Vec<String>,
}

/// Build the router for the configured provider.
pub fn create_router(config: &RouterConfig) -> Box<dyn MessageRouter> {
    match config.provider {
        ProviderKind::Relay => Box::new(RelayRouter::new(config.non_fatal_error_codes.clone())),
        ProviderKind::OpenAi => Box::new(OpenAiRouter::new(config.non_fatal_error_codes.clone())),
    }
}
