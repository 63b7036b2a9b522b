//! Router for the interview relay protocol.
//!
//! Outbound: `start_session` and `end_session` as JSON text frames, and
//! microphone audio as raw binary PCM. Inbound: JSON control messages and
//! audio either as binary frames or as JSON with base64 PCM.

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::base::{AudioFraming, MessageRouter, Routed, RouterResult};
use crate::core::audio::WireAudio;
use crate::core::connection::WireFrame;
use crate::core::conversation::{ConversationEvent, Speaker};
use crate::core::session::{InterviewContext, Session, VoiceParams};

// =============================================================================
// Wire Messages
// =============================================================================

/// Messages sent to the relay.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayOutbound<'a> {
    StartSession {
        session_id: &'a str,
        target_sample_rate: u32,
        voice: &'a VoiceParams,
        token: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        interview: Option<&'a InterviewContext>,
    },
    EndSession {
        session_id: &'a str,
    },
}

/// Messages received from the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayInbound {
    Connected {
        #[serde(default)]
        session_id: Option<String>,
    },
    Audio {
        #[serde(default)]
        sequence: Option<u64>,
        /// Base64 PCM16 LE
        data: String,
        #[serde(default)]
        sample_rate: Option<u32>,
        #[serde(default)]
        response_id: Option<String>,
    },
    AgentTranscriptDelta {
        text: String,
        #[serde(rename = "isFinal", alias = "is_final", default)]
        is_final: bool,
    },
    UserTranscriptDelta {
        text: String,
        #[serde(rename = "isFinal", alias = "is_final", default)]
        is_final: bool,
    },
    UserSpeechStarted,
    UserSpeechEnded,
    AgentTurnComplete,
    AgentSpeechStarted,
    AgentThinking,
    SessionEnded {
        #[serde(default)]
        reason: Option<String>,
    },
    Error {
        code: String,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Router
// =============================================================================

pub struct RelayRouter {
    non_fatal_error_codes: Vec<String>,
}

impl RelayRouter {
    pub fn new(non_fatal_error_codes: Vec<String>) -> Self {
        Self {
            non_fatal_error_codes,
        }
    }

    fn route_text(&self, text: &str) -> Vec<Routed> {
        let message: RelayInbound = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed relay message");
                return Vec::new();
            }
        };

        let routed = match message {
            RelayInbound::Connected { session_id } => {
                debug!(?session_id, "Relay acknowledged session");
                Routed::Event(ConversationEvent::ConnectedAck)
            }
            RelayInbound::Audio {
                sequence,
                data,
                sample_rate,
                response_id,
            } => match BASE64_STANDARD.decode(data.as_bytes()) {
                Ok(pcm) => Routed::Audio(WireAudio {
                    sequence,
                    payload: Bytes::from(pcm),
                    sample_rate,
                    response_id,
                }),
                Err(e) => Routed::DecodeFailed(format!("invalid base64 audio: {e}")),
            },
            RelayInbound::AgentTranscriptDelta { text, is_final } => {
                Routed::Event(ConversationEvent::TranscriptDelta {
                    speaker: Speaker::Agent,
                    text,
                    is_final,
                })
            }
            RelayInbound::UserTranscriptDelta { text, is_final } => {
                Routed::Event(ConversationEvent::TranscriptDelta {
                    speaker: Speaker::User,
                    text,
                    is_final,
                })
            }
            RelayInbound::UserSpeechStarted => {
                Routed::Event(ConversationEvent::UserSpeechDetected)
            }
            RelayInbound::UserSpeechEnded => Routed::Event(ConversationEvent::UserSpeechEnded),
            RelayInbound::AgentTurnComplete => {
                Routed::Event(ConversationEvent::AgentTurnComplete)
            }
            RelayInbound::AgentSpeechStarted => {
                Routed::Event(ConversationEvent::AgentSpeechResumed)
            }
            RelayInbound::AgentThinking => Routed::Event(ConversationEvent::AgentProcessing),
            RelayInbound::SessionEnded { reason } => {
                debug!(?reason, "Agent ended the session");
                Routed::Event(ConversationEvent::AgentEndedSession)
            }
            RelayInbound::Error { code, message } => {
                if self.non_fatal_error_codes.contains(&code) {
                    warn!(code = %code, message = %message, "Non-fatal relay error");
                    return Vec::new();
                }
                Routed::Event(ConversationEvent::FatalTransportError { code, message })
            }
            RelayInbound::Unknown => {
                debug!("Ignoring unknown relay message type");
                return Vec::new();
            }
        };

        vec![routed]
    }
}

impl MessageRouter for RelayRouter {
    fn provider(&self) -> &'static str {
        "relay"
    }

    fn route(&mut self, frame: WireFrame) -> Vec<Routed> {
        match frame {
            WireFrame::Text(text) => self.route_text(&text),
            WireFrame::Binary(pcm) => vec![Routed::Audio(WireAudio::raw(pcm))],
        }
    }

    fn encode_start(&self, session: &Session) -> RouterResult<WireFrame> {
        let message = RelayOutbound::StartSession {
            session_id: &session.id,
            target_sample_rate: session.config.target_sample_rate,
            voice: &session.config.voice,
            token: &session.config.connection_token,
            interview: session.config.interview.as_ref(),
        };
        Ok(WireFrame::Text(serde_json::to_string(&message)?))
    }

    fn encode_end(&self, session: &Session) -> Option<WireFrame> {
        let message = RelayOutbound::EndSession {
            session_id: &session.id,
        };
        serde_json::to_string(&message).ok().map(WireFrame::Text)
    }

    fn audio_framing(&self) -> AudioFraming {
        AudioFraming::Binary
    }
}
