//! OpenAI Realtime API router.
//!
//! Maps Realtime server events onto the interview conversation. Audio is
//! PCM 16-bit signed little-endian at 24 kHz in both directions.
//!
//! | Server event | Domain event |
//! |---|---|
//! | `session.created` | connected ack |
//! | `input_audio_buffer.speech_started` / `speech_stopped` | user speech detected / ended |
//! | `response.created` | agent processing |
//! | `response.audio.delta` | inbound audio |
//! | `response.audio_transcript.delta` | agent partial transcript (running) |
//! | `response.audio_transcript.done` | agent final transcript |
//! | `conversation.item.input_audio_transcription.completed` | user final transcript |
//! | `response.done` | agent turn complete |
//! | `error` | fatal transport error |

mod messages;

use bytes::Bytes;
use tracing::{debug, warn};

pub use messages::{
    ApiError, ClientEvent, InputAudioTranscription, PCM16_FORMAT, RealtimeSessionConfig,
    ServerEvent, TRANSCRIPTION_MODEL, TurnDetection,
};

use super::base::{AudioFraming, MessageRouter, Routed, RouterResult};
use crate::core::audio::WireAudio;
use crate::core::connection::WireFrame;
use crate::core::conversation::{ConversationEvent, Speaker};
use crate::core::session::{InterviewContext, Session};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Audio sample rate of the OpenAI Realtime API.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

const DEFAULT_VOICE: &str = "alloy";

/// Wrap PCM in an `input_audio_buffer.append` text frame.
pub fn append_frame(pcm: &[u8]) -> RouterResult<WireFrame> {
    OpenAiRouter::client_frame(&ClientEvent::audio_append(pcm))
}

/// System instructions for the interviewer persona.
pub fn interview_instructions(context: Option<&InterviewContext>) -> String {
    let mut instructions = String::from(
        "You are a professional interviewer running a spoken mock interview. \
         Ask one question at a time, wait for the candidate to finish, and ask \
         follow-up questions based on their answers. Keep each turn short.",
    );
    if let Some(ctx) = context {
        instructions.push_str(&format!(
            "\n\nRole: {}\nDifficulty: {}",
            ctx.role, ctx.difficulty
        ));
        if !ctx.resume_summary.is_empty() {
            instructions.push_str(&format!("\nCandidate resume summary: {}", ctx.resume_summary));
        }
    }
    instructions
}

pub struct OpenAiRouter {
    non_fatal_error_codes: Vec<String>,
    /// Running agent transcript for the current response
    agent_partial: String,
}

impl OpenAiRouter {
    pub fn new(non_fatal_error_codes: Vec<String>) -> Self {
        Self {
            non_fatal_error_codes,
            agent_partial: String::new(),
        }
    }

    fn client_frame(event: &ClientEvent) -> RouterResult<WireFrame> {
        Ok(WireFrame::Text(serde_json::to_string(event)?))
    }

    fn route_event(&mut self, event: ServerEvent) -> Option<Routed> {
        let routed = match event {
            ServerEvent::SessionCreated { session } => {
                debug!(
                    session_id = ?session.as_ref().map(|s| s.id.as_str()),
                    "OpenAI session created"
                );
                Routed::Event(ConversationEvent::ConnectedAck)
            }
            ServerEvent::SpeechStarted { .. } => {
                Routed::Event(ConversationEvent::UserSpeechDetected)
            }
            ServerEvent::SpeechStopped { .. } => Routed::Event(ConversationEvent::UserSpeechEnded),
            ServerEvent::TranscriptionCompleted { transcript } => {
                Routed::Event(ConversationEvent::TranscriptDelta {
                    speaker: Speaker::User,
                    text: transcript,
                    is_final: true,
                })
            }
            ServerEvent::ResponseCreated { response } => {
                debug!(response_id = %response.id, "Agent response started");
                self.agent_partial.clear();
                Routed::Event(ConversationEvent::AgentProcessing)
            }
            ServerEvent::ResponseDone { response } => {
                debug!(response_id = %response.id, status = ?response.status, "Agent response done");
                Routed::Event(ConversationEvent::AgentTurnComplete)
            }
            ServerEvent::AudioDelta { response_id, delta } => {
                match ServerEvent::decode_audio_delta(&delta) {
                    Ok(pcm) => Routed::Audio(WireAudio {
                        sequence: None,
                        payload: Bytes::from(pcm),
                        sample_rate: Some(OPENAI_REALTIME_SAMPLE_RATE),
                        response_id: Some(response_id),
                    }),
                    Err(e) => Routed::DecodeFailed(format!("invalid base64 audio delta: {e}")),
                }
            }
            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                self.agent_partial.push_str(&delta);
                Routed::Event(ConversationEvent::TranscriptDelta {
                    speaker: Speaker::Agent,
                    text: self.agent_partial.clone(),
                    is_final: false,
                })
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                self.agent_partial.clear();
                Routed::Event(ConversationEvent::TranscriptDelta {
                    speaker: Speaker::Agent,
                    text: transcript,
                    is_final: true,
                })
            }
            ServerEvent::Error { error } => {
                let code = error.code.clone().unwrap_or_else(|| error.error_type.clone());
                if self.non_fatal_error_codes.contains(&code) {
                    warn!(code = %code, message = %error.message, "Non-fatal OpenAI error");
                    return None;
                }
                Routed::Event(ConversationEvent::FatalTransportError {
                    code,
                    message: error.message,
                })
            }
            ServerEvent::SessionUpdated | ServerEvent::Unknown => return None,
        };
        Some(routed)
    }
}

impl MessageRouter for OpenAiRouter {
    fn provider(&self) -> &'static str {
        "openai"
    }

    fn route(&mut self, frame: WireFrame) -> Vec<Routed> {
        let WireFrame::Text(text) = frame else {
            debug!("Ignoring binary frame from OpenAI");
            return Vec::new();
        };
        match serde_json::from_str::<ServerEvent>(&text) {
            Ok(event) => self.route_event(event).into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed OpenAI event");
                Vec::new()
            }
        }
    }

    fn encode_start(&self, session: &Session) -> RouterResult<WireFrame> {
        let voice = session
            .config
            .voice
            .voice
            .clone()
            .unwrap_or_else(|| DEFAULT_VOICE.to_string());

        Self::client_frame(&ClientEvent::SessionUpdate {
            session: RealtimeSessionConfig {
                modalities: Some(vec!["text".to_string(), "audio".to_string()]),
                instructions: Some(interview_instructions(session.config.interview.as_ref())),
                voice: Some(voice),
                input_audio_format: Some(PCM16_FORMAT.to_string()),
                output_audio_format: Some(PCM16_FORMAT.to_string()),
                input_audio_transcription: Some(InputAudioTranscription {
                    model: TRANSCRIPTION_MODEL.to_string(),
                }),
                turn_detection: Some(TurnDetection::ServerVad {
                    threshold: None,
                    prefix_padding_ms: None,
                    silence_duration_ms: None,
                    create_response: Some(true),
                    interrupt_response: Some(true),
                }),
            },
        })
    }

    fn encode_end(&self, _session: &Session) -> Option<WireFrame> {
        None
    }

    fn encode_greeting(&self) -> Option<WireFrame> {
        Self::client_frame(&ClientEvent::ResponseCreate).ok()
    }

    fn encode_interrupt(&self) -> Option<WireFrame> {
        Self::client_frame(&ClientEvent::ResponseCancel).ok()
    }

    fn audio_framing(&self) -> AudioFraming {
        AudioFraming::OpenAiAppend
    }

    fn required_sample_rate(&self) -> Option<u32> {
        Some(OPENAI_REALTIME_SAMPLE_RATE)
    }

    fn handshake_headers(&self) -> Vec<(String, String)> {
        vec![("OpenAI-Beta".to_string(), "realtime=v1".to_string())]
    }

    fn reset(&mut self) {
        self.agent_partial.clear();
    }
}
