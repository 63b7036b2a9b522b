use std::fmt;

use serde::{Deserialize, Serialize};

use super::transcript::Speaker;

/// Turn-taking state of the interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No session yet
    #[default]
    Idle,
    /// Transport opening, waiting for the agent's ack
    Connecting,
    /// Agent speech is arriving or playing
    AgentSpeaking,
    /// Waiting for the candidate
    Listening,
    /// Agent is computing a reply
    Processing,
    /// Candidate is speaking
    UserSpeaking,
    /// Session finished normally
    Ended,
    /// Session aborted by a fatal error
    Error,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::Connecting => "connecting",
            ConversationState::AgentSpeaking => "agent_speaking",
            ConversationState::Listening => "listening",
            ConversationState::Processing => "processing",
            ConversationState::UserSpeaking => "user_speaking",
            ConversationState::Ended => "ended",
            ConversationState::Error => "error",
        }
    }

    /// `ended` and `error` absorb every event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversationState::Ended | ConversationState::Error)
    }

    /// States in which microphone audio is uploaded.
    pub fn streams_microphone(&self) -> bool {
        matches!(
            self,
            ConversationState::AgentSpeaking
                | ConversationState::Listening
                | ConversationState::Processing
                | ConversationState::UserSpeaking
        )
    }

    /// Human-readable status for the UI.
    pub fn status_message(&self) -> &'static str {
        match self {
            ConversationState::Idle => "Ready to start",
            ConversationState::Connecting => "Connecting to interviewer...",
            ConversationState::AgentSpeaking => "Interviewer is speaking",
            ConversationState::Listening => "Listening...",
            ConversationState::Processing => "Interviewer is thinking...",
            ConversationState::UserSpeaking => "You are speaking",
            ConversationState::Ended => "Interview complete",
            ConversationState::Error => "Interview interrupted",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain events that drive the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    SessionStartCommand,
    ConnectedAck,
    AgentTurnComplete,
    /// Jitter buffer and scheduler both empty with no chunk pending
    QueueDrained,
    AgentSpeechResumed,
    AgentProcessing,
    UserSpeechDetected,
    UserSpeechEnded,
    TranscriptDelta {
        speaker: Speaker,
        text: String,
        is_final: bool,
    },
    FatalTransportError {
        code: String,
        message: String,
    },
    ConnectFailed {
        attempts: u32,
        last_error: String,
    },
    InputLost {
        reason: String,
    },
    ConnectionLost {
        reason: String,
    },
    Reconnected {
        attempt: u32,
    },
    AgentEndedSession,
    SessionEndCommand,
    /// The `agent_speaking` safety valve expired
    SafetyTimeout,
}

impl ConversationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConversationEvent::SessionStartCommand => "session_start_command",
            ConversationEvent::ConnectedAck => "connected_ack",
            ConversationEvent::AgentTurnComplete => "agent_turn_complete",
            ConversationEvent::QueueDrained => "queue_drained",
            ConversationEvent::AgentSpeechResumed => "agent_speech_resumed",
            ConversationEvent::AgentProcessing => "agent_processing",
            ConversationEvent::UserSpeechDetected => "user_speech_detected",
            ConversationEvent::UserSpeechEnded => "user_speech_ended",
            ConversationEvent::TranscriptDelta { .. } => "transcript_delta",
            ConversationEvent::FatalTransportError { .. } => "fatal_transport_error",
            ConversationEvent::ConnectFailed { .. } => "connect_failed",
            ConversationEvent::InputLost { .. } => "input_lost",
            ConversationEvent::ConnectionLost { .. } => "connection_lost",
            ConversationEvent::Reconnected { .. } => "reconnected",
            ConversationEvent::AgentEndedSession => "agent_ended_session",
            ConversationEvent::SessionEndCommand => "session_end_command",
            ConversationEvent::SafetyTimeout => "safety_timeout",
        }
    }
}

/// Why a session reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndReason {
    /// The candidate or host ended the interview
    UserEnded,
    /// The interviewer closed the interview
    AgentEnded,
    /// The provider reported an unrecoverable error
    TransportError { code: String, message: String },
    /// Every connection attempt failed
    ConnectFailed { attempts: u32, last_error: String },
    /// The capture device failed
    InputLost { reason: String },
}
