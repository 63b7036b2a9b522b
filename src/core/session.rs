//! Interview session model.
//!
//! A [`Session`] is created when the session layer issues a start command
//! and lives in the engine until the conversation reaches a terminal state.
//! The connection token is only ever sent to the relay; it is skipped when
//! the session is serialized into a report and zeroized on drop.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::audio::{AudioResult, validate_sample_rate};

/// Maximum number of resume characters forwarded to the agent.
pub const MAX_RESUME_CHARS: usize = 500;

/// Voice parameters for the synthesized interviewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaking_rate: Option<f32>,
}

/// What the interview is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewContext {
    pub role: String,
    pub difficulty: String,
    pub resume_summary: String,
}

impl InterviewContext {
    /// Build a context, truncating the resume text to [`MAX_RESUME_CHARS`].
    pub fn new(
        role: impl Into<String>,
        difficulty: impl Into<String>,
        resume_text: &str,
    ) -> Self {
        let resume_summary = match resume_text.char_indices().nth(MAX_RESUME_CHARS) {
            Some((cut, _)) => resume_text[..cut].to_string(),
            None => resume_text.to_string(),
        };
        Self {
            role: role.into(),
            difficulty: difficulty.into(),
            resume_summary,
        }
    }
}

/// Configuration handed over by the session layer.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Negotiated wire sample rate in Hz
    pub target_sample_rate: u32,
    #[serde(default)]
    pub voice: VoiceParams,
    /// Bearer token for the relay
    #[serde(default, skip_serializing)]
    pub connection_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interview: Option<InterviewContext>,
}

impl SessionConfig {
    pub fn new(target_sample_rate: u32, connection_token: impl Into<String>) -> Self {
        Self {
            target_sample_rate,
            voice: VoiceParams::default(),
            connection_token: connection_token.into(),
            interview: None,
        }
    }

    pub fn with_voice(mut self, voice: VoiceParams) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_interview(mut self, interview: InterviewContext) -> Self {
        self.interview = Some(interview);
        self
    }

    pub fn validate(&self) -> AudioResult<()> {
        validate_sample_rate(self.target_sample_rate)
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("target_sample_rate", &self.target_sample_rate)
            .field("voice", &self.voice)
            .field("connection_token", &"[REDACTED]")
            .field("interview", &self.interview)
            .finish()
    }
}

impl Drop for SessionConfig {
    fn drop(&mut self) {
        self.connection_token.zeroize();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub config: SessionConfig,
    /// Unix epoch milliseconds
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
}

impl Session {
    /// Start a session, generating an id when the session layer gave none.
    pub fn new(id: Option<String>, config: SessionConfig) -> Self {
        Self {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            config,
            started_at: unix_millis(),
            ended_at: None,
        }
    }

    pub fn end(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(unix_millis());
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at.map(|end| end.saturating_sub(self.started_at))
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
