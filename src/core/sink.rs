//! Session report and its hand-off to the persistence layer.
//!
//! When the conversation reaches `ended` or `error` the engine builds one
//! [`SessionReport`] and delivers it to a [`SessionSink`]. Scoring and
//! storage happen outside this crate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::info;

use super::conversation::{
    ConversationState, EndReason, InterviewTurn, TranscriptMessage, TransitionRecord,
};
use super::session::Session;

/// Counters collected over one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub chunks_received: u64,
    pub decode_failed: u64,
    /// Dropped by the jitter buffer's overflow trim
    pub dropped_queue: u64,
    /// Dropped because they belonged to an interrupted or inactive turn
    pub dropped_stale: u64,
    pub sources_scheduled: u64,
    pub barge_ins: u64,
    pub reconnects: u64,
    pub drift_resets: u64,
    pub audio_sent: u64,
    pub audio_dropped: u64,
}

/// Everything the evaluation layer needs about a finished interview.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: Session,
    pub final_state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    pub transcript: Vec<TranscriptMessage>,
    pub turns: Vec<InterviewTurn>,
    pub transitions: Vec<TransitionRecord>,
    pub stats: SessionStats,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Report receiver closed")]
    Closed,
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Receives finished session reports.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn deliver(&self, report: &SessionReport) -> SinkResult<()>;
}

/// Writes each report to `{dir}/{session_id}.json`.
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn report_path(&self, session_id: &str) -> PathBuf {
        // Session ids come from outside; keep them to one path component
        let file_name: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

#[async_trait]
impl SessionSink for JsonFileSink {
    async fn deliver(&self, report: &SessionReport) -> SinkResult<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.report_path(&report.session.id);
        let json = serde_json::to_vec_pretty(report)?;
        fs::write(&path, json).await?;
        info!(path = ?path, "Session report written");
        Ok(())
    }
}

/// Forwards reports over a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionReport>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionReport>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl SessionSink for ChannelSink {
    async fn deliver(&self, report: &SessionReport) -> SinkResult<()> {
        self.tx.send(report.clone()).map_err(|_| SinkError::Closed)
    }
}
