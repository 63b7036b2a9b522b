//! WebSocket Mock Relay
//!
//! Speaks the relay protocol: answers `start_session` with `connected`, then
//! plays a scripted agent turn (binary PCM chunks, a transcript, a turn
//! completion) and counts the candidate audio it receives.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use super::MockStats;
use crate::fixtures::{agent_chunk_bytes, agent_transcript_msg, agent_turn_complete_msg, connected_msg};

/// What the relay does after acknowledging a session.
#[derive(Debug, Clone)]
pub struct RelayScript {
    /// Binary agent chunks sent after `connected`
    pub agent_chunks: usize,
    /// Final agent transcript sent after the audio
    pub agent_text: Option<String>,
    /// Send `agent_turn_complete` after the audio
    pub complete_turn: bool,
    /// Close the first connection right after `connected`
    pub drop_first_connection: bool,
}

impl Default for RelayScript {
    fn default() -> Self {
        Self {
            agent_chunks: 10,
            agent_text: Some("Tell me about yourself.".to_string()),
            complete_turn: true,
            drop_first_connection: false,
        }
    }
}

/// Everything the relay observed.
#[derive(Debug, Default)]
pub struct MockRelayState {
    pub stats: MockStats,
    pub auth_headers: Mutex<Vec<String>>,
    pub control_messages: Mutex<Vec<Value>>,
}

impl MockRelayState {
    /// Control messages of the given `type`.
    pub fn messages_of(&self, kind: &str) -> Vec<Value> {
        self.control_messages
            .lock()
            .iter()
            .filter(|m| m["type"] == kind)
            .cloned()
            .collect()
    }

    /// Poll until `end_session` arrives or `timeout` passes.
    pub async fn wait_for_end(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.stats.end_sessions.load(Ordering::SeqCst) > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

pub struct MockRelay {
    pub url: String,
    pub state: Arc<MockRelayState>,
}

impl MockRelay {
    /// Start a relay on an ephemeral localhost port.
    pub async fn start(script: RelayScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockRelayState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                let script = script.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state, script).await {
                        eprintln!("mock relay connection error: {e}");
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/interview"),
            state,
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockRelayState>,
    script: RelayScript,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let auth_state = state.clone();
    let ws_stream = accept_hdr_async(
        stream,
        move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if let Some(auth) = request.headers().get("authorization") {
                auth_state
                    .auth_headers
                    .lock()
                    .push(auth.to_str().unwrap_or_default().to_string());
            }
            Ok(response)
        },
    )
    .await?;
    let (mut write, mut read) = ws_stream.split();
    let connection = state.stats.record_connection();

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text)?;
                state.control_messages.lock().push(value.clone());

                match value["type"].as_str() {
                    Some("start_session") => {
                        state.stats.record_start();
                        write
                            .send(Message::Text(connected_msg().to_string().into()))
                            .await?;

                        if script.drop_first_connection && connection == 1 {
                            write.send(Message::Close(None)).await?;
                            return Ok(());
                        }

                        for _ in 0..script.agent_chunks {
                            write
                                .send(Message::Binary(agent_chunk_bytes().into()))
                                .await?;
                            state.stats.record_chunk_out();
                        }
                        if let Some(text) = &script.agent_text {
                            let msg = agent_transcript_msg(text, true);
                            write.send(Message::Text(msg.to_string().into())).await?;
                        }
                        if script.complete_turn {
                            let msg = agent_turn_complete_msg();
                            write.send(Message::Text(msg.to_string().into())).await?;
                        }
                    }
                    Some("end_session") => {
                        state.stats.record_end();
                    }
                    _ => {}
                }
            }
            Message::Binary(_) => state.stats.record_audio_in(),
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}
