//! In-memory transport
//!
//! `FakeConnectorFactory` hands the engine connectors whose links are plain
//! channels. Each successful connect yields a [`FakeRemote`] to the test,
//! which plays the relay's side of that link.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use interview_voice_engine::Session;
use interview_voice_engine::core::connection::{
    ConnectionError, ConnectionResult, Connector, ConnectorFactory, TransportLink, WireFrame,
};

/// The relay's end of one fake link.
pub struct FakeRemote {
    /// Frames the engine sent
    sent: mpsc::UnboundedReceiver<WireFrame>,
    /// Frames for the engine
    inbound: mpsc::UnboundedSender<WireFrame>,
}

impl FakeRemote {
    pub fn send_json(&self, value: Value) {
        let _ = self.inbound.send(WireFrame::Text(value.to_string()));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self.inbound.send(WireFrame::Binary(Bytes::from(bytes)));
    }

    /// Next frame from the engine, if one arrives within a second.
    pub async fn next_frame(&mut self) -> Option<WireFrame> {
        tokio::time::timeout(Duration::from_secs(1), self.sent.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip frames until a JSON message of type `kind` arrives.
    pub async fn expect_message(&mut self, kind: &str) -> Value {
        loop {
            match self.next_frame().await {
                Some(WireFrame::Text(text)) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == kind {
                        return value;
                    }
                }
                Some(WireFrame::Binary(_)) => {}
                None => panic!("engine never sent {kind}"),
            }
        }
    }
}

struct FakeLink {
    to_remote: mpsc::UnboundedSender<WireFrame>,
    from_remote: mpsc::UnboundedReceiver<WireFrame>,
}

#[async_trait]
impl TransportLink for FakeLink {
    async fn send(&mut self, frame: WireFrame) -> ConnectionResult<()> {
        self.to_remote
            .send(frame)
            .map_err(|_| ConnectionError::WebSocketError("remote gone".to_string()))
    }

    async fn recv(&mut self) -> Option<ConnectionResult<WireFrame>> {
        self.from_remote.recv().await.map(Ok)
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        Ok(())
    }
}

struct FakeConnector {
    remotes: mpsc::UnboundedSender<FakeRemote>,
    failures: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> ConnectionResult<Box<dyn TransportLink>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ConnectionError::ConnectionFailed(format!(
                "refused #{attempt}"
            )));
        }

        let (to_remote, sent) = mpsc::unbounded_channel();
        let (inbound, from_remote) = mpsc::unbounded_channel();
        let _ = self.remotes.send(FakeRemote { sent, inbound });
        Ok(Box::new(FakeLink {
            to_remote,
            from_remote,
        }))
    }
}

/// Connector factory whose links the test controls.
pub struct FakeConnectorFactory {
    remotes: mpsc::UnboundedSender<FakeRemote>,
    failures: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
}

impl FakeConnectorFactory {
    /// A factory plus the stream of remotes, one per successful connect.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (
            Self {
                remotes,
                failures: Arc::new(AtomicU32::new(0)),
                attempts: Arc::new(AtomicU32::new(0)),
            },
            rx,
        )
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ConnectorFactory for FakeConnectorFactory {
    fn create(&self, _session: &Session) -> ConnectionResult<Arc<dyn Connector>> {
        Ok(Arc::new(FakeConnector {
            remotes: self.remotes.clone(),
            failures: self.failures.clone(),
            attempts: self.attempts.clone(),
        }))
    }
}
