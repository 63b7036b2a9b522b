//! Connection manager: one background task per session that owns the
//! transport link.
//!
//! The task connects with bounded exponential backoff, replays the
//! remembered `start_session` frame after every (re)connect, forwards
//! control and audio frames outbound, and publishes inbound frames and
//! lifecycle changes as [`ConnectionEvent`]s.
//!
//! Outbound policy:
//! - control frames go through an unbounded queue and wait there until the
//!   link is up; a control frame whose send fails is kept for the next link
//! - audio frames go through a bounded queue and are dropped whenever the
//!   link is down or the queue is full, since late audio is worthless

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{
    ConnectionAttempt, ConnectionError, ConnectionEvent, ConnectionResult, ConnectionState,
    Connector, ReconnectionConfig, TransportLink, WireFrame,
};

/// Default capacity of the outbound audio queue.
pub const DEFAULT_AUDIO_CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect` waits for the task to close the link.
const CLOSE_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Default)]
struct ConnectionCounters {
    audio_sent: AtomicU64,
    audio_dropped: AtomicU64,
    control_sent: AtomicU64,
    reconnects: AtomicU64,
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub audio_sent: u64,
    pub audio_dropped: u64,
    pub control_sent: u64,
    pub reconnects: u64,
}

impl ConnectionCounters {
    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            audio_sent: self.audio_sent.load(Ordering::Relaxed),
            audio_dropped: self.audio_dropped.load(Ordering::Relaxed),
            control_sent: self.control_sent.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable, non-blocking handle for outbound audio.
#[derive(Debug, Clone)]
pub struct AudioSender {
    tx: mpsc::Sender<WireFrame>,
    connected: Arc<AtomicBool>,
    counters: Arc<ConnectionCounters>,
}

impl AudioSender {
    /// Queue an audio frame. Returns `false` if it was dropped.
    pub fn send(&self, frame: WireFrame) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            self.counters.audio_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound audio queue full, dropping chunk");
                self.counters.audio_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.audio_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: ReconnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    intentional_disconnect: Arc<AtomicBool>,
    counters: Arc<ConnectionCounters>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    audio_tx: Option<mpsc::Sender<WireFrame>>,
    audio_rx: Option<mpsc::Receiver<WireFrame>>,
    control_tx: Option<mpsc::UnboundedSender<WireFrame>>,
    control_rx: Option<mpsc::UnboundedReceiver<WireFrame>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        config: ReconnectionConfig,
        audio_capacity: usize,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (audio_tx, audio_rx) = mpsc::channel(audio_capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Self {
            connector,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(ConnectionCounters::default()),
            events,
            audio_tx: Some(audio_tx),
            audio_rx: Some(audio_rx),
            control_tx: Some(control_tx),
            control_rx: Some(control_rx),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Start the connection task. `start_frame` is sent first on every link.
    ///
    /// Returns immediately; the outcome arrives as a [`ConnectionEvent`].
    pub fn connect(&mut self, start_frame: WireFrame) -> ConnectionResult<()> {
        if self.handle.is_some() {
            return Err(ConnectionError::AlreadyStarted);
        }
        let (Some(audio_rx), Some(control_rx)) = (self.audio_rx.take(), self.control_rx.take())
        else {
            return Err(ConnectionError::AlreadyStarted);
        };

        self.intentional_disconnect.store(false, Ordering::SeqCst);

        let task = ConnectionTask {
            connector: self.connector.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            connected: self.connected.clone(),
            intentional_disconnect: self.intentional_disconnect.clone(),
            counters: self.counters.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            start_frame,
        };

        self.handle = Some(tokio::spawn(task.run(audio_rx, control_rx)));
        Ok(())
    }

    /// Queue a control frame; it is delivered once the link is up.
    pub fn send_control(&self, frame: WireFrame) -> ConnectionResult<()> {
        let tx = self.control_tx.as_ref().ok_or(ConnectionError::NotConnected)?;
        tx.send(frame).map_err(|_| ConnectionError::NotConnected)
    }

    /// Queue an audio frame without blocking. Returns `false` if dropped.
    pub fn send_audio(&self, frame: WireFrame) -> bool {
        match self.audio_sender() {
            Ok(sender) => sender.send(frame),
            Err(_) => {
                self.counters.audio_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// A handle the capture pump can send audio through.
    pub fn audio_sender(&self) -> ConnectionResult<AudioSender> {
        let tx = self.audio_tx.clone().ok_or(ConnectionError::NotConnected)?;
        Ok(AudioSender {
            tx,
            connected: self.connected.clone(),
            counters: self.counters.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.counters.snapshot()
    }

    /// Close the transport and stop the task. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        self.control_tx = None;
        self.audio_tx = None;

        if let Some(mut handle) = self.handle.take() {
            let graceful =
                tokio::time::timeout(Duration::from_millis(CLOSE_TIMEOUT_MS), &mut handle).await;
            if graceful.is_err() {
                warn!("Connection task did not stop in time, aborting");
                handle.abort();
            }
            info!("Disconnected from relay");
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// How a served link ended.
enum LinkEnd {
    /// `disconnect` was called
    Cancelled,
    /// The link failed or the peer closed it
    Lost(String),
}

struct ConnectionTask {
    connector: Arc<dyn Connector>,
    config: ReconnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    intentional_disconnect: Arc<AtomicBool>,
    counters: Arc<ConnectionCounters>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    cancel: CancellationToken,
    start_frame: WireFrame,
}

impl ConnectionTask {
    async fn run(
        self,
        mut audio_rx: mpsc::Receiver<WireFrame>,
        mut control_rx: mpsc::UnboundedReceiver<WireFrame>,
    ) {
        let mut pending: VecDeque<WireFrame> = VecDeque::new();
        let mut initial = true;

        loop {
            let Some(mut link) = self.establish(initial).await else {
                break;
            };

            // Audio queued while the link was down is stale
            let mut stale = 0usize;
            while audio_rx.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                debug!(stale, "Discarded audio queued before the link opened");
            }

            let end = self
                .serve(&mut link, &mut audio_rx, &mut control_rx, &mut pending)
                .await;
            self.connected.store(false, Ordering::SeqCst);

            match end {
                LinkEnd::Cancelled => break,
                LinkEnd::Lost(reason) => {
                    if self.intentional_disconnect.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(reason = %reason, "Relay connection lost");
                    let _ = self.events.send(ConnectionEvent::Disconnected { reason });
                    initial = false;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        let mut state = self.state.write();
        if *state != ConnectionState::Failed {
            *state = ConnectionState::Disconnected;
        }
        debug!("Connection task ended");
    }

    /// Open a link, retrying with backoff. `None` when the task should stop.
    async fn establish(&self, initial: bool) -> Option<Box<dyn TransportLink>> {
        let mut attempt = ConnectionAttempt::default();
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        loop {
            attempt.attempt += 1;
            *self.state.write() = if initial {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = tokio::time::timeout(connect_timeout, self.connector.connect()) => result,
            };

            match result {
                Ok(Ok(link)) => {
                    self.connected.store(true, Ordering::SeqCst);
                    *self.state.write() = ConnectionState::Connected;
                    let event = if initial {
                        info!(attempt = attempt.attempt, "Connected to relay");
                        ConnectionEvent::Connected {
                            attempt: attempt.attempt,
                        }
                    } else {
                        info!(attempt = attempt.attempt, "Reconnected to relay");
                        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                        ConnectionEvent::Reconnected {
                            attempt: attempt.attempt,
                        }
                    };
                    let _ = self.events.send(event);
                    return Some(link);
                }
                Ok(Err(e)) => attempt.last_error = Some(e.to_string()),
                Err(_) => {
                    attempt.last_error = Some(format!(
                        "connect attempt timed out after {}ms",
                        self.config.connect_timeout_ms
                    ))
                }
            }

            if self.intentional_disconnect.load(Ordering::SeqCst) {
                return None;
            }

            let last_error = attempt.last_error.clone().unwrap_or_default();

            if !self.config.should_retry(attempt.attempt) {
                error!(
                    attempts = attempt.attempt,
                    error = %last_error,
                    "Giving up on relay connection"
                );
                *self.state.write() = ConnectionState::Failed;
                let _ = self.events.send(ConnectionEvent::ConnectFailed {
                    attempts: attempt.attempt,
                    last_error,
                });
                return None;
            }

            attempt.backoff_ms = self.config.calculate_delay(attempt.attempt);
            warn!(
                attempt = attempt.attempt,
                max_attempts = self.config.max_attempts,
                delay_ms = attempt.backoff_ms,
                error = %last_error,
                "Connection attempt failed, retrying"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(Duration::from_millis(attempt.backoff_ms)) => {}
            }
        }
    }

    /// Pump frames over an open link until it ends.
    async fn serve(
        &self,
        link: &mut Box<dyn TransportLink>,
        audio_rx: &mut mpsc::Receiver<WireFrame>,
        control_rx: &mut mpsc::UnboundedReceiver<WireFrame>,
        pending: &mut VecDeque<WireFrame>,
    ) -> LinkEnd {
        // Session restore comes before anything else on the link
        if let Err(e) = link.send(self.start_frame.clone()).await {
            return LinkEnd::Lost(e.to_string());
        }
        while let Some(frame) = pending.pop_front() {
            if let Err(e) = link.send(frame.clone()).await {
                pending.push_front(frame);
                return LinkEnd::Lost(e.to_string());
            }
            self.counters.control_sent.fetch_add(1, Ordering::Relaxed);
        }

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    // Control frames queued before disconnect (end_session) still go out
                    while let Ok(frame) = control_rx.try_recv() {
                        if link.send(frame).await.is_err() {
                            break;
                        }
                        self.counters.control_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    if let Err(e) = link.close().await {
                        debug!(error = %e, "Error closing relay link");
                    }
                    return LinkEnd::Cancelled;
                }

                Some(frame) = control_rx.recv() => {
                    if let Err(e) = link.send(frame.clone()).await {
                        pending.push_back(frame);
                        return LinkEnd::Lost(e.to_string());
                    }
                    self.counters.control_sent.fetch_add(1, Ordering::Relaxed);
                }

                Some(frame) = audio_rx.recv() => {
                    if let Err(e) = link.send(frame).await {
                        return LinkEnd::Lost(e.to_string());
                    }
                    self.counters.audio_sent.fetch_add(1, Ordering::Relaxed);
                }

                inbound = link.recv() => match inbound {
                    Some(Ok(frame)) => {
                        let _ = self.events.send(ConnectionEvent::Frame(frame));
                    }
                    Some(Err(e)) => return LinkEnd::Lost(e.to_string()),
                    None => return LinkEnd::Lost("closed by relay".to_string()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    /// The relay side of an in-memory link.
    struct Remote {
        to_client: mpsc::UnboundedSender<WireFrame>,
        from_client: mpsc::UnboundedReceiver<WireFrame>,
    }

    struct MemoryLink {
        inbound: mpsc::UnboundedReceiver<WireFrame>,
        outbound: mpsc::UnboundedSender<WireFrame>,
    }

    #[async_trait]
    impl TransportLink for MemoryLink {
        async fn send(&mut self, frame: WireFrame) -> ConnectionResult<()> {
            self.outbound
                .send(frame)
                .map_err(|_| ConnectionError::WebSocketError("remote gone".into()))
        }

        async fn recv(&mut self) -> Option<ConnectionResult<WireFrame>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) -> ConnectionResult<()> {
            self.inbound.close();
            Ok(())
        }
    }

    /// Fails the first `failures` attempts, then hands out memory links.
    struct ScriptedConnector {
        failures: u32,
        attempts: AtomicU32,
        remotes: Mutex<Vec<Remote>>,
    }

    impl ScriptedConnector {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                attempts: AtomicU32::new(0),
                remotes: Mutex::new(Vec::new()),
            })
        }

        fn take_remote(&self) -> Option<Remote> {
            let mut remotes = self.remotes.lock();
            if remotes.is_empty() {
                None
            } else {
                Some(remotes.remove(0))
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> ConnectionResult<Box<dyn TransportLink>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(ConnectionError::ConnectionFailed(format!("refused #{n}")));
            }
            let (to_client, inbound) = mpsc::unbounded_channel();
            let (outbound, from_client) = mpsc::unbounded_channel();
            self.remotes.lock().push(Remote {
                to_client,
                from_client,
            });
            Ok(Box::new(MemoryLink { inbound, outbound }))
        }
    }

    fn start_frame() -> WireFrame {
        WireFrame::Text(r#"{"type":"start_session"}"#.to_string())
    }

    fn manager(
        connector: Arc<ScriptedConnector>,
    ) -> (ConnectionManager, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ConnectionManager::new(connector, ReconnectionConfig::default(), 8, tx),
            rx,
        )
    }

    async fn next_lifecycle(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
        loop {
            match rx.recv().await {
                Some(ConnectionEvent::Frame(_)) => continue,
                Some(event) => return event,
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_emit_one_connect_failed() {
        let connector = ScriptedConnector::new(u32::MAX);
        let (mut manager, mut events) = manager(connector.clone());
        manager.connect(start_frame()).unwrap();

        let event = next_lifecycle(&mut events).await;
        assert_eq!(
            event,
            ConnectionEvent::ConnectFailed {
                attempts: 3,
                last_error: "Connection failed: refused #3".to_string(),
            }
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert!(events.try_recv().is_err());
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_attempts() {
        let connector = ScriptedConnector::new(2);
        let (mut manager, mut events) = manager(connector.clone());
        let started = tokio::time::Instant::now();
        manager.connect(start_frame()).unwrap();

        assert_eq!(
            next_lifecycle(&mut events).await,
            ConnectionEvent::Connected { attempt: 3 }
        );
        // 500 ms after the first failure, 1000 ms after the second
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_queued_until_connected() {
        let connector = ScriptedConnector::new(1);
        let (mut manager, mut events) = manager(connector.clone());
        manager
            .send_control(WireFrame::Text("queued".to_string()))
            .unwrap();
        manager.connect(start_frame()).unwrap();

        assert!(matches!(
            next_lifecycle(&mut events).await,
            ConnectionEvent::Connected { .. }
        ));
        let mut remote = connector.take_remote().unwrap();
        assert_eq!(remote.from_client.recv().await, Some(start_frame()));
        assert_eq!(
            remote.from_client.recv().await,
            Some(WireFrame::Text("queued".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_dropped_while_disconnected() {
        let connector = ScriptedConnector::new(0);
        let (mut manager, mut events) = manager(connector.clone());

        assert!(!manager.send_audio(WireFrame::Binary(bytes::Bytes::from_static(&[0, 0]))));
        assert_eq!(manager.stats().audio_dropped, 1);

        manager.connect(start_frame()).unwrap();
        next_lifecycle(&mut events).await;
        let mut remote = connector.take_remote().unwrap();
        assert_eq!(remote.from_client.recv().await, Some(start_frame()));

        let audio = WireFrame::Binary(bytes::Bytes::from_static(&[1, 0]));
        assert!(manager.send_audio(audio.clone()));
        assert_eq!(remote.from_client.recv().await, Some(audio));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frames_forwarded() {
        let connector = ScriptedConnector::new(0);
        let (mut manager, mut events) = manager(connector.clone());
        manager.connect(start_frame()).unwrap();
        next_lifecycle(&mut events).await;

        let remote = connector.take_remote().unwrap();
        remote
            .to_client
            .send(WireFrame::Text("hello".to_string()))
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Frame(WireFrame::Text("hello".to_string())))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resends_start_frame() {
        let connector = ScriptedConnector::new(0);
        let (mut manager, mut events) = manager(connector.clone());
        manager.connect(start_frame()).unwrap();
        next_lifecycle(&mut events).await;

        let first = connector.take_remote().unwrap();
        drop(first);

        assert!(matches!(
            next_lifecycle(&mut events).await,
            ConnectionEvent::Disconnected { .. }
        ));
        assert_eq!(
            next_lifecycle(&mut events).await,
            ConnectionEvent::Reconnected { attempt: 1 }
        );
        let mut second = connector.take_remote().unwrap();
        assert_eq!(second.from_client.recv().await, Some(start_frame()));
        assert_eq!(manager.stats().reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_and_silent() {
        let connector = ScriptedConnector::new(0);
        let (mut manager, mut events) = manager(connector.clone());
        manager.connect(start_frame()).unwrap();
        next_lifecycle(&mut events).await;

        manager.disconnect().await;
        manager.disconnect().await;

        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.send_control(WireFrame::Text("late".into())).is_err());
        assert!(!manager.send_audio(WireFrame::Binary(bytes::Bytes::from_static(&[0, 0]))));

        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, ConnectionEvent::Disconnected { .. }));
        }
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_flushes_queued_control() {
        let connector = ScriptedConnector::new(0);
        let (mut manager, mut events) = manager(connector.clone());
        manager.connect(start_frame()).unwrap();
        next_lifecycle(&mut events).await;
        let mut remote = connector.take_remote().unwrap();
        assert_eq!(remote.from_client.recv().await, Some(start_frame()));

        let end = WireFrame::Text(r#"{"type":"end_session"}"#.to_string());
        manager.send_control(end.clone()).unwrap();
        manager.disconnect().await;

        assert_eq!(remote.from_client.recv().await, Some(end));
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let connector = ScriptedConnector::new(0);
        let (mut manager, _events) = manager(connector);
        manager.connect(start_frame()).unwrap();
        assert!(matches!(
            manager.connect(start_frame()),
            Err(ConnectionError::AlreadyStarted)
        ));
        manager.disconnect().await;
    }
}
