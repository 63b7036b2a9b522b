//! Interview engine.
//!
//! One [`InterviewEngine`] drives one interview session on a single task.
//! It owns the conversation state machine, the playback pipeline, the
//! provider router and the connection manager, and is the only place where
//! they meet:
//!
//! ```text
//! commands ──┐
//! transport ─┼─> InterviewEngine ──> ConversationMachine ──> MediaControl
//! capture ───┤        │                                       (pipeline, capture gate)
//! pump tick ─┘        └──> SessionSink (report at ended/error)
//! ```
//!
//! Nothing here takes a lock: the engine is `&mut self` throughout and the
//! background tasks (transport, capture) talk to it over channels.

mod events;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use events::{EngineCommand, EngineError, EngineEvent, EngineResult, EngineSnapshot};

use crate::config::EngineConfig;
use crate::core::audio::{
    AudioEncoder, AudioOutput, AudioPipeline, AudioUplink, CaptureEvent, CaptureFrame,
    CaptureGate, EncoderConfig, WireAudio, spawn_capture_pump,
};
use crate::core::connection::{
    AudioSender, ConnectionEvent, ConnectionManager, ConnectionState, ConnectorFactory, WireFrame,
};
use crate::core::conversation::{
    ConversationEvent, ConversationMachine, ConversationState, EndReason, MediaControl, Outcome,
};
use crate::core::router::{AudioFraming, MessageRouter, Routed, create_router};
use crate::core::session::{Session, SessionConfig};
use crate::core::sink::{SessionReport, SessionSink, SessionStats};

/// The state machine's handle on playback and capture.
struct MediaPort<'a> {
    pipeline: &'a mut AudioPipeline,
    gate: &'a CaptureGate,
}

impl MediaControl for MediaPort<'_> {
    fn stop_playback(&mut self) -> usize {
        self.pipeline.stop_all()
    }

    fn clear_queue(&mut self) -> usize {
        self.pipeline.clear()
    }

    fn playback_active(&self) -> bool {
        !self.pipeline.is_drained()
    }

    fn set_capture_enabled(&mut self, enabled: bool) {
        self.gate.set_enabled(enabled);
    }

    fn stop_capture(&mut self) {
        self.gate.stop();
    }
}

/// Sends encoded microphone chunks over the transport.
struct TransportUplink {
    sender: AudioSender,
    framing: AudioFraming,
}

impl AudioUplink for TransportUplink {
    fn send_audio(&self, pcm: Bytes) -> bool {
        match self.framing.frame(pcm) {
            Ok(frame) => self.sender.send(frame),
            Err(e) => {
                warn!(error = %e, "Failed to frame microphone audio");
                false
            }
        }
    }
}

pub struct InterviewEngine {
    config: EngineConfig,
    machine: ConversationMachine,
    pipeline: AudioPipeline,
    gate: CaptureGate,
    router: Box<dyn MessageRouter>,
    connectors: Arc<dyn ConnectorFactory>,
    sink: Arc<dyn SessionSink>,
    session: Option<Session>,
    connection: Option<ConnectionManager>,
    connection_tx: mpsc::UnboundedSender<ConnectionEvent>,
    connection_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    capture_tx: mpsc::UnboundedSender<CaptureEvent>,
    capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    capture_task: Option<JoinHandle<()>>,
    capture_finished: bool,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    stats: SessionStats,
    /// Agent audio arrived during the current `agent_speaking` turn
    turn_audio_seen: bool,
    /// Clock time the pipeline was first seen drained in this turn
    drained_since: Option<f64>,
    report: Option<SessionReport>,
}

impl InterviewEngine {
    pub fn new(
        config: EngineConfig,
        output: Box<dyn AudioOutput>,
        connectors: Arc<dyn ConnectorFactory>,
        sink: Arc<dyn SessionSink>,
    ) -> EngineResult<Self> {
        let pipeline = AudioPipeline::new(
            output,
            config.audio.target_sample_rate,
            config.pipeline_config(),
        )?;
        let machine = ConversationMachine::new(config.machine_config());
        let router = create_router(&config.router);

        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(EngineSnapshot {
            state: machine.state(),
            status_message: machine.status_message().to_string(),
            ..Default::default()
        });

        Ok(Self {
            config,
            machine,
            pipeline,
            gate: CaptureGate::new(),
            router,
            connectors,
            sink,
            session: None,
            connection: None,
            connection_tx,
            connection_rx,
            capture_tx,
            capture_rx,
            capture_task: None,
            capture_finished: false,
            snapshot_tx,
            stats: SessionStats::default(),
            turn_audio_seen: false,
            drained_since: None,
            report: None,
        })
    }

    /// Replace the router built from configuration.
    pub fn with_router(mut self, router: Box<dyn MessageRouter>) -> Self {
        self.router = router;
        self
    }

    // ===== Accessors =====

    pub fn state(&self) -> ConversationState {
        self.machine.state()
    }

    pub fn machine(&self) -> &ConversationMachine {
        &self.machine
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn report(&self) -> Option<&SessionReport> {
        self.report.as_ref()
    }

    pub fn capture_finished(&self) -> bool {
        self.capture_finished
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map(|c| c.state())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.machine.state(),
            status_message: self.machine.status_message().to_string(),
            reconnecting: self.machine.is_reconnecting(),
            queue_len: self.pipeline.queue_len(),
            active_sources: self.pipeline.active_sources(),
            transcript_len: self.machine.transcript().len(),
        }
    }

    /// Receive a snapshot whenever observable state changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats;
        stats.dropped_queue = self.pipeline.queue_stats().dropped;
        stats.sources_scheduled = self.pipeline.scheduled_total();
        stats.drift_resets = self.pipeline.drift_resets();
        stats.barge_ins = self.machine.barge_ins();
        if let Some(connection) = &self.connection {
            let transport = connection.stats();
            stats.reconnects = transport.reconnects;
            stats.audio_sent = transport.audio_sent;
            stats.audio_dropped = transport.audio_dropped;
        }
        stats
    }

    // ===== Commands =====

    /// Open a session: `idle -> connecting`, then connect in the background.
    pub fn start_session(
        &mut self,
        mut config: SessionConfig,
        session_id: Option<String>,
    ) -> EngineResult<()> {
        if self.session.is_some() || self.machine.state() != ConversationState::Idle {
            return Err(EngineError::SessionActive);
        }

        if let Some(rate) = self.router.required_sample_rate() {
            if rate != config.target_sample_rate {
                warn!(
                    requested = config.target_sample_rate,
                    provider_rate = rate,
                    provider = self.router.provider(),
                    "Provider dictates the wire sample rate"
                );
                config.target_sample_rate = rate;
            }
        }
        config.validate()?;

        let session = Session::new(session_id, config);
        self.pipeline
            .set_wire_rate(session.config.target_sample_rate)?;
        let start_frame = self.router.encode_start(&session)?;
        let connector = self.connectors.create(&session)?;

        let mut connection = ConnectionManager::new(
            connector,
            self.config.connection.reconnection.clone(),
            self.config.connection.audio_channel_capacity,
            self.connection_tx.clone(),
        );
        connection.connect(start_frame)?;

        info!(
            session_id = %session.id,
            sample_rate = session.config.target_sample_rate,
            provider = self.router.provider(),
            "Interview session starting"
        );

        self.session = Some(session);
        self.connection = Some(connection);
        self.dispatch(ConversationEvent::SessionStartCommand);
        self.publish_snapshot();
        Ok(())
    }

    /// End the session on the user's behalf and deliver the report.
    pub async fn end_session(&mut self) -> EngineResult<()> {
        if self.session.is_none() {
            return Err(EngineError::NoSession);
        }
        self.dispatch(ConversationEvent::SessionEndCommand);
        self.finish_if_terminal().await;
        self.publish_snapshot();
        Ok(())
    }

    /// Start encoding microphone frames and streaming them to the relay.
    ///
    /// Frames are interleaved `f32` samples at `native_rate` with `channels`
    /// channels. Upload only happens in conversational states.
    pub fn spawn_capture(
        &mut self,
        frames: mpsc::Receiver<CaptureFrame>,
        native_rate: u32,
        channels: u16,
    ) -> EngineResult<()> {
        let (Some(session), Some(connection)) = (self.session.as_ref(), self.connection.as_ref())
        else {
            return Err(EngineError::NoSession);
        };
        if self.capture_task.is_some() {
            return Err(EngineError::CaptureActive);
        }

        let encoder = AudioEncoder::new(EncoderConfig {
            native_sample_rate: native_rate,
            target_sample_rate: session.config.target_sample_rate,
            channels,
            chunk_ms: self.config.audio.chunk_ms,
        })?;
        let uplink = Arc::new(TransportUplink {
            sender: connection.audio_sender()?,
            framing: self.router.audio_framing(),
        });

        self.capture_task = Some(spawn_capture_pump(
            encoder,
            frames,
            uplink,
            self.gate.clone(),
            self.capture_tx.clone(),
        ));
        Ok(())
    }

    // ===== Event Handling =====

    /// Process one bus event.
    pub async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connection(event) => self.on_connection_event(event),
            EngineEvent::Capture(event) => self.on_capture_event(event),
        }
        self.finish_if_terminal().await;
        self.publish_snapshot();
    }

    /// Periodic work: reap finished sources, feed the scheduler, detect the
    /// end of agent playback and enforce the `agent_speaking` safety valve.
    pub async fn tick(&mut self) {
        self.pipeline.reap_finished();

        if self.session.is_some() && !self.machine.state().is_terminal() {
            self.pipeline.pump();
            self.check_drained();

            let now = self.pipeline.current_time();
            let outcome = {
                let mut media = MediaPort {
                    pipeline: &mut self.pipeline,
                    gate: &self.gate,
                };
                self.machine.check_timeout(now, &mut media)
            };
            if let Outcome::Transitioned { from, to } = outcome {
                self.after_transition(from, to);
            }
        }

        self.finish_if_terminal().await;
        self.publish_snapshot();
    }

    /// Run until the session reaches a terminal state, the command channel
    /// closes with no session, or `cancel` fires.
    ///
    /// Cancelling a running session ends it as if the user had ended it.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        cancel: CancellationToken,
    ) -> EngineResult<Option<SessionReport>> {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.playback.pump_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        while self.report.is_none() {
            if !commands_open && self.session.is_none() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.session.is_some() {
                        info!("Engine cancelled, ending session");
                        self.end_session().await?;
                    }
                    break;
                }

                command = commands.recv(), if commands_open => match command {
                    Some(EngineCommand::StartSession { config, session_id }) => {
                        if let Err(e) = self.start_session(config, session_id) {
                            warn!(error = %e, "Start command rejected");
                        }
                    }
                    Some(EngineCommand::EndSession) => {
                        if let Err(e) = self.end_session().await {
                            warn!(error = %e, "End command ignored");
                        }
                    }
                    None => commands_open = false,
                },

                Some(event) = self.connection_rx.recv() => {
                    self.handle_event(event.into()).await;
                }

                Some(event) = self.capture_rx.recv() => {
                    self.handle_event(event.into()).await;
                }

                _ = ticker.tick() => self.tick().await,
            }
        }

        Ok(self.report.clone())
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { attempt } => {
                debug!(attempt, "Transport open, waiting for session acknowledgement");
            }
            ConnectionEvent::Reconnected { attempt } => {
                self.router.reset();
                self.dispatch(ConversationEvent::Reconnected { attempt });
            }
            ConnectionEvent::Disconnected { reason } => {
                self.dispatch(ConversationEvent::ConnectionLost { reason });
            }
            ConnectionEvent::Frame(frame) => {
                for routed in self.router.route(frame) {
                    self.on_routed(routed);
                }
            }
            ConnectionEvent::ConnectFailed {
                attempts,
                last_error,
            } => {
                self.dispatch(ConversationEvent::ConnectFailed {
                    attempts,
                    last_error,
                });
            }
        }
    }

    fn on_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::InputLost { reason } => {
                self.dispatch(ConversationEvent::InputLost { reason });
            }
            CaptureEvent::Finished { chunks_sent } => {
                info!(chunks_sent, "Microphone input finished");
                self.capture_finished = true;
            }
        }
    }

    fn on_routed(&mut self, routed: Routed) {
        match routed {
            Routed::Event(event) => {
                self.dispatch(event);
            }
            Routed::Audio(wire) => self.on_agent_audio(wire),
            Routed::DecodeFailed(reason) => {
                self.stats.chunks_received += 1;
                self.stats.decode_failed += 1;
                warn!(reason = %reason, "Dropping undecodable agent audio");
            }
        }
    }

    fn on_agent_audio(&mut self, wire: WireAudio) {
        self.stats.chunks_received += 1;
        let response_id = wire.response_id.clone();

        if !self.machine.accepts_agent_audio(response_id.as_deref()) {
            self.stats.dropped_stale += 1;
            debug!(
                state = %self.machine.state(),
                response_id = ?response_id,
                "Dropping agent audio"
            );
            return;
        }

        // Audio after the agent yielded the floor means it started a new turn
        if matches!(
            self.machine.state(),
            ConversationState::Listening | ConversationState::Processing
        ) {
            self.dispatch(ConversationEvent::AgentSpeechResumed);
        }
        self.machine.note_agent_response(response_id.as_deref());

        match self.pipeline.ingest(wire) {
            Ok(outcome) => {
                self.turn_audio_seen = true;
                self.drained_since = None;
                if outcome.queue.dropped > 0 {
                    debug!(
                        sequence = outcome.sequence,
                        dropped = outcome.queue.dropped,
                        "Jitter buffer trimmed"
                    );
                }
                self.pipeline.pump();
            }
            Err(e) => {
                self.stats.decode_failed += 1;
                warn!(error = %e, "Dropping undecodable agent chunk");
            }
        }
    }

    fn dispatch(&mut self, event: ConversationEvent) -> Outcome {
        let now = self.pipeline.current_time();
        let outcome = {
            let mut media = MediaPort {
                pipeline: &mut self.pipeline,
                gate: &self.gate,
            };
            self.machine.handle(event, now, &mut media)
        };
        if let Outcome::Transitioned { from, to } = outcome {
            self.after_transition(from, to);
        }
        outcome
    }

    fn after_transition(&mut self, from: ConversationState, to: ConversationState) {
        if to == ConversationState::AgentSpeaking {
            self.turn_audio_seen = !self.pipeline.is_drained();
            self.drained_since = None;
        }

        if from == ConversationState::Connecting && to == ConversationState::AgentSpeaking {
            if let Some(frame) = self.router.encode_greeting() {
                self.send_control(frame);
            }
        }

        if from == ConversationState::AgentSpeaking && to == ConversationState::UserSpeaking {
            if let Some(frame) = self.router.encode_interrupt() {
                self.send_control(frame);
            }
        }
    }

    /// `agent_speaking` ends on its own once everything received has played
    /// and nothing new arrived for the drain grace period.
    fn check_drained(&mut self) {
        if self.machine.state() != ConversationState::AgentSpeaking
            || !self.turn_audio_seen
            || !self.pipeline.is_drained()
        {
            self.drained_since = None;
            return;
        }

        let now = self.pipeline.current_time();
        let grace = self.config.playback.drain_grace_ms as f64 / 1000.0;
        match self.drained_since {
            None => self.drained_since = Some(now),
            Some(since) if now - since >= grace => {
                self.drained_since = None;
                self.dispatch(ConversationEvent::QueueDrained);
            }
            Some(_) => {}
        }
    }

    fn send_control(&self, frame: WireFrame) {
        if let Some(connection) = &self.connection {
            if let Err(e) = connection.send_control(frame) {
                warn!(error = %e, "Failed to queue control message");
            }
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    // ===== Session End =====

    async fn finish_if_terminal(&mut self) {
        if !self.machine.state().is_terminal() || self.report.is_some() {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let user_ended = matches!(self.machine.end_reason(), Some(EndReason::UserEnded));
        if let Some(mut connection) = self.connection.take() {
            if user_ended {
                if let Some(frame) = self.router.encode_end(session) {
                    let _ = connection.send_control(frame);
                }
            }
            connection.disconnect().await;

            let transport = connection.stats();
            self.stats.reconnects = transport.reconnects;
            self.stats.audio_sent = transport.audio_sent;
            self.stats.audio_dropped = transport.audio_dropped;
        }

        self.gate.stop();
        if let Some(task) = self.capture_task.take() {
            task.abort();
        }
        if let Err(e) = self.pipeline.finish_output() {
            error!(error = %e, "Failed to finalize audio output");
        }

        session.end();
        let session = session.clone();

        let report = SessionReport {
            final_state: self.machine.state(),
            end_reason: self.machine.end_reason().cloned(),
            transcript: self.machine.transcript().entries().to_vec(),
            turns: self.machine.transcript().turns(),
            transitions: self.machine.transitions().to_vec(),
            stats: self.stats(),
            session,
        };

        info!(
            session_id = %report.session.id,
            final_state = %report.final_state,
            duration_ms = report.session.duration_ms().unwrap_or_default(),
            transcript_entries = report.transcript.len(),
            barge_ins = report.stats.barge_ins,
            "Interview session finished"
        );

        if let Err(e) = self.sink.deliver(&report).await {
            error!(error = %e, "Failed to deliver session report");
        }
        self.report = Some(report);
    }
}
