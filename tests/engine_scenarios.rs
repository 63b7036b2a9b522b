//! Engine scenarios over an in-memory transport.
//!
//! The engine runs on its own task exactly as in production; the test plays
//! the relay through [`FakeRemote`] and drives the output clock by hand.

mod fixtures;
mod mock_providers;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fixtures::*;
use interview_voice_engine::core::audio::{
    CaptureFrame, ManualClock, OutputClock, VirtualOutput,
};
use interview_voice_engine::core::connection::WireFrame;
use interview_voice_engine::{
    ChannelSink, ConversationState, EndReason, EngineCommand, EngineConfig, EngineResult,
    EngineSnapshot, InterviewEngine, ReconnectionConfig, SessionConfig, SessionReport, Speaker,
};
use mock_providers::{FakeConnectorFactory, FakeRemote};

struct Harness {
    engine: Option<InterviewEngine>,
    clock: ManualClock,
    output: VirtualOutput,
    factory: Arc<FakeConnectorFactory>,
    remotes: mpsc::UnboundedReceiver<FakeRemote>,
    reports: mpsc::UnboundedReceiver<SessionReport>,
}

struct Running {
    commands: mpsc::Sender<EngineCommand>,
    snapshots: watch::Receiver<EngineSnapshot>,
    handle: JoinHandle<EngineResult<Option<SessionReport>>>,
    cancel: CancellationToken,
}

fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.connection.reconnection = ReconnectionConfig {
        initial_delay_ms: 10,
        max_delay_ms: 50,
        connect_timeout_ms: 500,
        ..Default::default()
    };
    config
}

fn harness() -> Harness {
    let clock = ManualClock::new(0.0);
    let shared: Arc<dyn OutputClock> = Arc::new(clock.clone());
    let output = VirtualOutput::new(shared, 24000);
    let (factory, remotes) = FakeConnectorFactory::new();
    let factory = Arc::new(factory);
    let (tx, reports) = mpsc::unbounded_channel();

    let engine = InterviewEngine::new(
        engine_config(),
        Box::new(output.clone()),
        factory.clone(),
        Arc::new(ChannelSink::new(tx)),
    )
    .unwrap();

    Harness {
        engine: Some(engine),
        clock,
        output,
        factory,
        remotes,
        reports,
    }
}

fn spawn(mut engine: InterviewEngine) -> Running {
    let (commands, rx) = mpsc::channel(8);
    let snapshots = engine.subscribe();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { engine.run(rx, token).await });
    Running {
        commands,
        snapshots,
        handle,
        cancel,
    }
}

async fn wait_for(
    snapshots: &mut watch::Receiver<EngineSnapshot>,
    what: &str,
    predicate: impl FnMut(&EngineSnapshot) -> bool,
) -> EngineSnapshot {
    tokio::time::timeout(Duration::from_secs(2), snapshots.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .map(|s| s.clone())
        .unwrap()
}

async fn next_remote(remotes: &mut mpsc::UnboundedReceiver<FakeRemote>) -> FakeRemote {
    tokio::time::timeout(Duration::from_secs(2), remotes.recv())
        .await
        .expect("engine never connected")
        .unwrap()
}

/// Start a session and bring it to `agent_speaking`.
async fn start_speaking(h: &mut Harness) -> (Running, FakeRemote) {
    let engine = h.engine.take().unwrap();
    let mut running = spawn(engine);
    running
        .commands
        .send(EngineCommand::StartSession {
            config: SessionConfig::new(16000, "tok"),
            session_id: Some("scenario".into()),
        })
        .await
        .unwrap();

    let mut remote = next_remote(&mut h.remotes).await;
    let start = remote.expect_message("start_session").await;
    assert_eq!(start["session_id"], "scenario");
    assert_eq!(start["target_sample_rate"], 16000);

    remote.send_json(connected_msg());
    wait_for(&mut running.snapshots, "agent_speaking", |s| {
        s.state == ConversationState::AgentSpeaking
    })
    .await;
    (running, remote)
}

async fn end(running: Running) -> SessionReport {
    running.commands.send(EngineCommand::EndSession).await.unwrap();
    tokio::time::timeout(Duration::from_secs(3), running.handle)
        .await
        .expect("engine did not stop")
        .unwrap()
        .unwrap()
        .expect("no report")
}

#[tokio::test]
async fn test_scenario_a_connect_reaches_agent_speaking() {
    let mut h = harness();
    let (running, mut remote) = start_speaking(&mut h).await;
    assert_eq!(
        running.snapshots.borrow().status_message,
        ConversationState::AgentSpeaking.status_message()
    );

    let report = end(running).await;
    let end = remote.expect_message("end_session").await;
    assert_eq!(end["session_id"], "scenario");
    assert_eq!(report.end_reason, Some(EndReason::UserEnded));
    assert_eq!(report.final_state, ConversationState::Ended);
}

#[tokio::test]
async fn test_scenario_b_barge_in_silences_agent() {
    let mut h = harness();
    let (mut running, remote) = start_speaking(&mut h).await;

    for _ in 0..15 {
        remote.send_binary(agent_chunk_bytes());
    }
    remote.send_json(user_speech_started_msg());

    let snapshot = wait_for(&mut running.snapshots, "user_speaking", |s| {
        s.state == ConversationState::UserSpeaking
    })
    .await;
    assert_eq!(snapshot.queue_len, 0);
    assert_eq!(snapshot.active_sources, 0);

    let played = h.output.played();
    assert!(!played.is_empty());
    assert!(played.iter().all(|p| p.stopped_at.is_some()));

    // Agent audio while the candidate holds the floor is discarded
    remote.send_binary(agent_chunk_bytes());
    remote.send_binary(agent_chunk_bytes());
    remote.send_json(serde_json::json!({ "type": "user_speech_ended" }));
    wait_for(&mut running.snapshots, "listening", |s| {
        s.state == ConversationState::Listening
    })
    .await;

    let report = end(running).await;
    assert_eq!(report.stats.barge_ins, 1);
    assert_eq!(report.stats.chunks_received, 17);
    assert_eq!(report.stats.dropped_stale, 2);
}

#[tokio::test]
async fn test_scenario_c_safety_timeout() {
    let mut h = harness();
    let (mut running, _remote) = start_speaking(&mut h).await;

    h.clock.set(31.0);
    wait_for(&mut running.snapshots, "listening", |s| {
        s.state == ConversationState::Listening
    })
    .await;

    let report = end(running).await;
    assert!(
        report
            .transitions
            .iter()
            .any(|t| t.event == "safety_timeout" && t.to == ConversationState::Listening)
    );
}

#[tokio::test]
async fn test_agent_turn_drains_to_listening() {
    let mut h = harness();
    let (mut running, remote) = start_speaking(&mut h).await;

    for _ in 0..3 {
        remote.send_binary(agent_chunk_bytes());
    }
    wait_for(&mut running.snapshots, "scheduled audio", |s| {
        s.active_sources == 3
    })
    .await;

    // Three chunks end at 0.16; the drain grace is 400 ms
    h.clock.set(0.2);
    wait_for(&mut running.snapshots, "drained", |s| s.active_sources == 0).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.clock.set(0.7);
    wait_for(&mut running.snapshots, "listening", |s| {
        s.state == ConversationState::Listening
    })
    .await;

    end(running).await;
}

#[tokio::test]
async fn test_transcript_lands_in_report() {
    let mut h = harness();
    let (mut running, remote) = start_speaking(&mut h).await;

    remote.send_json(agent_transcript_msg("Why do you", false));
    remote.send_json(agent_transcript_msg("Why do you want this role?", true));
    remote.send_json(agent_turn_complete_msg());
    remote.send_json(user_transcript_msg("I like distributed", false));
    remote.send_json(user_transcript_msg("I like distributed systems.", true));

    wait_for(&mut running.snapshots, "transcript", |s| s.transcript_len == 2).await;

    let report = end(running).await;
    let delivered = h.reports.recv().await.unwrap();
    assert_eq!(delivered.session.id, report.session.id);

    assert_eq!(report.transcript.len(), 2);
    assert_eq!(report.transcript[0].speaker, Speaker::Agent);
    assert_eq!(report.transcript[0].text, "Why do you want this role?");
    assert!(report.transcript.iter().all(|m| m.is_final));
    assert!(report.transcript[0].timestamp <= report.transcript[1].timestamp);

    assert_eq!(report.turns.len(), 1);
    assert_eq!(report.turns[0].question, "Why do you want this role?");
    assert_eq!(report.turns[0].answer, "I like distributed systems.");
}

#[tokio::test]
async fn test_reconnect_resends_start_and_keeps_state() {
    let mut h = harness();
    let (mut running, remote) = start_speaking(&mut h).await;

    drop(remote);
    let mut remote = next_remote(&mut h.remotes).await;
    let start = remote.expect_message("start_session").await;
    assert_eq!(start["session_id"], "scenario");

    let snapshot = wait_for(&mut running.snapshots, "reconnected", |s| !s.reconnecting).await;
    assert_eq!(snapshot.state, ConversationState::AgentSpeaking);

    let report = end(running).await;
    assert_eq!(report.stats.reconnects, 1);
}

#[tokio::test]
async fn test_connect_failure_ends_in_error() {
    let mut h = harness();
    h.factory.fail_next(3);

    let engine = h.engine.take().unwrap();
    let running = spawn(engine);
    running
        .commands
        .send(EngineCommand::StartSession {
            config: SessionConfig::new(16000, "tok"),
            session_id: None,
        })
        .await
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(3), running.handle)
        .await
        .expect("engine did not stop")
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(report.final_state, ConversationState::Error);
    assert!(matches!(
        report.end_reason,
        Some(EndReason::ConnectFailed { attempts: 3, .. })
    ));
    assert_eq!(h.factory.attempts(), 3);
}

#[tokio::test]
async fn test_fatal_relay_error_ends_session() {
    let mut h = harness();
    let (running, remote) = start_speaking(&mut h).await;

    remote.send_json(serde_json::json!({
        "type": "error",
        "code": "session_expired",
        "message": "token expired"
    }));

    let report = tokio::time::timeout(Duration::from_secs(3), running.handle)
        .await
        .expect("engine did not stop")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.final_state, ConversationState::Error);
    assert!(matches!(
        report.end_reason,
        Some(EndReason::TransportError { ref code, .. }) if code == "session_expired"
    ));
}

#[tokio::test]
async fn test_capture_streams_only_once_connected() {
    let mut h = harness();
    let engine = h.engine.as_mut().unwrap();
    engine
        .start_session(SessionConfig::new(16000, "tok"), Some("mic".into()))
        .unwrap();

    let (frames, frame_rx) = mpsc::channel(64);
    engine.spawn_capture(frame_rx, 48000, 2).unwrap();

    let engine = h.engine.take().unwrap();
    let mut running = spawn(engine);
    let mut remote = next_remote(&mut h.remotes).await;
    remote.expect_message("start_session").await;

    // Still connecting: the microphone is gated
    for frame in capture_frames_48k_stereo(6) {
        frames.send(CaptureFrame::Samples(frame)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    remote.send_json(connected_msg());
    wait_for(&mut running.snapshots, "agent_speaking", |s| {
        s.state == ConversationState::AgentSpeaking
    })
    .await;

    for frame in capture_frames_48k_stereo(6) {
        frames.send(CaptureFrame::Samples(frame)).await.unwrap();
    }

    let mut uploaded = 0;
    while uploaded < 2 {
        match remote.next_frame().await {
            Some(WireFrame::Binary(bytes)) => {
                // 20 ms of 16 kHz mono PCM16
                assert_eq!(bytes.len(), 640);
                uploaded += 1;
            }
            Some(WireFrame::Text(text)) => panic!("unexpected control frame {text}"),
            None => panic!("no microphone audio uploaded"),
        }
    }

    let report = end(running).await;
    assert!(report.stats.audio_sent >= 2);
}

#[tokio::test]
async fn test_device_failure_is_input_lost() {
    let mut h = harness();
    let engine = h.engine.as_mut().unwrap();
    engine
        .start_session(SessionConfig::new(16000, "tok"), None)
        .unwrap();
    let (frames, frame_rx) = mpsc::channel(4);
    engine.spawn_capture(frame_rx, 16000, 1).unwrap();

    let engine = h.engine.take().unwrap();
    let running = spawn(engine);
    let remote = next_remote(&mut h.remotes).await;
    remote.send_json(connected_msg());

    frames
        .send(CaptureFrame::DeviceError("device unplugged".into()))
        .await
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(3), running.handle)
        .await
        .expect("engine did not stop")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.final_state, ConversationState::Error);
    assert!(matches!(report.end_reason, Some(EndReason::InputLost { .. })));
}

#[tokio::test]
async fn test_cancel_ends_running_session() {
    let mut h = harness();
    let (running, mut remote) = start_speaking(&mut h).await;

    running.cancel.cancel();
    let report = tokio::time::timeout(Duration::from_secs(3), running.handle)
        .await
        .expect("engine did not stop")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.end_reason, Some(EndReason::UserEnded));
    remote.expect_message("end_session").await;
}
