use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use interview_voice_engine::core::audio::{
    CaptureFrame, MonotonicClock, OutputClock, WavRecorderOutput, read_wav,
};
use interview_voice_engine::{
    ConversationState, EngineCommand, EngineConfig, InterviewContext, InterviewEngine,
    JsonFileSink, SessionConfig, VoiceParams, WebSocketConnectorFactory, create_router,
};

/// Interview Voice Engine - headless AI mock-interview session runner
#[derive(Parser, Debug)]
#[command(name = "interview-voice-engine")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one interview session, using a WAV file as the microphone
    Run(RunArgs),

    /// Print the effective configuration and exit
    CheckConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Connection token issued by the session layer
    #[arg(long)]
    token: String,

    /// WAV file streamed as microphone input in real time
    #[arg(short = 'i', long, value_name = "FILE")]
    input: PathBuf,

    /// WAV file the agent's speech is rendered into
    #[arg(short = 'o', long, value_name = "FILE", default_value = "agent.wav")]
    output: PathBuf,

    /// Directory for the JSON session report (overrides configuration)
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,

    /// Interviewer voice
    #[arg(long)]
    voice: Option<String>,

    /// Role being interviewed for
    #[arg(long)]
    role: Option<String>,

    #[arg(long, default_value = "medium")]
    difficulty: String,

    /// Plain-text resume; only the beginning is forwarded
    #[arg(long, value_name = "FILE")]
    resume: Option<PathBuf>,

    /// Session id (generated when omitted)
    #[arg(long)]
    session_id: Option<String>,

    /// Wire sample rate (overrides configuration)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// How long to keep listening after the input file ends (milliseconds)
    #[arg(long, default_value_t = 5000)]
    linger_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!(path = %config_path.display(), "Loading configuration");
        EngineConfig::from_file(&config_path)?
    } else {
        EngineConfig::from_env()?
    };

    match cli.command {
        Commands::CheckConfig => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Run(args) => run_session(config, args).await,
    }
}

async fn run_session(mut config: EngineConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(dir) = args.report_dir {
        config.output.report_dir = dir;
    }

    let (samples, native_rate, channels) = read_wav(&args.input)?;
    info!(
        path = %args.input.display(),
        native_rate,
        channels,
        seconds = samples.len() as f64 / (native_rate as f64 * channels.max(1) as f64),
        "Loaded microphone input"
    );

    let mut session_config = SessionConfig::new(
        args.sample_rate.unwrap_or(config.audio.target_sample_rate),
        args.token,
    );
    if let Some(voice) = args.voice {
        session_config = session_config.with_voice(VoiceParams {
            voice: Some(voice),
            ..Default::default()
        });
    }
    if let Some(role) = args.role {
        let resume = match &args.resume {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| anyhow!("Failed to read resume {}: {}", path.display(), e))?,
            None => String::new(),
        };
        session_config =
            session_config.with_interview(InterviewContext::new(role, args.difficulty, &resume));
    }

    let router = create_router(&config.router);
    let connectors = WebSocketConnectorFactory::new(&config.connection.relay_url)?
        .with_headers(router.handshake_headers());

    let clock: Arc<dyn OutputClock> = Arc::new(MonotonicClock::new());
    let output = WavRecorderOutput::new(clock, config.output.sample_rate, &args.output);
    let sink = Arc::new(JsonFileSink::new(config.output.report_dir.clone()));

    let mut engine = InterviewEngine::new(config, Box::new(output), Arc::new(connectors), sink)?
        .with_router(router);

    engine.start_session(session_config, args.session_id)?;

    let (frame_tx, frame_rx) = mpsc::channel(64);
    engine.spawn_capture(frame_rx, native_rate, channels)?;

    let (command_tx, command_rx) = mpsc::channel(4);
    let linger = Duration::from_millis(args.linger_ms);
    let feeder = tokio::spawn(async move {
        let frame_len = (native_rate as usize * channels as usize / 50).max(1);
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        for frame in samples.chunks(frame_len) {
            ticker.tick().await;
            if frame_tx
                .send(CaptureFrame::Samples(frame.to_vec()))
                .await
                .is_err()
            {
                return;
            }
        }
        drop(frame_tx);

        tokio::time::sleep(linger).await;
        info!("Input finished, ending session");
        let _ = command_tx.send(EngineCommand::EndSession).await;
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, ending session");
            ctrl_c.cancel();
        }
    });

    let report = engine.run(command_rx, cancel).await?;
    feeder.abort();

    let Some(report) = report else {
        return Err(anyhow!("Session ended without a report"));
    };

    info!(
        output = %args.output.display(),
        transcript_entries = report.transcript.len(),
        turns = report.turns.len(),
        chunks_received = report.stats.chunks_received,
        audio_sent = report.stats.audio_sent,
        "Session complete"
    );

    if report.final_state == ConversationState::Error {
        return Err(anyhow!(
            "Session failed: {}",
            serde_json::to_string(&report.end_reason)?
        ));
    }
    Ok(())
}
