use anyhow::Result;
use clap::{Parser, Subcommand};
use homework_recorder::{
    ensure_session, reconcile, AudioBackendConfig, AudioBackendFactory, CaptureState, Config,
    EntryRoute, HomeworkApi, HomeworkClient, RecordingSession, SessionConfig, StopReason,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "homework-recorder", about = "Record and submit a spoken homework exercise")]
struct Cli {
    /// Config file (without extension)
    #[arg(long, default_value = "config/homework-recorder")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the authoritative homework step
    Status,
    /// Record an exercise and submit it for scoring
    Record {
        /// Recommended exercise id to pin for the session
        #[arg(long)]
        exercise: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v0.1.0", cfg.service.name);

    let api: Arc<dyn HomeworkApi> = Arc::new(HomeworkClient::new(
        &cfg.backend.base_url,
        cfg.backend.auth_token.clone(),
    )?);

    match cli.command {
        Command::Status => {
            let route = reconcile(api.as_ref()).await?;
            match route {
                EntryRoute::Report => {
                    let report = api.report().await?;
                    info!("Step: report (score {})", report.score);
                }
                EntryRoute::Landing => info!("Step: landing (no session in progress)"),
                EntryRoute::Interrupted { session_id } => {
                    info!("Step: interrupted session {} (a new recording can start)", session_id)
                }
            }
        }
        Command::Record { exercise } => {
            record(&cfg, api, exercise.as_deref()).await?;
        }
    }

    Ok(())
}

async fn record(cfg: &Config, api: Arc<dyn HomeworkApi>, exercise: Option<&str>) -> Result<()> {
    // Reconciliation runs before any recording surface is offered.
    let session_id = match reconcile(api.as_ref()).await? {
        EntryRoute::Report => {
            let report = api.report().await?;
            info!("This homework is already scored ({}). Nothing to record.", report.score);
            info!("Summary: {}", report.summary);
            return Ok(());
        }
        EntryRoute::Interrupted { session_id } => {
            warn!(
                "A previous recording for session {} was interrupted; starting fresh",
                session_id
            );
            ensure_session(api.as_ref(), exercise).await?
        }
        EntryRoute::Landing => ensure_session(api.as_ref(), exercise).await?,
    };

    // Capability probe happens before any session state is touched.
    let backend = AudioBackendFactory::microphone(AudioBackendConfig {
        target_sample_rate: cfg.audio.sample_rate,
        target_channels: cfg.audio.channels,
        buffer_duration_ms: 100,
    })
    .map_err(|e| e.context("this device does not support recording"))?;

    let session_config = SessionConfig {
        chunk_duration: Duration::from_secs(cfg.session.chunk_seconds),
        max_duration: Duration::from_secs(cfg.session.max_duration_seconds),
        sample_rate: cfg.audio.sample_rate,
        channels: cfg.audio.channels,
    };

    let session = RecordingSession::new(session_config, Arc::clone(&api), session_id);
    session.start(backend).await?;
    info!("Recording... press Ctrl-C to stop and submit");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.stop(StopReason::Manual).await?;
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                let snap = session.snapshot().await;
                if snap.state != CaptureState::Recording {
                    // The duration guard already forced the stop.
                    break;
                }
                info!(
                    "[{:>4.0}s] wpm={:.0} fillers={} level={}{}",
                    snap.elapsed_secs,
                    snap.wpm,
                    snap.filler_count,
                    snap.voice_strength,
                    if snap.metrics_degraded { " (live metrics unavailable)" } else { "" }
                );
            }
        }
    }

    let snap = session.snapshot().await;
    if let Some(notice) = &snap.notice {
        warn!("{}", notice);
    }
    if !snap.live_transcript.is_empty() {
        info!("Live transcript: {}", snap.live_transcript);
    }

    info!("Processing...");
    let report = session.finalize().await?;
    info!("Score: {}", report.score);
    info!("Summary: {}", report.summary);
    info!("Coach reminder: {}", report.coach_reminder);

    Ok(())
}
