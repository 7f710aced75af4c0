mod cpal_driver;

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cpal_driver::CpalDriver;
use rusty_claw_core::config::Config;
use rusty_claw_core::error::RustyClawError;
use rusty_claw_media::orchestrator;
use rusty_claw_media::signing::AwsCredentials;

#[derive(Parser)]
#[command(
    name = "rusty-claw",
    about = "Full-duplex voice conversational agent",
    version
)]
struct Cli {
    /// Config file path (default: ~/.rusty_claw/config.json)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

fn resolve_credentials(voice: &rusty_claw_core::config::VoiceConfig) -> anyhow::Result<AwsCredentials> {
    let access_key_id = voice
        .resolve_access_key_id()
        .ok_or_else(|| RustyClawError::Auth("no AWS access key id configured".into()))?;
    let secret_access_key = voice
        .resolve_secret_access_key()
        .ok_or_else(|| RustyClawError::Auth("no AWS secret access key configured".into()))?;
    let session_token = voice.resolve_session_token();

    Ok(AwsCredentials {
        access_key_id,
        secret_access_key,
        session_token,
    })
}

/// Wait for either Ctrl+C or, on unix, SIGTERM.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;
    let voice = config.voice();
    let credentials = resolve_credentials(&voice)?;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    let driver = CpalDriver::new();
    match orchestrator::run(driver, voice, credentials, shutdown).await {
        Ok(context) => {
            let (session_id, message_count, uptime) = context.summary();
            info!(
                session_id,
                message_count,
                uptime_secs = uptime.as_secs(),
                "session ended"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "fatal error");
            Err(e.into())
        }
    }
}
