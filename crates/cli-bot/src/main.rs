mod commands;
mod dispatch;
mod reply;
mod telegram;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use tokio::task::{JoinError, JoinSet};
use circle_core::{ConverterConfig, FfmpegEncoder, Service};
use crate::dispatch::Dispatcher;
use crate::telegram::{ApiError, BotApi, Update};

/// Pause after a failed poll before trying again
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

enum Event {
    Signal(&'static str),
    Polled(Result<Vec<Update>, ApiError>),
    Finished(Result<(), JoinError>),
}

/// Telegram bot that turns videos into video notes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Bot API token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    token: String,

    /// Bot API base url
    #[arg(long, default_value = "https://api.telegram.org")]
    api_base: String,

    /// Long-poll timeout for getUpdates
    #[arg(long, default_value_t = 30)]
    poll_timeout_secs: u64,

    /// How long in-flight sessions may run after a shutdown signal
    #[arg(long, default_value_t = 30)]
    shutdown_grace_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG applies unless --verbose forces debug
    let mut logger = env_logger::Builder::from_default_env();
    logger.format_timestamp_secs();
    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    let cfg = ConverterConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("Circle bot starting");
    info!("Configuration loaded:");
    info!("  Scratch dir: {}", cfg.scratch_dir.display());
    info!("  Max input bytes: {}", cfg.max_input_bytes);
    info!("  Max output bytes: {}", cfg.max_output_bytes);
    info!("  Max duration: {}s", cfg.max_duration_secs);
    info!("  Ladder: {} level(s)", cfg.ladder.len());
    info!(
        "  Throttle: {} request(s) per {}s",
        cfg.throttle.max_requests, cfg.throttle.window_secs
    );

    let encoder = Arc::new(FfmpegEncoder::new(&cfg.ffmpeg_bin, &cfg.ffprobe_bin, cfg.encode_timeout()));
    match encoder.detect_version().await {
        Ok(v) => info!("FFmpeg version {}.{}.{}", v.major, v.minor, v.patch),
        Err(e) => warn!("Could not determine FFmpeg version, encodes may fail: {:#}", e),
    }

    let api = Arc::new(BotApi::new(&args.api_base, &args.token).context("Failed to build HTTP client")?);
    let me = api.get_me().await.context("Failed to reach the Bot API")?;
    info!("Bot started as @{}", me.username.as_deref().unwrap_or("unknown"));

    let service = Arc::new(Service::new(cfg, encoder, api.clone())?);
    service.startup().await?;
    let background = service.spawn_background();

    let dispatcher = Dispatcher::new(service.clone(), api.clone());
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut offset: i64 = 0;

    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        let event = tokio::select! {
            name = &mut signal => Event::Signal(name),
            polled = api.get_updates(offset, args.poll_timeout_secs) => Event::Polled(polled),
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => Event::Finished(joined),
        };

        match event {
            Event::Signal(name) => {
                info!("Received {}, shutting down...", name);
                break;
            }
            Event::Polled(Ok(updates)) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    if let Some(message) = update.message {
                        dispatcher.dispatch(message, &mut tasks);
                    }
                }
            }
            Event::Polled(Err(e)) => {
                warn!("getUpdates failed: {}", e);
                if let Some(name) = retry_pause(&mut signal, POLL_RETRY_DELAY).await {
                    info!("Received {}, shutting down...", name);
                    break;
                }
            }
            Event::Finished(Err(e)) => error!("Request task failed: {}", e),
            Event::Finished(Ok(())) => {}
        }
    }

    service.shutdown();
    drain(&mut tasks, Duration::from_secs(args.shutdown_grace_secs)).await;
    for handle in background {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Sleep before the next poll, returning early with the signal name if one arrives
async fn retry_pause<F>(signal: &mut Pin<&mut F>, delay: Duration) -> Option<&'static str>
where
    F: Future<Output = &'static str>,
{
    tokio::select! {
        name = signal.as_mut() => Some(name),
        _ = tokio::time::sleep(delay) => None,
    }
}

/// Wait for in-flight requests, aborting whatever is left after `grace`.
/// Aborted sessions still remove their scratch files on drop.
async fn drain(tasks: &mut JoinSet<()>, grace: Duration) {
    if tasks.is_empty() {
        return;
    }
    info!("Waiting up to {}s for {} in-flight request(s)", grace.as_secs(), tasks.len());

    let finished = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Request task failed: {}", e);
            }
        }
    })
    .await;

    if finished.is_err() {
        warn!("Grace period elapsed, aborting {} request(s)", tasks.len());
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
