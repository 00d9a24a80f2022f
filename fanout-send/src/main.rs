//! fanout-send - Background daemon for publishing and inbox sync
//!
//! Sweeps the post queue for due posts and fans them out to their
//! platforms, and periodically syncs direct messages into the inbox.

use clap::Parser;
use libfanout::{Config, FanoutService, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fanout-send")]
#[command(version)]
#[command(about = "Background daemon for publishing due posts and syncing inboxes")]
#[command(long_about = "\
fanout-send - Background daemon for publishing and inbox sync

DESCRIPTION:
    fanout-send is a long-running daemon. It sweeps the Fanout queue at a
    fixed interval, publishes every post that is due to all of its target
    platforms at once, and stores the per-platform results on the post.

    Independently, it syncs direct messages from Facebook, Instagram and
    Twitter into the unified inbox.

USAGE:
    # Run in foreground (logs to stderr)
    fanout-send

    # Sweep every 30 seconds, sync every 10 minutes
    fanout-send --poll-interval 30 --sync-interval 600

    # Publish only, no inbox sync
    fanout-send --no-sync

    # Single sweep (and sync), then exit
    fanout-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current sweep)

CONFIGURATION:
    Configuration file: ~/.config/fanout/config.toml
    Database location: ~/.local/share/fanout/fanout.db

    [scheduling]
    poll_interval = \"1m\"
    sync_interval = \"15m\"
    max_retries = 3
    job_timeout = \"2m\"
    platform_timeout = \"30s\"

    Override with environment variables:
        FANOUT_CONFIG      - Path to config file
        FANOUT_DB_PATH     - Path to database file
        FANOUT_LOG_FORMAT  - text, json or pretty
        FANOUT_LOG_LEVEL   - Log filter (default: info)

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Sweep interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check for due posts (default: 60)")]
    poll_interval: Option<u64>,

    /// Sync interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to sync inboxes (default: 900)")]
    sync_interval: Option<u64>,

    /// Do not sync inboxes
    #[arg(long)]
    no_sync: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run once and exit
    #[arg(long)]
    #[arg(help = "Process due posts once (and sync unless --no-sync), then exit")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libfanout::logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(seconds) = cli.poll_interval {
        config.scheduling.poll_interval = Duration::from_secs(seconds.max(1));
    }
    if let Some(seconds) = cli.sync_interval {
        config.scheduling.sync_interval = Duration::from_secs(seconds.max(1));
    }
    let poll_interval = config.scheduling.poll_interval;
    let sync_interval = config.scheduling.sync_interval;

    let service = Arc::new(FanoutService::from_config(config).await?);

    info!("fanout-send daemon starting");
    info!("Poll interval: {}", humantime::format_duration(poll_interval));
    if cli.no_sync {
        info!("Inbox sync disabled");
    } else {
        info!("Sync interval: {}", humantime::format_duration(sync_interval));
    }

    if cli.once {
        sweep(&service).await;
        if !cli.no_sync {
            sync(&service).await;
        }
        info!("fanout-send: processed due posts once, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let publisher = tokio::spawn(publish_loop(
        service.clone(),
        poll_interval,
        shutdown.clone(),
    ));
    let syncer = (!cli.no_sync).then(|| {
        tokio::spawn(sync_loop(service.clone(), sync_interval, shutdown.clone()))
    });

    if let Err(e) = publisher.await {
        error!("Publish loop ended abnormally: {}", e);
    }
    if let Some(syncer) = syncer {
        if let Err(e) = syncer.await {
            error!("Sync loop ended abnormally: {}", e);
        }
    }

    info!("fanout-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| libfanout::FanoutError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

async fn publish_loop(service: Arc<FanoutService>, interval: Duration, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        sweep(&service).await;
        wait(interval, &shutdown).await;
    }
    info!("Publish loop stopped");
}

async fn sync_loop(service: Arc<FanoutService>, interval: Duration, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        sync(&service).await;
        wait(interval, &shutdown).await;
    }
    info!("Sync loop stopped");
}

async fn sweep(service: &FanoutService) {
    match service.publisher().run_sweep().await {
        Ok(report) if report.dispatched > 0 || report.stale_failed > 0 => info!(
            dispatched = report.dispatched,
            published = report.published,
            failed = report.failed,
            stale_failed = report.stale_failed,
            "Dispatched {} due post(s)",
            report.dispatched
        ),
        Ok(_) => {}
        Err(e) => error!("Error processing posts: {}", e),
    }
}

async fn sync(service: &FanoutService) {
    if let Err(e) = service.sync().sync(None).await {
        error!("Error syncing inboxes: {}", e);
    }
}

/// Sleep for `interval`, waking every second to check for shutdown
async fn wait(interval: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_secs(1);
    let mut remaining = interval;
    while !remaining.is_zero() && !shutdown.load(Ordering::Relaxed) {
        let nap = remaining.min(step);
        sleep(nap).await;
        remaining -= nap;
    }
}
