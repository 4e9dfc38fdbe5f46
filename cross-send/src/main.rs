//! cross-send - Background daemon that drains the delivery queue
//!
//! Claims due queue items, delivers them through the platform adapters and
//! applies the retry policy, until SIGINT/SIGTERM.

use clap::Parser;
use libcrosscast::logging::LoggingConfig;
use libcrosscast::{Config, CrosscastError, CrosscastService, Result};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cross-send")]
#[command(version)]
#[command(about = "Background daemon that drains the crosscast delivery queue")]
#[command(long_about = "\
cross-send - Background daemon that drains the crosscast delivery queue

DESCRIPTION:
    cross-send polls the crosscast database for queue items that are due,
    claims each one, publishes it to its platform and records the outcome.
    Transient failures are re-queued with exponential backoff; permanent
    ones fail only that platform.

    Several cross-send processes may share one database: every item is
    claimed by exactly one of them.

USAGE:
    # Run in foreground (logs to stderr)
    cross-send

    # Poll every 10 seconds, 50 items per pass
    cross-send --poll-interval 10 --batch-size 50

    # Process what is due right now and exit
    cross-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current pass)

CONFIGURATION:
    Configuration file: ~/.config/crosscast/config.toml (or $CROSSCAST_CONFIG)
    Database location:  ~/.local/share/crosscast/crosscast.db (or $CROSSCAST_DB_PATH)

    [queue]
    poll_interval_secs = 60   # seconds between passes
    batch_size = 25           # items per pass
    concurrency = 8           # items delivered in parallel
    max_retries = 3
    base_delay_secs = 60      # backoff: base * 2^(n-1)
    max_delay_secs = 3600     # backoff ceiling

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime or configuration error
")]
struct Cli {
    /// Seconds between queue passes (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Items claimed per pass (overrides config)
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(poll_interval) = cli.poll_interval {
        config.queue.poll_interval_secs = poll_interval;
    }
    if let Some(batch_size) = cli.batch_size {
        config.queue.batch_size = batch_size;
    }
    config.validate()?;

    let service = CrosscastService::from_config(config).await?;
    let processor = service.processor();

    if cli.once {
        let report = processor
            .process_queue(service.config().queue.batch_size)
            .await?;
        service.platforms().disconnect_all().await;
        info!(
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            "cross-send: processed queue once, exiting"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    setup_signal_handlers(shutdown_tx)?;

    info!("cross-send daemon starting");
    processor.run(shutdown_rx).await?;
    info!("cross-send daemon stopped");
    Ok(())
}

/// Flip `shutdown` on SIGINT/SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| CrosscastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, finishing current pass...");
            let _ = shutdown.send(true);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, finishing current pass...");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}
