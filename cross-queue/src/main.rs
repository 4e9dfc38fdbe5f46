//! cross-queue - Inspect and operate the delivery queue
//!
//! Unix-style tool for looking at queue items, re-queueing failures and
//! pulling scheduled posts back to draft.

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use libcrosscast::db::QueueFilter;
use libcrosscast::logging::{LogFormat, LoggingConfig};
use libcrosscast::{
    Config, CrosscastError, CrosscastService, Platform, QueueItem, QueueItemStatus, Result,
};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "cross-queue")]
#[command(version)]
#[command(about = "Inspect and operate the crosscast delivery queue")]
#[command(long_about = "\
cross-queue - Inspect and operate the crosscast delivery queue

DESCRIPTION:
    cross-queue is a Unix-style tool for the per-platform delivery queue.
    Use it to list queue items, count them per status, give failed
    deliveries another attempt, unschedule a post, or run one processing
    pass without starting the cross-send daemon.

COMMANDS:
    status      List queue items (filter by status, platform or post)
    stats       Count queue items per status
    retry       Re-queue the owner's failed items that have retries left
    unschedule  Cancel a post's pending deliveries and return it to draft
    process     Deliver what is due now and exit

USAGE EXAMPLES:
    # Everything queued for one owner
    cross-queue --owner 7f1c... status

    # Only failures, as JSON
    cross-queue --owner 7f1c... status --status failed --format json

    # Counts across all owners
    cross-queue stats

    # Give failed deliveries another attempt
    cross-queue --owner 7f1c... retry

    # Pull a scheduled post back to draft
    cross-queue --owner 7f1c... unschedule <POST_ID>

CONFIGURATION:
    Configuration file: ~/.config/crosscast/config.toml
    Database location:  ~/.local/share/crosscast/crosscast.db

    Override with environment variables:
        CROSSCAST_CONFIG    - Path to config file
        CROSSCAST_DB_PATH   - Path to database file
        CROSSCAST_OWNER     - Default for --owner

EXIT CODES:
    0 - Success
    1 - Operation failed (conflict, database or configuration error)
    2 - Missing platform connection or authentication failure
    3 - Invalid input (bad filter, missing --owner, unknown owner or post)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Owner (user) whose queue to operate on
    #[arg(long, global = true, env = "CROSSCAST_OWNER")]
    owner: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List queue items
    Status {
        /// Only items in this status (pending, processing, completed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Only items for this platform
        #[arg(short, long)]
        platform: Option<String>,

        /// Only items of this post
        #[arg(long)]
        post: Option<String>,

        /// Maximum number of items to show
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Count queue items per status
    Stats,

    /// Re-queue failed items that have retries left
    Retry,

    /// Cancel a post's pending deliveries
    Unschedule {
        /// Post ID to unschedule
        post_id: String,
    },

    /// Run one processing pass
    Process {
        /// Items to claim (defaults to queue.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(LogFormat::Text, "error", cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let service = CrosscastService::from_config(config).await?;
    debug!(command = ?cli.command, owner = ?cli.owner, "cross-queue");

    match cli.command {
        Commands::Status {
            status,
            platform,
            post,
            limit,
        } => {
            let filter = QueueFilter {
                owner_id: cli.owner,
                status: status.as_deref().map(parse_status).transpose()?,
                platform: platform.as_deref().map(parse_platform).transpose()?,
                post_id: post,
                limit,
                offset: 0,
            };
            cmd_status(&service, &filter, cli.format).await
        }
        Commands::Stats => cmd_stats(&service, cli.owner.as_deref(), cli.format).await,
        Commands::Retry => {
            let owner = require_owner(cli.owner.as_deref())?;
            cmd_retry(&service, owner, cli.format).await
        }
        Commands::Unschedule { post_id } => {
            let owner = require_owner(cli.owner.as_deref())?;
            cmd_unschedule(&service, owner, &post_id, cli.format).await
        }
        Commands::Process { batch_size } => {
            let batch_size = batch_size.unwrap_or(service.config().queue.batch_size);
            if batch_size == 0 {
                return Err(CrosscastError::InvalidInput(
                    "--batch-size must be at least 1".to_string(),
                ));
            }
            cmd_process(&service, batch_size, cli.format).await
        }
    }
}

fn require_owner(owner: Option<&str>) -> Result<&str> {
    owner.ok_or_else(|| {
        CrosscastError::InvalidInput("--owner (or CROSSCAST_OWNER) is required".to_string())
    })
}

fn parse_status(value: &str) -> Result<QueueItemStatus> {
    value.parse().map_err(CrosscastError::InvalidInput)
}

fn parse_platform(value: &str) -> Result<Platform> {
    value.parse().map_err(CrosscastError::InvalidInput)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| CrosscastError::InvalidInput(format!("Failed to render JSON: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

/// List queue items
async fn cmd_status(
    service: &CrosscastService,
    filter: &QueueFilter,
    format: OutputFormat,
) -> Result<()> {
    let status = service.posting().get_queue_status(filter).await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "items": status.items,
            "stats": status.stats,
        })),
        OutputFormat::Text => {
            let now = chrono::Utc::now().timestamp();
            for item in &status.items {
                println!("{}", format_item_line(item, now));
            }
            Ok(())
        }
    }
}

/// One line per item: id, post, platform, status, attempts, timing, last error
fn format_item_line(item: &QueueItem, now: i64) -> String {
    let timing = match item.status {
        QueueItemStatus::Pending => format_due(now, item.scheduled_at),
        QueueItemStatus::Processing => "in flight".to_string(),
        QueueItemStatus::Completed | QueueItemStatus::Failed => item
            .completed_at
            .map(|ts| format!("finished {}", format_timestamp(ts)))
            .unwrap_or_else(|| "finished".to_string()),
    };

    let mut line = format!(
        "{} | {} | {} | {} | {}/{} | {}",
        item.id,
        item.post_id,
        item.platform,
        item.status,
        item.retry_count,
        item.max_retries,
        timing
    );
    if let Some(error) = &item.error_message {
        line.push_str(" | ");
        line.push_str(error);
    }
    line
}

/// "due now", or the time left until `scheduled_at`
fn format_due(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;
    if diff <= 0 {
        return "due now".to_string();
    }
    format!(
        "due in {}",
        humantime::format_duration(Duration::from_secs(diff as u64))
    )
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Show queue counts
async fn cmd_stats(
    service: &CrosscastService,
    owner: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let stats = service.database().queue_stats(owner).await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "pending": stats.pending,
            "processing": stats.processing,
            "completed": stats.completed,
            "failed": stats.failed,
            "total": stats.total(),
        })),
        OutputFormat::Text => {
            println!("Queue Statistics");
            println!("================");
            println!();
            println!("Pending:    {}", stats.pending);
            println!("Processing: {}", stats.processing);
            println!("Completed:  {}", stats.completed);
            println!("Failed:     {}", stats.failed);
            println!("Total:      {}", stats.total());
            Ok(())
        }
    }
}

/// Re-queue failed items
async fn cmd_retry(service: &CrosscastService, owner: &str, format: OutputFormat) -> Result<()> {
    let count = service.posting().retry_failed_posts(owner).await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "requeued": count })),
        OutputFormat::Text => {
            println!("Re-queued {} item{}", count, if count == 1 { "" } else { "s" });
            Ok(())
        }
    }
}

/// Return a scheduled post to draft
async fn cmd_unschedule(
    service: &CrosscastService,
    owner: &str,
    post_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let post = service.posting().unschedule_post(owner, post_id).await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "id": post.id,
            "status": post.status,
        })),
        OutputFormat::Text => {
            println!("Unscheduled {} ({})", post.id, post.status);
            Ok(())
        }
    }
}

/// Run one processing pass
async fn cmd_process(
    service: &CrosscastService,
    batch_size: usize,
    format: OutputFormat,
) -> Result<()> {
    let report = service.processor().process_queue(batch_size).await?;
    service.platforms().disconnect_all().await;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "selected": report.selected,
            "claimed": report.claimed(),
            "completed": report.completed,
            "retried": report.retried,
            "failed": report.failed,
            "skipped": report.skipped,
        })),
        OutputFormat::Text => {
            println!(
                "Processed {} item(s): {} completed, {} retried, {} failed, {} skipped",
                report.claimed(),
                report.completed,
                report.retried,
                report.failed,
                report.skipped
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_due() {
        assert_eq!(format_due(1000, 900), "due now");
        assert_eq!(format_due(1000, 1000), "due now");
        assert_eq!(format_due(1000, 1090), "due in 1m 30s");
        assert_eq!(format_due(0, 7200), "due in 2h");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn test_parse_filters() {
        assert_eq!(parse_status("failed").unwrap(), QueueItemStatus::Failed);
        assert_eq!(parse_platform("Poshmark").unwrap(), Platform::Poshmark);
        assert!(matches!(
            parse_status("done"),
            Err(CrosscastError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_platform("myspace"),
            Err(CrosscastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_require_owner() {
        assert_eq!(require_owner(Some("u1")).unwrap(), "u1");
        assert!(matches!(
            require_owner(None),
            Err(CrosscastError::InvalidInput(_))
        ));
    }
}
