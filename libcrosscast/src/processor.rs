//! Queue processor
//!
//! Polls for due queue items, claims each with a compare-and-set before any
//! external call, dispatches it, then records the outcome and the parent
//! post's new aggregate in one transaction. Safe to run several processors
//! against the same database: a claim only succeeds for one of them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::db::{Database, ItemTransition};
use crate::error::Result;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::service::events::{Event, EventBus};
use crate::service::platform::PlatformService;
use crate::types::QueueItem;

/// Counts for one processing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Due items returned by the selection query
    pub selected: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Claimed elsewhere, already finished, or not reached after an abort
    pub skipped: usize,
}

impl BatchReport {
    pub fn claimed(&self) -> usize {
        self.completed + self.retried + self.failed
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Completed => self.completed += 1,
            ItemOutcome::Retried => self.retried += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Completed,
    Retried,
    Failed,
    Skipped,
}

/// Source of the current time in unix seconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

pub struct QueueProcessor {
    db: Arc<Database>,
    platforms: PlatformService,
    config: QueueConfig,
    policy: RetryPolicy,
    event_bus: EventBus,
    clock: Clock,
}

impl QueueProcessor {
    pub fn new(
        db: Arc<Database>,
        platforms: PlatformService,
        config: QueueConfig,
        event_bus: EventBus,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            db,
            platforms,
            config,
            policy,
            event_bus,
            clock: system_clock(),
        }
    }

    /// Replace the wall clock, e.g. with a fixed one in tests
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one pass over items due now
    ///
    /// The clock is read once to select due items, then again for every
    /// claim and every recorded outcome, so retry delays count from the
    /// moment the failure came back.
    ///
    /// A storage failure stops the pass: items not yet claimed are left
    /// alone, and an item claimed but not finished stays `processing` until
    /// its claim goes stale and a later pass reclaims it.
    pub async fn process_queue(&self, batch_size: usize) -> Result<BatchReport> {
        let now = self.now();
        let stale_before = self.stale_before(now);
        let items = self
            .db
            .due_items(now, stale_before, batch_size as i64)
            .await?;

        let mut report = BatchReport {
            selected: items.len(),
            ..Default::default()
        };
        if items.is_empty() {
            return Ok(report);
        }
        debug!(count = items.len(), "Processing due queue items");

        let abort = AtomicBool::new(false);
        let outcomes: Vec<Result<ItemOutcome>> = stream::iter(items)
            .map(|item| self.process_item(item, &abort))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            error!(
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                "Queue pass aborted: {}",
                e
            );
            return Err(e);
        }

        info!(
            selected = report.selected,
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            skipped = report.skipped,
            "Queue pass finished"
        );
        Ok(report)
    }

    fn stale_before(&self, now: i64) -> i64 {
        now - self.config.worker_timeout_secs as i64
    }

    async fn process_item(&self, item: QueueItem, abort: &AtomicBool) -> Result<ItemOutcome> {
        if abort.load(Ordering::SeqCst) {
            return Ok(ItemOutcome::Skipped);
        }

        let result = self.deliver(&item).await;
        if result.is_err() {
            abort.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn deliver(&self, item: &QueueItem) -> Result<ItemOutcome> {
        let claimed_at = self.now();
        if !self
            .db
            .claim_item(&item.id, claimed_at, self.stale_before(claimed_at))
            .await?
        {
            debug!(item_id = %item.id, "Item already claimed or finished, skipping");
            return Ok(ItemOutcome::Skipped);
        }
        self.event_bus.emit(Event::ItemClaimed {
            item_id: item.id.clone(),
            post_id: item.post_id.clone(),
            platform: item.platform,
        });

        let Some(post) = self.db.get_post(&item.post_id).await? else {
            warn!(item_id = %item.id, post_id = %item.post_id, "Post vanished under a claimed item");
            return Ok(ItemOutcome::Skipped);
        };

        let mut result = self
            .platforms
            .dispatch(&item.owner_id, item.platform, post.content_for(item.platform))
            .await;
        let finished_at = self.now();

        let (transition, outcome) = if result.is_success() {
            result.retry_count = item.retry_count;
            (ItemTransition::Complete { result }, ItemOutcome::Completed)
        } else {
            match self
                .policy
                .decide(&result, item.retry_count, item.max_retries)
            {
                RetryDecision::Retry { retry_count, delay } => {
                    result.retry_count = retry_count;
                    let scheduled_at = finished_at + delay.as_secs() as i64;
                    self.event_bus.emit(Event::ItemRetryScheduled {
                        item_id: item.id.clone(),
                        post_id: item.post_id.clone(),
                        platform: item.platform,
                        retry_count,
                        scheduled_at,
                        error_code: result.error_code.unwrap_or(crate::error::ErrorCode::Unexpected),
                    });
                    info!(
                        item_id = %item.id,
                        platform = %item.platform,
                        retry_count,
                        delay_secs = delay.as_secs(),
                        "Transient failure, retry scheduled"
                    );
                    (
                        ItemTransition::Retry {
                            result,
                            retry_count,
                            scheduled_at,
                        },
                        ItemOutcome::Retried,
                    )
                }
                RetryDecision::GiveUp { retry_count } => {
                    result.retry_count = retry_count;
                    let error = result.error_message.clone().unwrap_or_default();
                    warn!(
                        item_id = %item.id,
                        platform = %item.platform,
                        retry_count,
                        "Item failed permanently: {}",
                        error
                    );
                    self.event_bus.emit(Event::ItemFailed {
                        item_id: item.id.clone(),
                        post_id: item.post_id.clone(),
                        platform: item.platform,
                        retry_count,
                        error,
                    });
                    (
                        ItemTransition::Fail {
                            result,
                            retry_count,
                        },
                        ItemOutcome::Failed,
                    )
                }
            }
        };

        let Some(status) = self.db.finish_item(&item.id, &transition, finished_at).await? else {
            warn!(item_id = %item.id, "Item left processing before its result was recorded");
            return Ok(ItemOutcome::Skipped);
        };

        if outcome == ItemOutcome::Completed {
            self.event_bus.emit(Event::ItemCompleted {
                item_id: item.id.clone(),
                post_id: item.post_id.clone(),
                platform: item.platform,
            });
        }
        if status.is_terminal() {
            info!(post_id = %item.post_id, status = %status, "Post delivery finished");
            self.event_bus.emit(Event::PostFinalized {
                post_id: item.post_id.clone(),
                status,
            });
        }

        Ok(outcome)
    }

    /// Poll until `shutdown` flips to `true`
    ///
    /// A pass that is running when shutdown is requested finishes first, so
    /// every claim taken is also released. Cached browser sessions are closed
    /// on the way out.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        info!(
            poll_interval_secs = interval.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Queue processor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.process_queue(self.config.batch_size).await {
                // Storage trouble; stale claims are picked up once it recovers
                error!("Queue pass failed: {}", e);
            }

            tokio::select! {
                _ = sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let closed = self.platforms.disconnect_all().await;
        info!(sessions_closed = closed, "Queue processor stopped");
        Ok(())
    }
}
