//! Posting service for multi-platform content delivery
//!
//! Creates posts, publishes them immediately (concurrent fan-out, then join)
//! or schedules them as queue items for the [`QueueProcessor`], and exposes
//! the operator views of the queue.
//!
//! [`QueueProcessor`]: crate::processor::QueueProcessor

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::events::{Event, EventBus};
use super::platform::PlatformService;
use super::validation::ValidationService;
use crate::config::{Config, DeletePolicy};
use crate::connections::ConnectionStore;
use crate::db::{Database, ItemTransition, PostFilter, QueueFilter, QueueStats};
use crate::error::{CrosscastError, Result, ValidationErrors};
use crate::types::{
    NewPost, Platform, PlatformResult, Post, PostStatus, QueueItem, QueueItemStatus,
};

/// Posting service
///
/// Cheap to clone; every clone shares the database, configuration, platform
/// service and event bus.
#[derive(Clone)]
pub struct PostingService {
    db: Arc<Database>,
    config: Arc<Config>,
    platforms: PlatformService,
    validation: ValidationService,
    event_bus: EventBus,
}

/// What an immediate publish produced
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    /// The post after aggregation
    pub post: Post,
    /// One result per dispatched platform, in dispatch order
    pub results: Vec<PlatformResult>,
}

impl PublishOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.is_success())
    }
}

/// Queue items matching a filter, plus counts per status
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub items: Vec<QueueItem>,
    pub stats: QueueStats,
}

impl PostingService {
    pub fn new(
        db: Arc<Database>,
        config: Arc<Config>,
        platforms: PlatformService,
        event_bus: EventBus,
    ) -> Self {
        let validation = ValidationService::new(Arc::clone(&config));
        Self {
            db,
            config,
            platforms,
            validation,
            event_bus,
        }
    }

    pub fn platforms(&self) -> &PlatformService {
        &self.platforms
    }

    /// Validate and store a new draft post
    ///
    /// All field problems are reported together, including target platforms
    /// the owner has no active connection for.
    pub async fn create_post(&self, owner_id: &str, request: NewPost) -> Result<Post> {
        if !self.db.user_exists(owner_id).await? {
            return Err(CrosscastError::NotFound(format!("owner {}", owner_id)));
        }
        if let Some(product_id) = &request.product_id {
            let product = self.db.get_product(product_id).await?;
            if product.map_or(true, |p| p.owner_id != owner_id) {
                return Err(CrosscastError::NotFound(format!("product {}", product_id)));
            }
        }

        let mut errors = self.validation.validate_post(&request);
        if !request.target_platforms.is_empty() {
            let missing = self
                .db
                .missing_platforms(owner_id, &request.target_platforms)
                .await?;
            if !missing.is_empty() {
                errors.add(
                    "target_platforms",
                    format!("no active connection for: {}", join(&missing)),
                );
            }
        }
        errors.into_result()?;

        let post = Post::from_request(
            owner_id,
            request,
            self.config.posting.default_priority,
            self.config.queue.max_retries,
        );
        self.db.create_post(&post).await?;

        info!(post_id = %post.id, platforms = %join(&post.target_platforms), "Created post");
        Ok(post)
    }

    /// The owner's post, or `NotFound`
    pub async fn get_post(&self, owner_id: &str, post_id: &str) -> Result<Post> {
        self.db
            .get_post(post_id)
            .await?
            .filter(|p| p.owner_id == owner_id)
            .ok_or_else(|| CrosscastError::NotFound(format!("post {}", post_id)))
    }

    pub async fn list_posts(&self, owner_id: &str, filter: &PostFilter) -> Result<Vec<Post>> {
        if filter.limit <= 0 || filter.offset < 0 {
            return Err(CrosscastError::InvalidInput(
                "limit must be positive and offset non-negative".to_string(),
            ));
        }
        self.db.list_posts(owner_id, filter).await
    }

    /// Delete a post and its queue items
    ///
    /// A post with an item mid-delivery is never deleted under it. With the
    /// `block` policy the call waits (up to `delete_wait_secs`) for in-flight
    /// items to finish; with `reject` it fails at once. Both give up with
    /// `Conflict`.
    pub async fn delete_post(&self, owner_id: &str, post_id: &str) -> Result<()> {
        let post = self.get_post(owner_id, post_id).await?;
        let posting = &self.config.posting;
        let deadline = Instant::now() + Duration::from_secs(posting.delete_wait_secs);

        loop {
            if self.db.delete_post_if_idle(&post.id).await? {
                info!(post_id = %post.id, "Deleted post");
                return Ok(());
            }
            if self.db.get_post(&post.id).await?.is_none() {
                return Ok(());
            }

            let in_flight = self.db.count_in_flight(&post.id).await?;
            if posting.delete_policy == DeletePolicy::Reject || Instant::now() >= deadline {
                return Err(CrosscastError::Conflict(format!(
                    "post {} has {} item(s) being delivered",
                    post.id, in_flight
                )));
            }

            debug!(post_id = %post.id, in_flight, "Waiting for in-flight delivery before delete");
            sleep(Duration::from_millis(posting.delete_poll_millis)).await;
        }
    }

    /// Publish to every selected platform now and wait for all of them
    ///
    /// Fails before dispatching anything if the owner lacks a connection for
    /// any selected platform. Otherwise every platform gets its own attempt;
    /// failures come back as `FAILED` results, never as an error.
    pub async fn publish_post_immediately(
        &self,
        owner_id: &str,
        post_id: &str,
        platforms: Option<&[Platform]>,
    ) -> Result<PublishOutcome> {
        let post = self.get_post(owner_id, post_id).await?;
        let (selected, targets) = self.plan_cycle(&post, platforms).await?;

        let missing = self.db.missing_platforms(owner_id, &selected).await?;
        if !missing.is_empty() {
            return Err(CrosscastError::ConnectionMissing(missing));
        }

        let now = chrono::Utc::now().timestamp();
        let items: Vec<QueueItem> = selected
            .iter()
            .map(|platform| QueueItem::new(&post, *platform, QueueItemStatus::Processing, now))
            .collect();
        self.db.enqueue(&post.id, &items, None, &targets, now).await?;

        info!(post_id = %post.id, platforms = %join(&selected), "Publishing immediately");
        self.event_bus.emit(Event::PublishStarted {
            post_id: post.id.clone(),
            platforms: selected.clone(),
        });

        let dispatches = items.iter().map(|item| {
            let content = post.content_for(item.platform);
            async move {
                let result = self
                    .platforms
                    .dispatch(owner_id, item.platform, content)
                    .await;
                self.event_bus.emit(Event::PlatformFinished {
                    post_id: item.post_id.clone(),
                    result: result.clone(),
                });
                (item, result)
            }
        });
        let outcomes = join_all(dispatches).await;

        // Every dispatched outcome is recorded before a storage error surfaces
        let finished_at = chrono::Utc::now().timestamp();
        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for (item, mut result) in outcomes {
            let transition = if result.is_success() {
                ItemTransition::Complete {
                    result: result.clone(),
                }
            } else {
                // No automatic retry here; the operator retry grants another attempt
                result.retry_count = 1.min(item.max_retries);
                ItemTransition::Fail {
                    result: result.clone(),
                    retry_count: result.retry_count,
                }
            };
            if let Err(e) = self.db.finish_item(&item.id, &transition, finished_at).await {
                error!(
                    post_id = %item.post_id,
                    platform = %item.platform,
                    "Could not record publish result: {}",
                    e
                );
                first_error.get_or_insert(e);
            }
            results.push(result);
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let post = self.get_post(owner_id, &post.id).await?;
        if post.status.is_terminal() {
            self.event_bus.emit(Event::PostFinalized {
                post_id: post.id.clone(),
                status: post.status,
            });
        }
        info!(post_id = %post.id, status = %post.status, "Immediate publish finished");

        Ok(PublishOutcome { post, results })
    }

    /// Queue the post for delivery at `scheduled_at` (unix seconds)
    ///
    /// `scheduled_at` must be strictly in the future; nothing is written
    /// otherwise.
    pub async fn schedule_post(
        &self,
        owner_id: &str,
        post_id: &str,
        scheduled_at: i64,
        platforms: Option<&[Platform]>,
    ) -> Result<Post> {
        let now = chrono::Utc::now().timestamp();
        if scheduled_at <= now {
            return Err(ValidationErrors::single("scheduled_at", "must be in the future").into());
        }

        let post = self.get_post(owner_id, post_id).await?;
        let (selected, targets) = self.plan_cycle(&post, platforms).await?;

        let items: Vec<QueueItem> = selected
            .iter()
            .map(|platform| {
                QueueItem::new(&post, *platform, QueueItemStatus::Pending, scheduled_at)
            })
            .collect();
        let status = self
            .db
            .enqueue(&post.id, &items, Some(scheduled_at), &targets, now)
            .await?;

        info!(
            post_id = %post.id,
            scheduled_at,
            status = %status,
            platforms = %join(&selected),
            "Scheduled post"
        );
        self.get_post(owner_id, &post.id).await
    }

    /// Withdraw a scheduled post before any of its items is claimed
    pub async fn unschedule_post(&self, owner_id: &str, post_id: &str) -> Result<Post> {
        let post = self.get_post(owner_id, post_id).await?;
        let now = chrono::Utc::now().timestamp();

        if !self.db.cancel_pending_items(&post.id, now).await? {
            return Err(CrosscastError::Conflict(format!(
                "post {} has no pending delivery or is already being delivered",
                post.id
            )));
        }

        info!(post_id = %post.id, "Unscheduled post");
        self.get_post(owner_id, &post.id).await
    }

    /// Give every failed item of the owner with retry budget left one more attempt
    ///
    /// Returns how many items were re-queued.
    pub async fn retry_failed_posts(&self, owner_id: &str) -> Result<u64> {
        if !self.db.user_exists(owner_id).await? {
            return Err(CrosscastError::NotFound(format!("owner {}", owner_id)));
        }
        let now = chrono::Utc::now().timestamp();
        let count = self.db.reset_failed_items(owner_id, now).await?;
        info!(owner_id, count, "Re-queued failed items");
        Ok(count)
    }

    /// Matching queue items with counts per status
    ///
    /// Counts cover everything the filter's owner (or everyone) has queued,
    /// independent of the status/platform filter and pagination.
    pub async fn get_queue_status(&self, filter: &QueueFilter) -> Result<QueueStatus> {
        if filter.limit <= 0 || filter.offset < 0 {
            return Err(CrosscastError::InvalidInput(
                "limit must be positive and offset non-negative".to_string(),
            ));
        }
        let items = self.db.list_queue_items(filter).await?;
        let stats = self.db.queue_stats(filter.owner_id.as_deref()).await?;
        Ok(QueueStatus { items, stats })
    }

    /// Which platforms a new delivery cycle dispatches to, and the post's
    /// target list once it starts
    ///
    /// A draft narrows its targets to the selection. A post that already went
    /// out keeps its targets; platforms it already reached can't be selected.
    async fn plan_cycle(
        &self,
        post: &Post,
        platforms: Option<&[Platform]>,
    ) -> Result<(Vec<Platform>, Vec<Platform>)> {
        let selected = self
            .validation
            .resolve_platforms(&post.target_platforms, platforms)?;

        if post.status == PostStatus::Draft {
            return Ok((selected.clone(), selected));
        }
        if matches!(post.status, PostStatus::Scheduled | PostStatus::Publishing) {
            return Err(CrosscastError::Conflict(format!(
                "post {} is already queued for delivery",
                post.id
            )));
        }

        let delivered: Vec<Platform> = self
            .db
            .items_for_post(&post.id)
            .await?
            .into_iter()
            .filter(|i| i.status == QueueItemStatus::Completed)
            .map(|i| i.platform)
            .collect();
        let again: Vec<Platform> = selected
            .iter()
            .filter(|p| delivered.contains(p))
            .copied()
            .collect();
        if !again.is_empty() {
            warn!(post_id = %post.id, platforms = %join(&again), "Refusing to publish twice");
            return Err(CrosscastError::Conflict(format!(
                "post {} was already published to: {}",
                post.id,
                join(&again)
            )));
        }

        Ok((selected, post.target_platforms.clone()))
    }
}

fn join(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
