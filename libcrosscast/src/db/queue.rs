//! Queue item storage and state transitions
//!
//! Every transition is a conditional `UPDATE` guarded by the item's current
//! status. The parent post's aggregate is refreshed on the same connection
//! before the transaction commits, so readers never see an item that moved
//! without its post.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::{from_json, parse_stored, to_json, Database};
use crate::aggregate::{aggregate_status, last_error, ordered_results, ItemSnapshot};
use crate::error::{CrosscastError, DbError, Result};
use crate::types::{Platform, PlatformResult, PostStatus, QueueItem, QueueItemStatus};

const ITEM_COLUMNS: &str = r#"
    id, post_id, owner_id, platform, status, priority, scheduled_at, started_at,
    completed_at, retry_count, max_retries, result, error_message, created_at
"#;

/// Snapshot of an item's outcome columns, kept in `prior_attempt` while a
/// failed item is re-queued. Evaluated against the row before the update.
const PRIOR_ATTEMPT: &str = r#"
    json_object(
        'priority', priority,
        'scheduled_at', scheduled_at,
        'started_at', started_at,
        'completed_at', completed_at,
        'retry_count', retry_count,
        'max_retries', max_retries,
        'result', json(result),
        'error_message', error_message
    )
"#;

/// How a claimed item leaves `processing`
#[derive(Debug, Clone)]
pub enum ItemTransition {
    Complete {
        result: PlatformResult,
    },
    /// Back to `pending`, due again at `scheduled_at`
    Retry {
        result: PlatformResult,
        retry_count: u32,
        scheduled_at: i64,
    },
    Fail {
        result: PlatformResult,
        retry_count: u32,
    },
}

/// Filters for [`Database::list_queue_items`]
#[derive(Debug, Clone)]
pub struct QueueFilter {
    pub owner_id: Option<String>,
    pub status: Option<QueueItemStatus>,
    pub platform: Option<Platform>,
    pub post_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for QueueFilter {
    fn default() -> Self {
        Self {
            owner_id: None,
            status: None,
            platform: None,
            post_id: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// Item counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

impl Database {
    /// Queue `items` for a post and move the post into its new cycle
    ///
    /// Fails with `Conflict` if the post already has live items. An earlier
    /// failed item for the same platform is reused: it takes the new item's
    /// id and state and remembers its failure in `prior_attempt`, which
    /// [`Database::cancel_pending_items`] restores. Returns the post's
    /// refreshed status.
    pub async fn enqueue(
        &self,
        post_id: &str,
        items: &[QueueItem],
        scheduled_at: Option<i64>,
        target_platforms: &[Platform],
        now: i64,
    ) -> Result<PostStatus> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let claimed = sqlx::query(
            r#"
            UPDATE posts
            SET scheduled_at = ?, target_platforms = ?, updated_at = ?
            WHERE id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM queue_items
                  WHERE post_id = ? AND status IN ('pending', 'processing')
              )
            "#,
        )
        .bind(scheduled_at)
        .bind(to_json(target_platforms)?)
        .bind(now)
        .bind(post_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        if claimed.rows_affected() != 1 {
            return Err(CrosscastError::Conflict(format!(
                "post {} is already queued for delivery",
                post_id
            )));
        }

        for item in items {
            let requeue = format!(
                r#"
                UPDATE queue_items
                SET prior_attempt = {},
                    id = ?, status = ?, priority = ?, scheduled_at = ?, started_at = ?,
                    completed_at = NULL, retry_count = ?, max_retries = ?, result = NULL,
                    error_message = NULL, created_at = ?
                WHERE post_id = ? AND platform = ? AND status = 'failed'
                "#,
                PRIOR_ATTEMPT
            );
            let requeued = sqlx::query(&requeue)
                .bind(&item.id)
                .bind(item.status.as_str())
                .bind(i64::from(item.priority))
                .bind(item.scheduled_at)
                .bind(item.started_at)
                .bind(i64::from(item.retry_count))
                .bind(i64::from(item.max_retries))
                .bind(item.created_at)
                .bind(post_id)
                .bind(item.platform.as_str())
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
            if requeued.rows_affected() == 1 {
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO queue_items (
                    id, post_id, owner_id, platform, status, priority, scheduled_at,
                    started_at, completed_at, retry_count, max_retries, result,
                    error_message, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.id)
            .bind(&item.post_id)
            .bind(&item.owner_id)
            .bind(item.platform.as_str())
            .bind(item.status.as_str())
            .bind(i64::from(item.priority))
            .bind(item.scheduled_at)
            .bind(item.started_at)
            .bind(item.completed_at)
            .bind(i64::from(item.retry_count))
            .bind(i64::from(item.max_retries))
            .bind(item.result.as_ref().map(to_json).transpose()?)
            .bind(&item.error_message)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        }

        let status = refresh_post_aggregate(&mut *tx, post_id, now)
            .await?
            .unwrap_or(PostStatus::Draft);

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(status)
    }

    /// Items eligible for a processing pass
    ///
    /// Pending items that are due, plus `processing` items whose claim is
    /// older than `stale_before`. Highest priority first, then oldest schedule.
    pub async fn due_items(&self, now: i64, stale_before: i64, limit: i64) -> Result<Vec<QueueItem>> {
        let query = format!(
            r#"
            SELECT {} FROM queue_items
            WHERE (status = 'pending' AND scheduled_at <= ?)
               OR (status = 'processing' AND started_at < ?)
            ORDER BY priority DESC, scheduled_at ASC, created_at ASC
            LIMIT ?
            "#,
            ITEM_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(stale_before)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(item_from_row).collect()
    }

    /// Atomically claim an item for this worker
    ///
    /// Re-checks eligibility in the `WHERE` clause, so `false` means another
    /// worker got there first or the item already finished.
    pub async fn claim_item(&self, item_id: &str, now: i64, stale_before: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let row: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE queue_items
            SET status = 'processing', started_at = ?
            WHERE id = ?
              AND ((status = 'pending' AND scheduled_at <= ?)
                OR (status = 'processing' AND started_at < ?))
            RETURNING post_id
            "#,
        )
        .bind(now)
        .bind(item_id)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let Some((post_id,)) = row else {
            return Ok(false);
        };

        refresh_post_aggregate(&mut *tx, &post_id, now).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    /// Move a `processing` item to its next state
    ///
    /// Returns the post's refreshed status, or `None` if the item was no
    /// longer `processing` (deleted or finished by someone else).
    pub async fn finish_item(
        &self,
        item_id: &str,
        transition: &ItemTransition,
        now: i64,
    ) -> Result<Option<PostStatus>> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let row: Option<(String,)> = match transition {
            ItemTransition::Complete { result } => sqlx::query_as(
                r#"
                UPDATE queue_items
                SET status = 'completed', completed_at = ?, result = ?, error_message = NULL,
                    prior_attempt = NULL
                WHERE id = ? AND status = 'processing'
                RETURNING post_id
                "#,
            )
            .bind(now)
            .bind(to_json(result)?)
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?,

            ItemTransition::Retry {
                result,
                retry_count,
                scheduled_at,
            } => sqlx::query_as(
                r#"
                UPDATE queue_items
                SET status = 'pending',
                    retry_count = ?,
                    scheduled_at = MAX(scheduled_at, ?),
                    result = ?,
                    error_message = ?
                WHERE id = ? AND status = 'processing'
                RETURNING post_id
                "#,
            )
            .bind(i64::from(*retry_count))
            .bind(*scheduled_at)
            .bind(to_json(result)?)
            .bind(&result.error_message)
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?,

            ItemTransition::Fail {
                result,
                retry_count,
            } => sqlx::query_as(
                r#"
                UPDATE queue_items
                SET status = 'failed',
                    completed_at = ?,
                    retry_count = ?,
                    result = ?,
                    error_message = ?,
                    prior_attempt = NULL
                WHERE id = ? AND status = 'processing'
                RETURNING post_id
                "#,
            )
            .bind(now)
            .bind(i64::from(*retry_count))
            .bind(to_json(result)?)
            .bind(&result.error_message)
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?,
        };

        let Some((post_id,)) = row else {
            return Ok(None);
        };

        let status = refresh_post_aggregate(&mut *tx, &post_id, now).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(status)
    }

    pub async fn get_queue_item(&self, item_id: &str) -> Result<Option<QueueItem>> {
        let query = format!("SELECT {} FROM queue_items WHERE id = ?", ITEM_COLUMNS);
        let row = sqlx::query(&query)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(item_from_row).transpose()
    }

    /// Every item of a post, oldest first
    pub async fn items_for_post(&self, post_id: &str) -> Result<Vec<QueueItem>> {
        let query = format!(
            "SELECT {} FROM queue_items WHERE post_id = ? ORDER BY created_at ASC, platform ASC",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(item_from_row).collect()
    }

    /// Items matching `filter`, in processing order
    pub async fn list_queue_items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>> {
        let mut where_clauses = vec!["1 = 1"];

        if filter.owner_id.is_some() {
            where_clauses.push("owner_id = ?");
        }
        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        if filter.platform.is_some() {
            where_clauses.push("platform = ?");
        }
        if filter.post_id.is_some() {
            where_clauses.push("post_id = ?");
        }

        let query_str = format!(
            "SELECT {} FROM queue_items WHERE {} ORDER BY priority DESC, scheduled_at ASC, created_at ASC LIMIT ? OFFSET ?",
            ITEM_COLUMNS,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(owner_id) = &filter.owner_id {
            query = query.bind(owner_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(platform) = filter.platform {
            query = query.bind(platform.as_str());
        }
        if let Some(post_id) = &filter.post_id {
            query = query.bind(post_id);
        }
        query = query.bind(filter.limit.max(0)).bind(filter.offset.max(0));

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(item_from_row).collect()
    }

    /// Per-status counts, optionally for one owner
    pub async fn queue_stats(&self, owner_id: Option<&str>) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM queue_items
            WHERE (? IS NULL OR owner_id = ?)
            GROUP BY status
            "#,
        )
        .bind(owner_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match parse_stored::<QueueItemStatus>("queue item status", &status)? {
                QueueItemStatus::Pending => stats.pending = count,
                QueueItemStatus::Processing => stats.processing = count,
                QueueItemStatus::Completed => stats.completed = count,
                QueueItemStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    /// Grant one more attempt to the owner's failed items that have budget left
    ///
    /// Returns how many items went back to `pending`.
    pub async fn reset_failed_items(&self, owner_id: &str, now: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let reset = format!(
            r#"
            UPDATE queue_items
            SET prior_attempt = {},
                status = 'pending',
                scheduled_at = ?,
                retry_count = retry_count + 1,
                completed_at = NULL
            WHERE owner_id = ? AND status = 'failed' AND retry_count < max_retries
            RETURNING post_id
            "#,
            PRIOR_ATTEMPT
        );
        let rows: Vec<(String,)> = sqlx::query_as(&reset)
            .bind(now)
            .bind(owner_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        let posts: BTreeSet<String> = rows.iter().map(|(id,)| id.clone()).collect();
        for post_id in &posts {
            refresh_post_aggregate(&mut *tx, post_id, now).await?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(rows.len() as u64)
    }

    /// Cancel a post's pending items and clear its schedule
    ///
    /// Items that were re-queued after failing go back to the failed state
    /// they had before; the rest are deleted. Refuses (returns `false`,
    /// changes nothing) when any item is already `processing` or when there
    /// is nothing pending to cancel.
    pub async fn cancel_pending_items(&self, post_id: &str, now: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        // Take the write lock before looking at the items
        sqlx::query("UPDATE posts SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        let (pending, processing): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0)
            FROM queue_items WHERE post_id = ?
            "#,
        )
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        if pending == 0 || processing > 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'failed',
                priority = json_extract(prior_attempt, '$.priority'),
                scheduled_at = json_extract(prior_attempt, '$.scheduled_at'),
                started_at = json_extract(prior_attempt, '$.started_at'),
                completed_at = json_extract(prior_attempt, '$.completed_at'),
                retry_count = json_extract(prior_attempt, '$.retry_count'),
                max_retries = json_extract(prior_attempt, '$.max_retries'),
                result = json_extract(prior_attempt, '$.result'),
                error_message = json_extract(prior_attempt, '$.error_message'),
                prior_attempt = NULL
            WHERE post_id = ? AND status = 'pending' AND prior_attempt IS NOT NULL
            "#,
        )
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        sqlx::query("DELETE FROM queue_items WHERE post_id = ? AND status = 'pending'")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::query("UPDATE posts SET scheduled_at = NULL WHERE id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        refresh_post_aggregate(&mut *tx, post_id, now).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }
}

/// Recompute a post's status, results and mirrors from its items
///
/// Returns `None` if the post no longer exists.
pub(crate) async fn refresh_post_aggregate(
    conn: &mut SqliteConnection,
    post_id: &str,
    now: i64,
) -> Result<Option<PostStatus>> {
    let post: Option<(String, Option<i64>, Option<i64>)> = sqlx::query_as(
        "SELECT target_platforms, scheduled_at, published_at FROM posts WHERE id = ?",
    )
    .bind(post_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    let Some((targets_json, scheduled_at, published_at)) = post else {
        return Ok(None);
    };
    let targets: Vec<Platform> = from_json(&targets_json)?;

    let rows = sqlx::query(
        r#"
        SELECT platform, status, retry_count, started_at, completed_at, result, error_message
        FROM queue_items WHERE post_id = ?
        "#,
    )
    .bind(post_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    let items = rows
        .iter()
        .map(snapshot_from_row)
        .collect::<Result<Vec<_>>>()?;

    let status = aggregate_status(&items, &targets, scheduled_at.is_some());
    let results = ordered_results(&items, &targets);
    let retry_count = items.iter().map(|i| i.retry_count).max().unwrap_or(0);
    let published_at = match status {
        PostStatus::Published | PostStatus::Partial => Some(published_at.unwrap_or(now)),
        _ => None,
    };

    sqlx::query(
        r#"
        UPDATE posts
        SET status = ?, results = ?, retry_count = ?, last_error = ?, published_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(to_json(&results)?)
    .bind(i64::from(retry_count))
    .bind(last_error(&items))
    .bind(published_at)
    .bind(now)
    .bind(post_id)
    .execute(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(Some(status))
}

fn snapshot_from_row(row: &SqliteRow) -> Result<ItemSnapshot> {
    Ok(ItemSnapshot {
        platform: parse_stored("platform", &row.get::<String, _>("platform"))?,
        status: parse_stored("queue item status", &row.get::<String, _>("status"))?,
        retry_count: row.get::<i64, _>("retry_count").max(0) as u32,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        result: row
            .get::<Option<String>, _>("result")
            .map(|raw| from_json(&raw))
            .transpose()?,
        error_message: row.get("error_message"),
    })
}

fn item_from_row(row: &SqliteRow) -> Result<QueueItem> {
    Ok(QueueItem {
        id: row.get("id"),
        post_id: row.get("post_id"),
        owner_id: row.get("owner_id"),
        platform: parse_stored("platform", &row.get::<String, _>("platform"))?,
        status: parse_stored("queue item status", &row.get::<String, _>("status"))?,
        priority: row.get::<i64, _>("priority").clamp(0, 10) as u8,
        scheduled_at: row.get("scheduled_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        retry_count: row.get::<i64, _>("retry_count").max(0) as u32,
        max_retries: row.get::<i64, _>("max_retries").max(0) as u32,
        result: row
            .get::<Option<String>, _>("result")
            .map(|raw| from_json(&raw))
            .transpose()?,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
    })
}
