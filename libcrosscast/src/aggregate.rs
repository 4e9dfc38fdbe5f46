//! Post status as a function of its queue items
//!
//! Pure functions, so the storage layer can call them inside the same
//! transaction that moved an item.

use crate::types::{Platform, PlatformResult, PostStatus, QueueItemStatus};

/// The parts of a queue item the aggregate depends on
#[derive(Debug, Clone)]
pub struct ItemSnapshot {
    pub platform: Platform,
    pub status: QueueItemStatus,
    pub retry_count: u32,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<PlatformResult>,
    pub error_message: Option<String>,
}

impl ItemSnapshot {
    fn attempted(&self) -> bool {
        self.retry_count > 0 || self.started_at.is_some() || self.status != QueueItemStatus::Pending
    }
}

/// Derive the post status from its items
///
/// `deferred` is true when the post was scheduled rather than published
/// immediately: untouched pending items then read as `scheduled`. A target
/// platform without any item counts as not delivered.
pub fn aggregate_status(
    items: &[ItemSnapshot],
    targets: &[Platform],
    deferred: bool,
) -> PostStatus {
    if items.is_empty() {
        return PostStatus::Draft;
    }

    let live = items.iter().any(|i| !i.status.is_terminal());
    if live {
        // Items finished in an earlier cycle don't count against "scheduled"
        let untouched = items
            .iter()
            .filter(|i| !i.status.is_terminal())
            .all(|i| i.status == QueueItemStatus::Pending && !i.attempted());
        return if deferred && untouched {
            PostStatus::Scheduled
        } else {
            PostStatus::Publishing
        };
    }

    let completed = items
        .iter()
        .filter(|i| i.status == QueueItemStatus::Completed)
        .count();
    let every_target_queued = targets
        .iter()
        .all(|target| items.iter().any(|i| i.platform == *target));
    match completed {
        0 => PostStatus::Failed,
        n if n == items.len() && every_target_queued => PostStatus::Published,
        _ => PostStatus::Partial,
    }
}

/// Results of finished items, ordered like `targets`
pub fn ordered_results(items: &[ItemSnapshot], targets: &[Platform]) -> Vec<PlatformResult> {
    let mut finished: Vec<&ItemSnapshot> =
        items.iter().filter(|i| i.status.is_terminal()).collect();
    finished.sort_by_key(|i| {
        targets
            .iter()
            .position(|p| *p == i.platform)
            .unwrap_or(usize::MAX)
    });

    finished
        .into_iter()
        .map(|item| {
            let mut result = item.result.clone().unwrap_or_else(|| {
                PlatformResult::failure(
                    item.platform,
                    &crate::error::PlatformError::Unexpected(
                        item.error_message
                            .clone()
                            .unwrap_or_else(|| "no result recorded".to_string()),
                    ),
                )
            });
            result.retry_count = item.retry_count;
            result
        })
        .collect()
}

/// Most recent failure message among the items, if any
pub fn last_error(items: &[ItemSnapshot]) -> Option<String> {
    items
        .iter()
        .filter(|i| i.error_message.is_some())
        .max_by_key(|i| i.completed_at.unwrap_or(0))
        .and_then(|i| i.error_message.clone())
}
