//! Progress events for publishing and queue processing
//!
//! A `tokio::sync::broadcast` channel fans each event out to every
//! subscriber. The posting service emits while an immediate publish is in
//! flight; the queue processor emits as items are claimed, re-queued or
//! finished. Emitting never blocks: with no subscribers the event is
//! dropped, and a slow subscriber sees `Lagged` instead of stalling delivery.
//!
//! ```no_run
//! use libcrosscast::service::events::{Event, EventBus};
//! use libcrosscast::types::Platform;
//!
//! # async fn example() {
//! let bus = EventBus::default();
//! let mut events = bus.subscribe();
//!
//! bus.emit(Event::PublishStarted {
//!     post_id: "post-1".to_string(),
//!     platforms: vec![Platform::Facebook],
//! });
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{} {:?}", event.post_id(), event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorCode;
use crate::types::{Platform, PlatformResult, PostStatus};

pub type EventReceiver = broadcast::Receiver<Event>;

/// Cloneable handle; every clone feeds the same subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before the oldest are lost
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Events emitted during publishing and queue processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Immediate publish fan-out started
    PublishStarted {
        post_id: String,
        platforms: Vec<Platform>,
    },

    /// One platform of an immediate publish returned
    PlatformFinished {
        post_id: String,
        result: PlatformResult,
    },

    /// A worker claimed a due queue item
    ItemClaimed {
        item_id: String,
        post_id: String,
        platform: Platform,
    },

    /// A transient failure pushed the item back to pending
    ItemRetryScheduled {
        item_id: String,
        post_id: String,
        platform: Platform,
        retry_count: u32,
        scheduled_at: i64,
        error_code: ErrorCode,
    },

    /// The item failed permanently
    ItemFailed {
        item_id: String,
        post_id: String,
        platform: Platform,
        retry_count: u32,
        error: String,
    },

    /// The item was delivered
    ItemCompleted {
        item_id: String,
        post_id: String,
        platform: Platform,
    },

    /// Every target of the post reached a terminal state
    PostFinalized {
        post_id: String,
        status: PostStatus,
    },
}

impl Event {
    /// The post every event is about
    pub fn post_id(&self) -> &str {
        match self {
            Event::PublishStarted { post_id, .. }
            | Event::PlatformFinished { post_id, .. }
            | Event::ItemClaimed { post_id, .. }
            | Event::ItemRetryScheduled { post_id, .. }
            | Event::ItemFailed { post_id, .. }
            | Event::ItemCompleted { post_id, .. }
            | Event::PostFinalized { post_id, .. } => post_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_started_reaches_subscriber() {
        let bus = EventBus::new(10);
        let mut events = bus.subscribe();

        bus.emit(Event::PublishStarted {
            post_id: "post-1".to_string(),
            platforms: vec![Platform::Facebook, Platform::Instagram],
        });

        match events.recv().await.unwrap() {
            Event::PublishStarted { post_id, platforms } => {
                assert_eq!(post_id, "post-1");
                assert_eq!(platforms, vec![Platform::Facebook, Platform::Instagram]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_claims() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(Event::ItemClaimed {
            item_id: "item-1".to_string(),
            post_id: "post-1".to_string(),
            platform: Platform::Pinterest,
        });

        for event in [first.recv().await.unwrap(), second.recv().await.unwrap()] {
            assert!(matches!(
                event,
                Event::ItemClaimed { ref item_id, platform: Platform::Pinterest, .. } if item_id == "item-1"
            ));
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(Event::PostFinalized {
            post_id: "post-2".to_string(),
            status: PostStatus::Published,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_post_id_accessor() {
        let event = Event::ItemFailed {
            item_id: "item-3".to_string(),
            post_id: "post-3".to_string(),
            platform: Platform::Mercari,
            retry_count: 3,
            error: "Network error: reset".to_string(),
        };
        assert_eq!(event.post_id(), "post-3");
    }

    #[test]
    fn test_retry_event_json_shape() {
        let event = Event::ItemRetryScheduled {
            item_id: "item-9".to_string(),
            post_id: "post-9".to_string(),
            platform: Platform::Instagram,
            retry_count: 1,
            scheduled_at: 1_700_000_060,
            error_code: ErrorCode::Timeout,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "item_retry_scheduled");
        assert_eq!(json["platform"], "instagram");
        assert_eq!(json["error_code"], "timeout");
        assert_eq!(json["scheduled_at"], 1_700_000_060);

        let back: Event = serde_json::from_value(json).unwrap();
        assert!(matches!(back, Event::ItemRetryScheduled { retry_count: 1, .. }));
    }
}
