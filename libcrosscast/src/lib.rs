//! Crosscast - multi-platform post publishing and delivery queue
//!
//! This library takes a post targeted at several platforms (social networks
//! and marketplaces), publishes it immediately or queues it for later, and
//! records a structured per-platform outcome. Transient failures are retried
//! with capped exponential backoff; permanent ones fail only the affected
//! platform.

pub mod aggregate;
pub mod config;
pub mod connections;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod processor;
pub mod retry;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{CrosscastError, Result};
pub use processor::{BatchReport, Clock, QueueProcessor};
pub use service::CrosscastService;
pub use types::{Platform, PlatformResult, Post, PostStatus, QueueItem, QueueItemStatus};
