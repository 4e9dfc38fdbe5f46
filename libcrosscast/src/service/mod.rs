//! Service layer for Crosscast
//!
//! `CrosscastService` is the explicit composition root: it opens the
//! database, builds the adapter registry and the [`PlatformService`], and
//! hands the same instances to the [`PostingService`] and to any
//! [`QueueProcessor`] it creates. Nothing here is a global.
//!
//! - `PostingService`: create/list/delete posts, immediate publish, scheduling
//! - `PlatformService`: adapter resolution, credentials, timeouts, normalization
//! - `ValidationService`: post field checks
//! - `EventBus`: progress event distribution
//!
//! # Example
//!
//! ```no_run
//! use libcrosscast::service::CrosscastService;
//! use libcrosscast::types::{NewPost, Platform};
//!
//! # async fn example() -> libcrosscast::Result<()> {
//! let service = CrosscastService::new().await?;
//!
//! let post = service
//!     .posting()
//!     .create_post(
//!         "owner-1",
//!         NewPost {
//!             title: "Vintage denim jacket".to_string(),
//!             description: "Size M, barely worn".to_string(),
//!             images: vec!["https://cdn.example.com/jacket.jpg".to_string()],
//!             target_platforms: vec![Platform::Facebook, Platform::Instagram],
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//!
//! let outcome = service
//!     .posting()
//!     .publish_post_immediately("owner-1", &post.id, None)
//!     .await?;
//! for result in &outcome.results {
//!     println!("{}: {:?}", result.platform, result.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod platform;
pub mod posting;
pub mod validation;

use std::sync::Arc;

use self::events::{EventBus, EventReceiver};
use self::platform::PlatformService;
use self::posting::PostingService;
use self::validation::ValidationService;
use crate::config::Config;
use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::platforms::registry::PlatformRegistry;
use crate::processor::QueueProcessor;

/// Main service facade
///
/// All sub-services share one `Arc<Database>`, one `Arc<Config>` and one
/// `PlatformService` (and with it the browser session cache).
pub struct CrosscastService {
    db: Arc<Database>,
    config: Arc<Config>,
    platforms: PlatformService,
    posting: PostingService,
    validation: ValidationService,
    event_bus: EventBus,
}

impl CrosscastService {
    /// Build from the default configuration file
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Build from `config` with the real platform adapters
    pub async fn from_config(config: Config) -> Result<Self> {
        let registry = PlatformRegistry::with_defaults(&config.platforms);
        Self::with_registry(config, registry).await
    }

    /// Build from `config` with a caller-supplied adapter registry
    pub async fn with_registry(config: Config, registry: PlatformRegistry) -> Result<Self> {
        let db_path = config.database_path()?;
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| ConfigError::MissingField("valid UTF-8 database path".to_string()))?;
        let db = Arc::new(Database::new(db_path_str).await?);

        Ok(Self::with_database(db, config, registry))
    }

    /// Assemble around an already-open database
    pub fn with_database(db: Arc<Database>, config: Config, registry: PlatformRegistry) -> Self {
        let config = Arc::new(config);
        let event_bus = EventBus::default();
        let platforms = PlatformService::new(
            registry,
            Arc::clone(&db) as Arc<dyn crate::connections::ConnectionStore>,
            config.posting.call_timeout(),
        );
        let posting = PostingService::new(
            Arc::clone(&db),
            Arc::clone(&config),
            platforms.clone(),
            event_bus.clone(),
        );
        let validation = ValidationService::new(Arc::clone(&config));

        Self {
            db,
            config,
            platforms,
            posting,
            validation,
            event_bus,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn posting(&self) -> &PostingService {
        &self.posting
    }

    pub fn platforms(&self) -> &PlatformService {
        &self.platforms
    }

    pub fn validation(&self) -> &ValidationService {
        &self.validation
    }

    /// A queue processor sharing this service's adapters and event bus
    pub fn processor(&self) -> QueueProcessor {
        QueueProcessor::new(
            Arc::clone(&self.db),
            self.platforms.clone(),
            self.config.queue.clone(),
            self.event_bus.clone(),
        )
    }

    /// Receive progress events from publishing and queue processing
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}
