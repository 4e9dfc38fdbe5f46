//! Configuration management for Crosscast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/crosscast/crosscast.db".to_string(),
        }
    }
}

/// Scheduler loop and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    /// Items processed concurrently within one batch
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter: bool,
    /// A `processing` claim older than this may be reclaimed
    pub worker_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            batch_size: 25,
            concurrency: 8,
            max_retries: 3,
            base_delay_secs: 60,
            max_delay_secs: 3600,
            jitter: false,
            worker_timeout_secs: 900,
        }
    }
}

/// What `delete_post` does when a queue item is mid-flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Wait for in-flight items to finish, up to `delete_wait_secs`
    #[default]
    Block,
    /// Refuse immediately
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingConfig {
    /// Per adapter call (validate, authenticate, post)
    pub call_timeout_secs: u64,
    pub default_priority: u8,
    pub delete_policy: DeletePolicy,
    pub delete_wait_secs: u64,
    pub delete_poll_millis: u64,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            default_priority: 5,
            delete_policy: DeletePolicy::Block,
            delete_wait_secs: 300,
            delete_poll_millis: 500,
        }
    }
}

impl PostingConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Bounds enforced by `create_post`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub title_max_chars: usize,
    pub description_max_chars: usize,
    pub max_hashtags: usize,
    pub max_images: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            title_max_chars: 200,
            description_max_chars: 5000,
            max_hashtags: 30,
            max_images: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPlatformConfig {
    pub enabled: bool,
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Chrome binary to launch; searched on PATH when unset
    pub chrome_executable: Option<String>,
    /// DevTools websocket of an already running Chrome to attach to instead
    pub devtools_url: Option<String>,
    pub headless: bool,
    pub session_ttl_hours: i64,
    /// Where listing photos are downloaded before upload
    pub download_dir: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            devtools_url: None,
            headless: true,
            session_ttl_hours: 24,
            download_dir: "~/.cache/crosscast/uploads".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub facebook: ApiPlatformConfig,
    pub instagram: ApiPlatformConfig,
    pub pinterest: ApiPlatformConfig,
    pub browser: BrowserConfig,
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            facebook: ApiPlatformConfig {
                enabled: true,
                api_base: "https://graph.facebook.com/v19.0".to_string(),
            },
            instagram: ApiPlatformConfig {
                enabled: true,
                api_base: "https://graph.facebook.com/v19.0".to_string(),
            },
            pinterest: ApiPlatformConfig {
                enabled: true,
                api_base: "https://api.pinterest.com/v5".to_string(),
            },
            browser: BrowserConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file yields the defaults; `CROSSCAST_DB_PATH` always wins
    /// over `database.path`.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CROSSCAST_DB_PATH") {
            self.database.path = path;
        }
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.batch_size == 0 {
            return Err(invalid("queue.batch_size", "must be at least 1"));
        }
        if self.queue.concurrency == 0 {
            return Err(invalid("queue.concurrency", "must be at least 1"));
        }
        if self.queue.max_delay_secs < self.queue.base_delay_secs {
            return Err(invalid(
                "queue.max_delay_secs",
                "must not be smaller than queue.base_delay_secs",
            ));
        }
        if self.posting.default_priority > 10 {
            return Err(invalid("posting.default_priority", "must be between 0 and 10"));
        }
        if self.posting.call_timeout_secs == 0 {
            return Err(invalid("posting.call_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> Result<PathBuf> {
        resolve_db_path(Some(&self.database.path))
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::CrosscastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosscast").join("config.toml"))
}

/// Resolve the database path, falling back to the XDG data directory
pub fn resolve_db_path(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = configured.filter(|p| !p.trim().is_empty()) {
        return Ok(PathBuf::from(shellexpand::tilde(path).to_string()));
    }

    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("crosscast").join("crosscast.db"))
}
