//! Platform adapters
//!
//! Every platform implements [`PlatformAdapter`]. Two families share the
//! trait: API adapters (OAuth token + REST, see [`api`]) and browser
//! adapters driving a headless Chrome tab (see [`browser`]). The
//! [`registry::PlatformRegistry`] maps each [`Platform`] to a factory, so
//! orchestration code never branches on the platform.
//!
//! ```no_run
//! use libcrosscast::config::PlatformsConfig;
//! use libcrosscast::platforms::registry::PlatformRegistry;
//! use libcrosscast::types::{Platform, PostContent};
//!
//! let registry = PlatformRegistry::with_defaults(&PlatformsConfig::default());
//! let adapter = registry.create(Platform::Pinterest).unwrap();
//! let formatted = adapter.format_content(&PostContent {
//!     title: "Linen shirt".to_string(),
//!     images: vec!["https://cdn.example.com/shirt.jpg".to_string()],
//!     ..Default::default()
//! });
//! assert!(formatted.is_ok());
//! ```

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::types::{Credentials, Platform, PostContent, PostMetrics, PublishReceipt};

pub mod api;
pub mod browser;
pub mod facebook;
pub mod instagram;
pub mod pinterest;
pub mod registry;

// Always compiled so integration tests and downstream crates can script outcomes
pub mod mock;

pub type AdapterResult<T> = std::result::Result<T, PlatformError>;

/// Numeric limits a platform enforces on a post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLimits {
    pub title_max: usize,
    pub description_max: usize,
    pub max_hashtags: usize,
    pub max_images: usize,
    /// Publishing without at least one image is rejected
    pub requires_image: bool,
}

impl ContentLimits {
    /// Truncate `content` to these limits
    ///
    /// Text is cut on char boundaries with a trailing ellipsis; extra
    /// hashtags and images are dropped from the end. A missing required
    /// image or an empty title is an `InvalidPayload`.
    pub fn apply(&self, content: &PostContent) -> AdapterResult<PostContent> {
        if content.title.trim().is_empty() {
            return Err(PlatformError::InvalidPayload("title is required".to_string()));
        }
        if self.requires_image && content.images.is_empty() {
            return Err(PlatformError::InvalidPayload(
                "at least one image is required".to_string(),
            ));
        }

        Ok(PostContent {
            title: truncate_chars(&content.title, self.title_max),
            description: truncate_chars(&content.description, self.description_max),
            hashtags: content
                .hashtags
                .iter()
                .take(self.max_hashtags)
                .cloned()
                .collect(),
            images: content.images.iter().take(self.max_images).cloned().collect(),
        })
    }
}

/// Cut `text` to at most `max` chars, ending with `…` when shortened
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut truncated: String = text.chars().take(max - 1).collect();
    truncated.push('…');
    truncated
}

/// Uniform capability set every platform provides
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    fn limits(&self) -> ContentLimits;

    /// Establish a session or verify the token
    ///
    /// `Ok(false)` means the platform refused the credentials.
    async fn authenticate(&mut self, credentials: &Credentials) -> AdapterResult<bool>;

    /// Whether the current token/session can still publish
    async fn validate_connection(&mut self) -> AdapterResult<bool>;

    /// Apply this platform's limits
    fn format_content(&self, content: &PostContent) -> AdapterResult<PostContent> {
        self.limits().apply(content)
    }

    async fn post_content(&self, content: &PostContent) -> AdapterResult<PublishReceipt>;

    /// Engagement numbers for a published post, if the platform exposes them
    async fn get_post_metrics(&self, _post_id: &str) -> AdapterResult<Option<PostMetrics>> {
        Ok(None)
    }

    /// Drop the token/session; `false` if there was nothing to drop
    async fn disconnect(&mut self) -> AdapterResult<bool>;
}
