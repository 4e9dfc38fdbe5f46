//! Core types for Crosscast

use std::collections::BTreeMap;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, PlatformError};

// ============================================================================
// Platforms
// ============================================================================

/// Every platform a post can be delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Instagram,
    Pinterest,
    Poshmark,
    Mercari,
}

/// How an adapter talks to its platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterFamily {
    /// OAuth access token + REST API
    Api,
    /// Headless browser session + DOM interaction
    Browser,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Facebook,
        Platform::Instagram,
        Platform::Pinterest,
        Platform::Poshmark,
        Platform::Mercari,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Pinterest => "pinterest",
            Platform::Poshmark => "poshmark",
            Platform::Mercari => "mercari",
        }
    }

    pub fn family(&self) -> AdapterFamily {
        match self {
            Platform::Facebook | Platform::Instagram | Platform::Pinterest => AdapterFamily::Api,
            Platform::Poshmark | Platform::Mercari => AdapterFamily::Browser,
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "pinterest" => Ok(Platform::Pinterest),
            "poshmark" => Ok(Platform::Poshmark),
            "mercari" => Ok(Platform::Mercari),
            other => Err(format!(
                "Unknown platform '{}'. Valid options: facebook, instagram, pinterest, poshmark, mercari",
                other
            )),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Statuses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Partial,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Partial => "partial",
            PostStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Published | PostStatus::Partial | PostStatus::Failed
        )
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "partial" => Ok(PostStatus::Partial),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("Unknown post status '{}'", other)),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueItemStatus::Completed | QueueItemStatus::Failed)
    }
}

impl FromStr for QueueItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueItemStatus::Pending),
            "processing" => Ok(QueueItemStatus::Processing),
            "completed" => Ok(QueueItemStatus::Completed),
            "failed" => Ok(QueueItemStatus::Failed),
            other => Err(format!("Unknown queue item status '{}'", other)),
        }
    }
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Posts
// ============================================================================

/// Per-platform replacement for the post's shared fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub owner_id: String,
    pub product_id: Option<String>,
    pub title: String,
    pub description: String,
    pub hashtags: Vec<String>,
    pub images: Vec<String>,
    pub target_platforms: Vec<Platform>,
    pub platform_content: BTreeMap<Platform, ContentOverride>,
    pub scheduled_at: Option<i64>,
    pub published_at: Option<i64>,
    pub status: PostStatus,
    pub results: Vec<PlatformResult>,
    pub priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    /// Build a draft post from a validated request
    pub fn from_request(owner_id: &str, request: NewPost, priority: u8, max_retries: u32) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            product_id: request.product_id,
            title: request.title.trim().to_string(),
            description: request.description.trim().to_string(),
            hashtags: request.hashtags.iter().map(|h| normalize_hashtag(h)).collect(),
            images: request.images,
            target_platforms: request.target_platforms,
            platform_content: request.platform_content,
            scheduled_at: None,
            published_at: None,
            status: PostStatus::Draft,
            results: Vec::new(),
            priority: request.priority.unwrap_or(priority),
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(max_retries),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Content as seen by `platform`, with any override applied
    pub fn content_for(&self, platform: Platform) -> PostContent {
        let overrides = self.platform_content.get(&platform);
        PostContent {
            title: overrides
                .and_then(|o| o.title.clone())
                .unwrap_or_else(|| self.title.clone()),
            description: overrides
                .and_then(|o| o.description.clone())
                .unwrap_or_else(|| self.description.clone()),
            hashtags: overrides
                .and_then(|o| o.hashtags.clone())
                .unwrap_or_else(|| self.hashtags.clone()),
            images: self.images.clone(),
        }
    }
}

/// Strip leading `#` and surrounding whitespace
pub fn normalize_hashtag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_string()
}

/// Input for creating a post
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPost {
    pub product_id: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub target_platforms: Vec<Platform>,
    #[serde(default)]
    pub platform_content: BTreeMap<Platform, ContentOverride>,
    pub priority: Option<u8>,
    pub max_retries: Option<u32>,
}

/// What an adapter formats and publishes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostContent {
    pub title: String,
    pub description: String,
    pub hashtags: Vec<String>,
    pub images: Vec<String>,
}

impl PostContent {
    /// Description followed by the hashtags, as most feeds render a caption
    pub fn caption(&self) -> String {
        if self.hashtags.is_empty() {
            return self.description.clone();
        }
        let tags = self
            .hashtags
            .iter()
            .map(|t| format!("#{}", t))
            .collect::<Vec<_>>()
            .join(" ");
        if self.description.is_empty() {
            tags
        } else {
            format!("{}\n\n{}", self.description, tags)
        }
    }
}

// ============================================================================
// Delivery results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failed,
}

/// What a platform returned after a successful publish
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub post_id: String,
    pub url: Option<String>,
    pub published_at: Option<i64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Structured outcome of delivering one post to one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformResult {
    pub platform: Platform,
    pub status: ResultStatus,
    pub post_id: Option<String>,
    pub url: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub published_at: Option<i64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PlatformResult {
    pub fn success(platform: Platform, receipt: PublishReceipt) -> Self {
        Self {
            platform,
            status: ResultStatus::Success,
            post_id: Some(receipt.post_id),
            url: receipt.url,
            error_code: None,
            error_message: None,
            published_at: Some(
                receipt
                    .published_at
                    .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            ),
            retry_count: 0,
            metadata: receipt.metadata,
        }
    }

    pub fn failure(platform: Platform, error: &PlatformError) -> Self {
        Self {
            platform,
            status: ResultStatus::Failed,
            post_id: None,
            url: None,
            error_code: Some(error.code()),
            error_message: Some(error.to_string()),
            published_at: None,
            retry_count: 0,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Failed with a transient error code
    pub fn is_retryable(&self) -> bool {
        !self.is_success() && self.error_code.is_some_and(|c| c.is_retryable())
    }
}

/// Unit of delivery work for one (post, platform) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub post_id: String,
    pub owner_id: String,
    pub platform: Platform,
    pub status: QueueItemStatus,
    pub priority: u8,
    pub scheduled_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<PlatformResult>,
    pub error_message: Option<String>,
    pub created_at: i64,
}

impl QueueItem {
    pub fn new(post: &Post, platform: Platform, status: QueueItemStatus, scheduled_at: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            post_id: post.id.clone(),
            owner_id: post.owner_id.clone(),
            platform,
            status,
            priority: post.priority,
            scheduled_at,
            started_at: (status == QueueItemStatus::Processing).then_some(now),
            completed_at: None,
            retry_count: 0,
            max_retries: post.max_retries,
            result: None,
            error_message: None,
            created_at: now,
        }
    }
}

/// Engagement numbers fetched from a platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub views: Option<u64>,
    pub fetched_at: i64,
}

// ============================================================================
// Collaborator records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub created_at: i64,
}

impl User {
    pub fn new(email: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: i64,
}

impl Product {
    pub fn new(owner_id: &str, title: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Secret material an adapter authenticates with
///
/// API platforms use `access_token`; browser platforms use `username` +
/// `password`. `account_id` is the page, business account or board the
/// content lands on.
#[derive(Debug, Default)]
pub struct Credentials {
    pub account_id: Option<String>,
    pub access_token: Option<SecretString>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

/// An owner's link to a platform, issued by the OAuth subsystem
#[derive(Debug)]
pub struct PlatformConnection {
    pub owner_id: String,
    pub platform: Platform,
    pub credentials: Credentials,
    pub active: bool,
    pub expires_at: Option<i64>,
}

impl PlatformConnection {
    /// Active and not past its expiry
    pub fn is_usable(&self, now: i64) -> bool {
        self.active && self.expires_at.is_none_or(|t| t > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_post() -> Post {
        Post::from_request(
            "owner-1",
            NewPost {
                title: "  Vintage denim jacket ".to_string(),
                description: "Size M, barely worn".to_string(),
                hashtags: vec!["#denim".to_string(), " vintage ".to_string()],
                images: vec!["https://cdn.example.com/a.jpg".to_string()],
                target_platforms: vec![Platform::Facebook, Platform::Instagram],
                ..Default::default()
            },
            5,
            3,
        )
    }

    #[test]
    fn test_post_from_request_defaults() {
        let post = sample_post();

        assert!(Uuid::parse_str(&post.id).is_ok());
        assert_eq!(post.title, "Vintage denim jacket");
        assert_eq!(post.hashtags, vec!["denim", "vintage"]);
        assert_eq!(post.status, PostStatus::Draft);
        assert_eq!(post.priority, 5);
        assert_eq!(post.max_retries, 3);
        assert!(post.results.is_empty());
        assert!(post.published_at.is_none());
    }

    #[test]
    fn test_content_for_applies_override() {
        let mut post = sample_post();
        post.platform_content.insert(
            Platform::Instagram,
            ContentOverride {
                description: Some("Insta copy".to_string()),
                ..Default::default()
            },
        );

        let insta = post.content_for(Platform::Instagram);
        assert_eq!(insta.description, "Insta copy");
        assert_eq!(insta.title, "Vintage denim jacket");

        let facebook = post.content_for(Platform::Facebook);
        assert_eq!(facebook.description, "Size M, barely worn");
    }

    #[test]
    fn test_caption_joins_hashtags() {
        let content = PostContent {
            description: "Hello".to_string(),
            hashtags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert_eq!(content.caption(), "Hello\n\n#a #b");
    }

    #[test]
    fn test_platform_round_trips_through_str() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_families() {
        assert_eq!(Platform::Facebook.family(), AdapterFamily::Api);
        assert_eq!(Platform::Pinterest.family(), AdapterFamily::Api);
        assert_eq!(Platform::Poshmark.family(), AdapterFamily::Browser);
        assert_eq!(Platform::Mercari.family(), AdapterFamily::Browser);
    }

    #[test]
    fn test_result_status_serializes_uppercase() {
        let json = serde_json::to_string(&ResultStatus::Success).unwrap();
        assert_eq!(json, r#""SUCCESS""#);
    }

    #[test]
    fn test_failure_result_carries_code() {
        let result = PlatformResult::failure(
            Platform::Instagram,
            &PlatformError::Timeout("30s elapsed".to_string()),
        );
        assert!(!result.is_success());
        assert!(result.is_retryable());
        assert_eq!(result.error_code, Some(ErrorCode::Timeout));

        let rejected = PlatformResult::failure(
            Platform::Instagram,
            &PlatformError::ContentRejected("nudity".to_string()),
        );
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn test_connection_usable_respects_expiry() {
        let connection = PlatformConnection {
            owner_id: "o".to_string(),
            platform: Platform::Facebook,
            credentials: Credentials::default(),
            active: true,
            expires_at: Some(100),
        };
        assert!(connection.is_usable(99));
        assert!(!connection.is_usable(100));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(PostStatus::Partial.is_terminal());
        assert!(!PostStatus::Publishing.is_terminal());
        assert!(QueueItemStatus::Failed.is_terminal());
        assert!(!QueueItemStatus::Processing.is_terminal());
    }
}
