//! Pinterest adapter (API v5)
//!
//! Creates one pin per post on the connection's board, using the first image.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::api::ApiClient;
use super::{AdapterResult, ContentLimits, PlatformAdapter};
use crate::config::ApiPlatformConfig;
use crate::error::PlatformError;
use crate::types::{Credentials, Platform, PostContent, PostMetrics, PublishReceipt};

const LIMITS: ContentLimits = ContentLimits {
    title_max: 100,
    description_max: 500,
    max_hashtags: 20,
    max_images: 1,
    requires_image: true,
};

#[derive(Debug, Deserialize)]
struct Pin {
    id: String,
    board_id: Option<String>,
}

pub struct PinterestAdapter {
    client: ApiClient,
    board_id: Option<String>,
}

impl PinterestAdapter {
    pub fn new(config: &ApiPlatformConfig) -> Self {
        Self {
            client: ApiClient::new(Platform::Pinterest, &config.api_base),
            board_id: None,
        }
    }
}

fn pin_body(board_id: &str, content: &PostContent) -> AdapterResult<serde_json::Value> {
    let image = content.images.first().ok_or_else(|| {
        PlatformError::InvalidPayload("Pinterest pins need an image".to_string())
    })?;
    Ok(json!({
        "board_id": board_id,
        "title": content.title,
        "description": content.caption(),
        "media_source": { "source_type": "image_url", "url": image },
    }))
}

/// Lifetime counters from a `pin_metrics=true` response
fn metrics_from(pin: &serde_json::Value) -> PostMetrics {
    let lifetime = &pin["pin_metrics"]["lifetime_metrics"];
    let count = |key: &str| lifetime[key].as_u64().unwrap_or(0);
    PostMetrics {
        likes: count("reaction"),
        comments: count("comment"),
        shares: count("save"),
        views: lifetime["impression"].as_u64(),
        fetched_at: chrono::Utc::now().timestamp(),
    }
}

#[async_trait]
impl PlatformAdapter for PinterestAdapter {
    fn platform(&self) -> Platform {
        Platform::Pinterest
    }

    fn limits(&self) -> ContentLimits {
        LIMITS
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> AdapterResult<bool> {
        let (Some(token), Some(board)) = (&credentials.access_token, &credentials.account_id)
        else {
            return Ok(false);
        };
        self.client
            .set_token(SecretString::from(token.expose_secret().to_string()));
        self.board_id = Some(board.clone());
        self.validate_connection().await
    }

    async fn validate_connection(&mut self) -> AdapterResult<bool> {
        if !self.client.has_token() {
            return Ok(false);
        }
        let request = self.client.get("user_account")?;
        match self
            .client
            .send_json::<serde_json::Value>(request, "connection check")
            .await
        {
            Ok(_) => Ok(true),
            Err(PlatformError::Authentication(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn post_content(&self, content: &PostContent) -> AdapterResult<PublishReceipt> {
        let board_id = self
            .board_id
            .as_deref()
            .ok_or_else(|| PlatformError::Authentication("no Pinterest board selected".to_string()))?;

        let request = self.client.post("pins")?.json(&pin_body(board_id, content)?);
        let pin: Pin = self.client.send_json(request, "pin creation").await?;

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "board_id".to_string(),
            json!(pin.board_id.as_deref().unwrap_or(board_id)),
        );

        Ok(PublishReceipt {
            url: Some(format!("https://www.pinterest.com/pin/{}/", pin.id)),
            post_id: pin.id,
            published_at: Some(chrono::Utc::now().timestamp()),
            metadata,
        })
    }

    async fn get_post_metrics(&self, post_id: &str) -> AdapterResult<Option<PostMetrics>> {
        let request = self
            .client
            .get(&format!("pins/{}?pin_metrics=true", post_id))?;
        let pin: serde_json::Value = self.client.send_json(request, "metrics").await?;
        Ok(Some(metrics_from(&pin)))
    }

    async fn disconnect(&mut self) -> AdapterResult<bool> {
        self.board_id = None;
        Ok(self.client.clear_token())
    }
}
