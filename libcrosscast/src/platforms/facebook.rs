//! Facebook Page adapter (Graph API)

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
    title_max: 255,
    description_max: 60_000,
    max_hashtags: 30,
    max_images: 10,
    requires_image: false,
};

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
    /// Photo uploads report the feed story separately
    post_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct Edge {
    summary: Option<Summary>,
}

#[derive(Debug, Deserialize)]
struct Shares {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct PostInsights {
    likes: Option<Edge>,
    comments: Option<Edge>,
    shares: Option<Shares>,
}

pub struct FacebookAdapter {
    client: ApiClient,
    page_id: Option<String>,
}

impl FacebookAdapter {
    pub fn new(config: &ApiPlatformConfig) -> Self {
        Self {
            client: ApiClient::new(Platform::Facebook, &config.api_base),
            page_id: None,
        }
    }

    fn page_id(&self) -> AdapterResult<&str> {
        self.page_id
            .as_deref()
            .ok_or_else(|| PlatformError::Authentication("no Facebook page selected".to_string()))
    }

    /// Upload a photo without publishing it, for use as attached media
    async fn stage_photo(&self, page_id: &str, url: &str) -> AdapterResult<String> {
        let request = self
            .client
            .post(&format!("{}/photos", page_id))?
            .json(&json!({ "url": url, "published": false }));
        let created: CreatedObject = self.client.send_json(request, "photo upload").await?;
        Ok(created.id)
    }
}

/// Title, then description and hashtags
fn message(content: &PostContent) -> String {
    let caption = content.caption();
    if caption.is_empty() {
        content.title.clone()
    } else {
        format!("{}\n\n{}", content.title, caption)
    }
}

fn metrics_from(insights: PostInsights) -> PostMetrics {
    let count = |edge: Option<Edge>| {
        edge.and_then(|e| e.summary)
            .map(|s| s.total_count)
            .unwrap_or(0)
    };
    PostMetrics {
        likes: count(insights.likes),
        comments: count(insights.comments),
        shares: insights.shares.map(|s| s.count).unwrap_or(0),
        views: None,
        fetched_at: chrono::Utc::now().timestamp(),
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    fn limits(&self) -> ContentLimits {
        LIMITS
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> AdapterResult<bool> {
        let (Some(token), Some(page_id)) = (&credentials.access_token, &credentials.account_id)
        else {
            return Ok(false);
        };

        self.client
            .set_token(SecretString::from(token.expose_secret().to_string()));
        self.page_id = Some(page_id.clone());
        self.validate_connection().await
    }

    async fn validate_connection(&mut self) -> AdapterResult<bool> {
        if !self.client.has_token() {
            return Ok(false);
        }
        let page_id = self.page_id()?.to_string();
        let request = self.client.get(&format!("{}?fields=id", page_id))?;
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
        let page_id = self.page_id()?;
        let text = message(content);

        let created: CreatedObject = match content.images.as_slice() {
            [] => {
                let request = self
                    .client
                    .post(&format!("{}/feed", page_id))?
                    .json(&json!({ "message": text }));
                self.client.send_json(request, "posting").await?
            }
            [single] => {
                let request = self
                    .client
                    .post(&format!("{}/photos", page_id))?
                    .json(&json!({ "url": single, "caption": text }));
                self.client.send_json(request, "posting").await?
            }
            many => {
                let mut attached = Vec::with_capacity(many.len());
                for url in many {
                    let media_fbid = self.stage_photo(page_id, url).await?;
                    attached.push(json!({ "media_fbid": media_fbid }));
                }
                let request = self
                    .client
                    .post(&format!("{}/feed", page_id))?
                    .json(&json!({ "message": text, "attached_media": attached }));
                self.client.send_json(request, "posting").await?
            }
        };

        let post_id = created.post_id.unwrap_or(created.id);
        let mut metadata = serde_json::Map::new();
        metadata.insert("page_id".to_string(), json!(page_id));
        metadata.insert("image_count".to_string(), json!(content.images.len()));

        Ok(PublishReceipt {
            url: Some(format!("https://www.facebook.com/{}", post_id)),
            post_id,
            published_at: Some(chrono::Utc::now().timestamp()),
            metadata,
        })
    }

    async fn get_post_metrics(&self, post_id: &str) -> AdapterResult<Option<PostMetrics>> {
        let request = self.client.get(&format!(
            "{}?fields=likes.summary(true).limit(0),comments.summary(true).limit(0),shares",
            post_id
        ))?;
        let insights: PostInsights = self.client.send_json(request, "metrics").await?;
        Ok(Some(metrics_from(insights)))
    }

    async fn disconnect(&mut self) -> AdapterResult<bool> {
        self.page_id = None;
        Ok(self.client.clear_token())
    }
}
