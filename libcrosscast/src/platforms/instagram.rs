//! Instagram business account adapter (Graph API content publishing)
//!
//! Publishing is two-step: create a media container, then publish it. More
//! than one image becomes a carousel of child containers.

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
    description_max: 2_000,
    max_hashtags: 30,
    max_images: 10,
    requires_image: true,
};

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Permalink {
    permalink: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaInsights {
    like_count: Option<u64>,
    comments_count: Option<u64>,
}

pub struct InstagramAdapter {
    client: ApiClient,
    ig_user_id: Option<String>,
}

impl InstagramAdapter {
    pub fn new(config: &ApiPlatformConfig) -> Self {
        Self {
            client: ApiClient::new(Platform::Instagram, &config.api_base),
            ig_user_id: None,
        }
    }

    fn user_id(&self) -> AdapterResult<&str> {
        self.ig_user_id.as_deref().ok_or_else(|| {
            PlatformError::Authentication("no Instagram business account selected".to_string())
        })
    }

    async fn create_container(&self, body: serde_json::Value) -> AdapterResult<String> {
        let request = self
            .client
            .post(&format!("{}/media", self.user_id()?))?
            .json(&body);
        let created: Created = self.client.send_json(request, "media container").await?;
        Ok(created.id)
    }
}

/// Instagram has no title field; it leads the caption
fn caption(content: &PostContent) -> String {
    let rest = content.caption();
    if rest.is_empty() {
        content.title.clone()
    } else {
        format!("{}\n\n{}", content.title, rest)
    }
}

/// Container bodies for `images`: one for a single image, children + parent for a carousel
fn container_plan(images: &[String], caption: &str) -> (Vec<serde_json::Value>, Option<serde_json::Value>) {
    match images {
        [single] => (vec![json!({ "image_url": single, "caption": caption })], None),
        many => (
            many.iter()
                .map(|url| json!({ "image_url": url, "is_carousel_item": true }))
                .collect(),
            Some(json!({ "media_type": "CAROUSEL", "caption": caption })),
        ),
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn limits(&self) -> ContentLimits {
        LIMITS
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> AdapterResult<bool> {
        let (Some(token), Some(account)) = (&credentials.access_token, &credentials.account_id)
        else {
            return Ok(false);
        };
        self.client
            .set_token(SecretString::from(token.expose_secret().to_string()));
        self.ig_user_id = Some(account.clone());
        self.validate_connection().await
    }

    async fn validate_connection(&mut self) -> AdapterResult<bool> {
        if !self.client.has_token() {
            return Ok(false);
        }
        let request = self
            .client
            .get(&format!("{}?fields=id,username", self.user_id()?))?;
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
        if content.images.is_empty() {
            return Err(PlatformError::InvalidPayload(
                "Instagram posts need at least one image".to_string(),
            ));
        }

        let caption = caption(content);
        let (children, parent) = container_plan(&content.images, &caption);

        let mut child_ids = Vec::with_capacity(children.len());
        for body in children {
            child_ids.push(self.create_container(body).await?);
        }

        let creation_id = match parent {
            Some(mut body) => {
                body["children"] = json!(child_ids.join(","));
                self.create_container(body).await?
            }
            None => child_ids.remove(0),
        };

        let request = self
            .client
            .post(&format!("{}/media_publish", self.user_id()?))?
            .json(&json!({ "creation_id": creation_id }));
        let published: Created = self.client.send_json(request, "publish").await?;

        // Permalink is informational; the post is already live
        let url = match self.client.get(&format!("{}?fields=permalink", published.id)) {
            Ok(request) => self
                .client
                .send_json::<Permalink>(request, "permalink")
                .await
                .ok()
                .and_then(|p| p.permalink),
            Err(_) => None,
        };

        let mut metadata = serde_json::Map::new();
        metadata.insert("container_id".to_string(), json!(creation_id));
        metadata.insert(
            "media_type".to_string(),
            json!(if content.images.len() > 1 { "CAROUSEL" } else { "IMAGE" }),
        );

        Ok(PublishReceipt {
            post_id: published.id,
            url,
            published_at: Some(chrono::Utc::now().timestamp()),
            metadata,
        })
    }

    async fn get_post_metrics(&self, post_id: &str) -> AdapterResult<Option<PostMetrics>> {
        let request = self
            .client
            .get(&format!("{}?fields=like_count,comments_count", post_id))?;
        let insights: MediaInsights = self.client.send_json(request, "metrics").await?;
        Ok(Some(PostMetrics {
            likes: insights.like_count.unwrap_or(0),
            comments: insights.comments_count.unwrap_or(0),
            shares: 0,
            views: None,
            fetched_at: chrono::Utc::now().timestamp(),
        }))
    }

    async fn disconnect(&mut self) -> AdapterResult<bool> {
        self.ig_user_id = None;
        Ok(self.client.clear_token())
    }
}
