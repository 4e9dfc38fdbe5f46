//! Mock adapter for testing
//!
//! Scripts outcomes per `post_content` call, simulates latency and panics,
//! and records every call in counters shared across clones,
//! so a registry factory can hand out fresh adapters while a test still
//! observes all of them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::{AdapterResult, ContentLimits, PlatformAdapter};
use crate::error::PlatformError;
use crate::types::{Credentials, Platform, PostContent, PostMetrics, PublishReceipt};

/// What one `post_content` call does
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Success,
    Fail(PlatformError),
    Panic,
}

/// Configuration for mock adapter behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: Platform,
    /// Prefix of generated post ids (`fb` gives `fb_1`, `fb_2`, ...)
    pub id_prefix: String,
    pub limits: ContentLimits,
    pub auth_succeeds: bool,
    /// Consumed front to back, one per post call
    pub script: Arc<Mutex<VecDeque<MockOutcome>>>,
    /// Used once the script runs out
    pub fallback: MockOutcome,
    /// Latency added to every post call
    pub delay: Duration,
    pub auth_call_count: Arc<Mutex<usize>>,
    pub post_call_count: Arc<Mutex<usize>>,
    pub disconnect_call_count: Arc<Mutex<usize>>,
    pub posted_content: Arc<Mutex<Vec<PostContent>>>,
    /// Post calls currently running, and the most seen at once
    pub in_flight: Arc<Mutex<usize>>,
    pub max_in_flight: Arc<Mutex<usize>>,
}

impl MockConfig {
    pub fn new(platform: Platform, id_prefix: &str) -> Self {
        Self {
            platform,
            id_prefix: id_prefix.to_string(),
            limits: ContentLimits {
                title_max: 500,
                description_max: 10_000,
                max_hashtags: 50,
                max_images: 20,
                requires_image: false,
            },
            auth_succeeds: true,
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: MockOutcome::Success,
            delay: Duration::ZERO,
            auth_call_count: Arc::new(Mutex::new(0)),
            post_call_count: Arc::new(Mutex::new(0)),
            disconnect_call_count: Arc::new(Mutex::new(0)),
            posted_content: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(Mutex::new(0)),
            max_in_flight: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_script(self, outcomes: Vec<MockOutcome>) -> Self {
        *self.script.lock().unwrap() = outcomes.into();
        self
    }

    pub fn with_fallback(mut self, outcome: MockOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn rejecting_credentials(mut self) -> Self {
        self.auth_succeeds = false;
        self
    }

    pub fn auth_calls(&self) -> usize {
        *self.auth_call_count.lock().unwrap()
    }

    pub fn post_calls(&self) -> usize {
        *self.post_call_count.lock().unwrap()
    }

    pub fn disconnect_calls(&self) -> usize {
        *self.disconnect_call_count.lock().unwrap()
    }

    /// Highest number of post calls that overlapped
    pub fn max_concurrent_posts(&self) -> usize {
        *self.max_in_flight.lock().unwrap()
    }

    pub fn posted(&self) -> Vec<PostContent> {
        self.posted_content.lock().unwrap().clone()
    }

    /// Factory for [`PlatformRegistry::register`](super::registry::PlatformRegistry::register)
    pub fn factory(&self) -> impl Fn() -> Box<dyn PlatformAdapter> + Send + Sync + 'static {
        let config = self.clone();
        move || Box::new(MockAdapter::new(config.clone()))
    }
}

/// Counts one running post call until dropped, including when a timeout
/// cancels the call
struct InFlight<'a>(&'a Mutex<usize>);

impl<'a> InFlight<'a> {
    fn enter(config: &'a MockConfig) -> Self {
        let mut running = config.in_flight.lock().unwrap();
        *running += 1;
        let mut max = config.max_in_flight.lock().unwrap();
        *max = (*max).max(*running);
        InFlight(&config.in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.0.lock() {
            *running -= 1;
        }
    }
}

/// Mock adapter for testing
pub struct MockAdapter {
    config: MockConfig,
    authenticated: bool,
}

impl MockAdapter {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            authenticated: false,
        }
    }

    /// Always publishes
    pub fn success(platform: Platform, id_prefix: &str) -> Self {
        Self::new(MockConfig::new(platform, id_prefix))
    }

    /// Always fails with `error`
    pub fn failing(platform: Platform, error: PlatformError) -> Self {
        Self::new(MockConfig::new(platform, "mock").with_fallback(MockOutcome::Fail(error)))
    }

    fn next_outcome(&self) -> MockOutcome {
        self.config
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.config.fallback.clone())
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.config.platform
    }

    fn limits(&self) -> ContentLimits {
        self.config.limits
    }

    async fn authenticate(&mut self, _credentials: &Credentials) -> AdapterResult<bool> {
        *self.config.auth_call_count.lock().unwrap() += 1;
        self.authenticated = self.config.auth_succeeds;
        Ok(self.authenticated)
    }

    async fn validate_connection(&mut self) -> AdapterResult<bool> {
        Ok(self.authenticated)
    }

    async fn post_content(&self, content: &PostContent) -> AdapterResult<PublishReceipt> {
        let call = {
            let mut count = self.config.post_call_count.lock().unwrap();
            *count += 1;
            *count
        };

        if !self.authenticated {
            return Err(PlatformError::Authentication("Not authenticated".to_string()));
        }

        let _running = InFlight::enter(&self.config);
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        match self.next_outcome() {
            MockOutcome::Success => {
                self.config
                    .posted_content
                    .lock()
                    .unwrap()
                    .push(content.clone());
                let post_id = format!("{}_{}", self.config.id_prefix, call);
                Ok(PublishReceipt {
                    url: Some(format!("https://mock.example/{}", post_id)),
                    post_id,
                    published_at: Some(chrono::Utc::now().timestamp()),
                    metadata: serde_json::Map::new(),
                })
            }
            MockOutcome::Fail(error) => Err(error),
            MockOutcome::Panic => panic!("mock adapter for {} panicked", self.config.platform),
        }
    }

    async fn get_post_metrics(&self, _post_id: &str) -> AdapterResult<Option<PostMetrics>> {
        Ok(Some(PostMetrics {
            likes: 1,
            comments: 0,
            shares: 0,
            views: None,
            fetched_at: chrono::Utc::now().timestamp(),
        }))
    }

    async fn disconnect(&mut self) -> AdapterResult<bool> {
        *self.config.disconnect_call_count.lock().unwrap() += 1;
        let was = self.authenticated;
        self.authenticated = false;
        Ok(was)
    }
}
