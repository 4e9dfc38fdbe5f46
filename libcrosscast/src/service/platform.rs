//! Adapter dispatch
//!
//! [`PlatformService`] is the only place that talks to adapters. It resolves
//! the adapter for a (platform, owner) pair, looks up the owner's credentials,
//! runs validate → authenticate → format → post under per-call timeouts and
//! folds whatever happens (including a panic) into a [`PlatformResult`].
//!
//! API adapters are stateless beyond their token and are built fresh for each
//! call. Browser adapters carry a logged-in session, so one instance per
//! (platform, owner) is cached behind an async mutex: two items for the same
//! pair never drive the same browser at once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::connections::ConnectionStore;
use crate::error::{PlatformError, Result};
use crate::platforms::registry::PlatformRegistry;
use crate::platforms::{AdapterResult, PlatformAdapter};
use crate::types::{
    AdapterFamily, Credentials, Platform, PlatformResult, PostContent, PostMetrics,
    PublishReceipt,
};

type SharedAdapter = Arc<AsyncMutex<Box<dyn PlatformAdapter>>>;

/// Resolves adapters and normalizes their outcomes
#[derive(Clone)]
pub struct PlatformService {
    registry: PlatformRegistry,
    connections: Arc<dyn ConnectionStore>,
    call_timeout: Duration,
    sessions: Arc<Mutex<HashMap<(Platform, String), SharedAdapter>>>,
}

impl PlatformService {
    pub fn new(
        registry: PlatformRegistry,
        connections: Arc<dyn ConnectionStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connections,
            call_timeout,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    /// Publish `content` to `platform` on behalf of `owner_id`
    ///
    /// Never fails: every error, timeout or panic comes back as a `FAILED`
    /// result carrying its error code.
    pub async fn dispatch(
        &self,
        owner_id: &str,
        platform: Platform,
        content: PostContent,
    ) -> PlatformResult {
        let service = self.clone();
        let owner = owner_id.to_string();
        let task =
            tokio::spawn(async move { service.publish(&owner, platform, &content).await });

        match task.await {
            Ok(Ok(receipt)) => {
                info!(platform = %platform, post_id = %receipt.post_id, "Published");
                PlatformResult::success(platform, receipt)
            }
            Ok(Err(e)) => {
                warn!(platform = %platform, code = %e.code(), "Publish failed: {}", e);
                PlatformResult::failure(platform, &e)
            }
            Err(join_error) => {
                let error = PlatformError::Unexpected(format!(
                    "{} adapter aborted: {}",
                    platform, join_error
                ));
                warn!(platform = %platform, "{}", error);
                PlatformResult::failure(platform, &error)
            }
        }
    }

    async fn publish(
        &self,
        owner_id: &str,
        platform: Platform,
        content: &PostContent,
    ) -> AdapterResult<PublishReceipt> {
        let credentials = self.credentials(owner_id, platform).await?;

        match platform.family() {
            AdapterFamily::Api => {
                let mut adapter = self.create(platform)?;
                self.publish_with(adapter.as_mut(), &credentials, content).await
            }
            AdapterFamily::Browser => {
                let slot = self.session_slot(platform, owner_id)?;
                let mut adapter = slot.lock().await;
                self.publish_with(adapter.as_mut(), &credentials, content).await
            }
        }
    }

    async fn publish_with(
        &self,
        adapter: &mut dyn PlatformAdapter,
        credentials: &Credentials,
        content: &PostContent,
    ) -> AdapterResult<PublishReceipt> {
        let platform = adapter.platform();
        self.ensure_authenticated(adapter, credentials).await?;

        let formatted = adapter.format_content(content)?;

        match self
            .timed(platform, "post", adapter.post_content(&formatted))
            .await
        {
            Err(PlatformError::SessionExpired(reason)) => {
                warn!(platform = %platform, "Session expired mid-publish, re-authenticating: {}", reason);
                self.authenticate(adapter, credentials).await?;

                match self
                    .timed(platform, "post", adapter.post_content(&formatted))
                    .await
                {
                    Ok(mut receipt) => {
                        receipt
                            .metadata
                            .insert("reauthenticated".to_string(), true.into());
                        Ok(receipt)
                    }
                    Err(PlatformError::SessionExpired(again)) => {
                        Err(PlatformError::Authentication(format!(
                            "session expired again after re-authentication: {}",
                            again
                        )))
                    }
                    Err(e) => Err(e),
                }
            }
            other => other,
        }
    }

    async fn ensure_authenticated(
        &self,
        adapter: &mut dyn PlatformAdapter,
        credentials: &Credentials,
    ) -> AdapterResult<()> {
        let platform = adapter.platform();
        let valid = match self
            .timed(platform, "validate", adapter.validate_connection())
            .await
        {
            Ok(valid) => valid,
            Err(e) => {
                debug!(platform = %platform, "Connection check failed, re-authenticating: {}", e);
                false
            }
        };

        if valid {
            return Ok(());
        }
        self.authenticate(adapter, credentials).await
    }

    async fn authenticate(
        &self,
        adapter: &mut dyn PlatformAdapter,
        credentials: &Credentials,
    ) -> AdapterResult<()> {
        let platform = adapter.platform();
        if self
            .timed(platform, "authenticate", adapter.authenticate(credentials))
            .await?
        {
            Ok(())
        } else {
            Err(PlatformError::Authentication(format!(
                "{} rejected the stored credentials",
                platform
            )))
        }
    }

    async fn timed<T>(
        &self,
        platform: Platform,
        stage: &str,
        call: impl Future<Output = AdapterResult<T>>,
    ) -> AdapterResult<T> {
        timeout(self.call_timeout, call).await.map_err(|_| {
            PlatformError::Timeout(format!(
                "{} {} took longer than {}s",
                platform,
                stage,
                self.call_timeout.as_secs_f32()
            ))
        })?
    }

    async fn credentials(&self, owner_id: &str, platform: Platform) -> AdapterResult<Credentials> {
        let connection = self
            .connections
            .active_connection(owner_id, platform)
            .await
            .map_err(|e| {
                PlatformError::Unexpected(format!("connection lookup failed: {}", e))
            })?
            .ok_or_else(|| {
                PlatformError::NotConnected(format!("no active {} connection", platform))
            })?;
        Ok(connection.credentials)
    }

    fn create(&self, platform: Platform) -> AdapterResult<Box<dyn PlatformAdapter>> {
        self.registry.create(platform).ok_or_else(|| {
            PlatformError::NotSupported(format!("no adapter registered for {}", platform))
        })
    }

    fn session_slot(&self, platform: Platform, owner_id: &str) -> AdapterResult<SharedAdapter> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| PlatformError::Unexpected("session cache poisoned".to_string()))?;

        let key = (platform, owner_id.to_string());
        if let Some(slot) = sessions.get(&key) {
            return Ok(Arc::clone(slot));
        }

        let slot: SharedAdapter = Arc::new(AsyncMutex::new(self.create(platform)?));
        sessions.insert(key, Arc::clone(&slot));
        Ok(slot)
    }

    /// Engagement numbers for a post already published to `platform`
    pub async fn get_post_metrics(
        &self,
        owner_id: &str,
        platform: Platform,
        platform_post_id: &str,
    ) -> Result<Option<PostMetrics>> {
        let credentials = self.credentials(owner_id, platform).await?;

        let metrics = match platform.family() {
            AdapterFamily::Api => {
                let mut adapter = self.create(platform)?;
                self.ensure_authenticated(adapter.as_mut(), &credentials)
                    .await?;
                self.timed(platform, "metrics", adapter.get_post_metrics(platform_post_id))
                    .await?
            }
            AdapterFamily::Browser => {
                let slot = self.session_slot(platform, owner_id)?;
                let mut adapter = slot.lock().await;
                self.ensure_authenticated(adapter.as_mut(), &credentials)
                    .await?;
                self.timed(platform, "metrics", adapter.get_post_metrics(platform_post_id))
                    .await?
            }
        };
        Ok(metrics)
    }

    /// Close the cached browser session for (platform, owner)
    ///
    /// Returns `false` when nothing was open.
    pub async fn disconnect(&self, owner_id: &str, platform: Platform) -> Result<bool> {
        let slot = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&(platform, owner_id.to_string())),
            Err(_) => return Err(PlatformError::Unexpected("session cache poisoned".into()).into()),
        };

        let Some(slot) = slot else {
            return Ok(false);
        };
        let mut adapter = slot.lock().await;
        Ok(self
            .timed(platform, "disconnect", adapter.disconnect())
            .await?)
    }

    /// Close every cached session; returns how many were open
    pub async fn disconnect_all(&self) -> usize {
        let slots: Vec<((Platform, String), SharedAdapter)> = match self.sessions.lock() {
            Ok(mut sessions) => sessions.drain().collect(),
            Err(_) => {
                warn!("Session cache poisoned, skipping disconnect");
                return 0;
            }
        };

        let mut closed = 0;
        for ((platform, owner_id), slot) in slots {
            let mut adapter = slot.lock().await;
            match self
                .timed(platform, "disconnect", adapter.disconnect())
                .await
            {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => warn!(platform = %platform, owner_id = %owner_id, "Disconnect failed: {}", e),
            }
        }
        closed
    }
}
