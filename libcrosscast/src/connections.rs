//! Read-only view of the OAuth subsystem's platform connections
//!
//! The delivery engine never issues, refreshes or mutates credentials; it only
//! asks whether an owner is connected to a platform and with what.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Platform, PlatformConnection};

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// The owner's usable connection to `platform`, if any
    async fn active_connection(
        &self,
        owner_id: &str,
        platform: Platform,
    ) -> Result<Option<PlatformConnection>>;

    /// Every platform the owner currently holds a usable connection for
    async fn active_platforms(&self, owner_id: &str) -> Result<Vec<Platform>>;

    /// Which of `platforms` the owner is *not* connected to, in input order
    async fn missing_platforms(
        &self,
        owner_id: &str,
        platforms: &[Platform],
    ) -> Result<Vec<Platform>> {
        let connected = self.active_platforms(owner_id).await?;
        Ok(platforms
            .iter()
            .filter(|p| !connected.contains(p))
            .copied()
            .collect())
    }
}
