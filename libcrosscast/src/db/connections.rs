//! Platform connection lookups
//!
//! `save_connection` exists for provisioning tools and tests; the engine
//! itself only goes through [`ConnectionStore`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::Row;

use super::{parse_stored, Database};
use crate::connections::ConnectionStore;
use crate::error::{DbError, Result};
use crate::types::{Credentials, Platform, PlatformConnection};

impl Database {
    /// Insert or replace an owner's connection to a platform
    pub async fn save_connection(&self, connection: &PlatformConnection) -> Result<()> {
        let credentials = &connection.credentials;
        sqlx::query(
            r#"
            INSERT INTO platform_connections
                (owner_id, platform, account_id, access_token, username, password, active, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, platform) DO UPDATE SET
                account_id = excluded.account_id,
                access_token = excluded.access_token,
                username = excluded.username,
                password = excluded.password,
                active = excluded.active,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&connection.owner_id)
        .bind(connection.platform.as_str())
        .bind(&credentials.account_id)
        .bind(credentials.access_token.as_ref().map(|t| t.expose_secret().to_string()))
        .bind(&credentials.username)
        .bind(credentials.password.as_ref().map(|p| p.expose_secret().to_string()))
        .bind(connection.active)
        .bind(connection.expires_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for Database {
    async fn active_connection(
        &self,
        owner_id: &str,
        platform: Platform,
    ) -> Result<Option<PlatformConnection>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, platform, account_id, access_token, username, password, active, expires_at
            FROM platform_connections
            WHERE owner_id = ? AND platform = ?
            "#,
        )
        .bind(owner_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let connection = PlatformConnection {
            owner_id: row.get("owner_id"),
            platform: parse_stored("platform", &row.get::<String, _>("platform"))?,
            credentials: Credentials {
                account_id: row.get("account_id"),
                access_token: row
                    .get::<Option<String>, _>("access_token")
                    .map(SecretString::from),
                username: row.get("username"),
                password: row
                    .get::<Option<String>, _>("password")
                    .map(SecretString::from),
            },
            active: row.get::<bool, _>("active"),
            expires_at: row.get("expires_at"),
        };

        let now = chrono::Utc::now().timestamp();
        Ok(connection.is_usable(now).then_some(connection))
    }

    async fn active_platforms(&self, owner_id: &str) -> Result<Vec<Platform>> {
        let now = chrono::Utc::now().timestamp();
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT platform FROM platform_connections
            WHERE owner_id = ? AND active = 1 AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY platform
            "#,
        )
        .bind(owner_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|(platform,)| parse_stored("platform", platform))
            .collect()
    }
}
