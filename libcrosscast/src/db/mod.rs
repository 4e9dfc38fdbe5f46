//! Database operations for Crosscast
//!
//! SQLite through sqlx. Every queue transition is a conditional `UPDATE` on
//! the item's current status, committed together with the refresh of the
//! parent post's aggregate, so concurrent pollers can share one file.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::{DbError, Result};
use crate::types::{Product, User};

mod connections;
mod posts;
mod queue;

pub use posts::PostFilter;
pub use queue::{ItemTransition, QueueFilter, QueueStats};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Underlying pool, for tooling that needs raw access
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)")
            .bind(&user.id)
            .bind(&user.email)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn user_exists(&self, user_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(row.is_some())
    }

    pub async fn create_product(&self, product: &Product) -> Result<()> {
        sqlx::query("INSERT INTO products (id, owner_id, title, created_at) VALUES (?, ?, ?, ?)")
            .bind(&product.id)
            .bind(&product.owner_id)
            .bind(&product.title)
            .bind(product.created_at)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_product(&self, product_id: &str) -> Result<Option<Product>> {
        let row: Option<(String, String, String, i64)> = sqlx::query_as(
            "SELECT id, owner_id, title, created_at FROM products WHERE id = ?",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|(id, owner_id, title, created_at)| Product {
            id,
            owner_id,
            title,
            created_at,
        }))
    }
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value).map_err(DbError::Serialization)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw).map_err(DbError::Serialization)?)
}

pub(crate) fn parse_stored<T: FromStr>(kind: &'static str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| {
        DbError::UnknownValue {
            kind,
            value: raw.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrosscastError;
    use tempfile::TempDir;

    async fn setup_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn test_new_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("crosscast.db");

        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        assert!(db_path.exists());
        db.close().await;
    }

    #[tokio::test]
    async fn test_database_initialization_with_invalid_path() {
        #[cfg(unix)]
        let invalid_path = "/dev/null/crosscast/test.db";

        #[cfg(windows)]
        let invalid_path = "C:\\invalid<>path\\test.db";

        let result = Database::new(invalid_path).await;
        assert!(matches!(result, Err(CrosscastError::Database(_))));
    }

    #[tokio::test]
    async fn test_user_and_product_round_trip() {
        let (db, _temp_dir) = setup_db().await;

        let user = User::new("seller@example.com");
        db.create_user(&user).await.unwrap();
        assert!(db.user_exists(&user.id).await.unwrap());
        assert!(!db.user_exists("nobody").await.unwrap());

        let product = Product::new(&user.id, "Denim jacket");
        db.create_product(&product).await.unwrap();

        let fetched = db.get_product(&product.id).await.unwrap().unwrap();
        assert_eq!(fetched.owner_id, user.id);
        assert_eq!(fetched.title, "Denim jacket");
        assert!(db.get_product("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_product_requires_existing_owner() {
        let (db, _temp_dir) = setup_db().await;

        let product = Product::new("ghost-owner", "Orphan");
        let result = db.create_product(&product).await;
        assert!(result.is_err(), "foreign key on products.owner_id should reject");
    }

    #[test]
    fn test_parse_stored_reports_unknown_values() {
        let err = parse_stored::<crate::types::PostStatus>("post status", "archived").unwrap_err();
        assert!(err.to_string().contains("archived"));
    }
}
