//! Post rows

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_json, parse_stored, to_json, Database};
use crate::error::{DbError, Result};
use crate::types::{Platform, Post, PostStatus};

/// Filters for [`Database::list_posts`]
#[derive(Debug, Clone)]
pub struct PostFilter {
    pub status: Option<PostStatus>,
    pub platform: Option<Platform>,
    /// Inclusive lower bound on `created_at`
    pub since: Option<i64>,
    /// Inclusive upper bound on `created_at`
    pub until: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for PostFilter {
    fn default() -> Self {
        Self {
            status: None,
            platform: None,
            since: None,
            until: None,
            limit: 50,
            offset: 0,
        }
    }
}

const POST_COLUMNS: &str = r#"
    id, owner_id, product_id, title, description, hashtags, images, target_platforms,
    platform_content, scheduled_at, published_at, status, results, priority,
    retry_count, max_retries, last_error, created_at, updated_at
"#;

impl Database {
    /// Create a new post
    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (
                id, owner_id, product_id, title, description, hashtags, images,
                target_platforms, platform_content, scheduled_at, published_at, status,
                results, priority, retry_count, max_retries, last_error, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.owner_id)
        .bind(&post.product_id)
        .bind(&post.title)
        .bind(&post.description)
        .bind(to_json(&post.hashtags)?)
        .bind(to_json(&post.images)?)
        .bind(to_json(&post.target_platforms)?)
        .bind(to_json(&post.platform_content)?)
        .bind(post.scheduled_at)
        .bind(post.published_at)
        .bind(post.status.as_str())
        .bind(to_json(&post.results)?)
        .bind(i64::from(post.priority))
        .bind(i64::from(post.retry_count))
        .bind(i64::from(post.max_retries))
        .bind(&post.last_error)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a post by ID
    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let query = format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS);
        let row = sqlx::query(&query)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// Owner's posts, newest first
    pub async fn list_posts(&self, owner_id: &str, filter: &PostFilter) -> Result<Vec<Post>> {
        let mut where_clauses = vec!["owner_id = ?"];

        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        if filter.platform.is_some() {
            where_clauses
                .push("EXISTS (SELECT 1 FROM json_each(posts.target_platforms) WHERE json_each.value = ?)");
        }
        if filter.since.is_some() {
            where_clauses.push("created_at >= ?");
        }
        if filter.until.is_some() {
            where_clauses.push("created_at <= ?");
        }

        let query_str = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
            POST_COLUMNS,
            where_clauses.join(" AND ")
        );

        // Bind parameters in the same order as WHERE clauses
        let mut query = sqlx::query(&query_str).bind(owner_id);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(platform) = filter.platform {
            query = query.bind(platform.as_str());
        }
        if let Some(since) = filter.since {
            query = query.bind(since);
        }
        if let Some(until) = filter.until {
            query = query.bind(until);
        }
        query = query.bind(filter.limit.max(0)).bind(filter.offset.max(0));

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Delete a post and its queue items unless one of them is mid-flight
    ///
    /// Returns `false` (and deletes nothing) while any item is `processing`.
    pub async fn delete_post_if_idle(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM posts
            WHERE id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM queue_items WHERE post_id = ? AND status = 'processing'
              )
            "#,
        )
        .bind(post_id)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Number of the post's items currently claimed by a worker
    pub async fn count_in_flight(&self, post_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM queue_items WHERE post_id = ? AND status = 'processing'",
        )
        .bind(post_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(count)
    }
}

pub(super) fn post_from_row(row: &SqliteRow) -> Result<Post> {
    Ok(Post {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        product_id: row.get("product_id"),
        title: row.get("title"),
        description: row.get("description"),
        hashtags: from_json(&row.get::<String, _>("hashtags"))?,
        images: from_json(&row.get::<String, _>("images"))?,
        target_platforms: from_json(&row.get::<String, _>("target_platforms"))?,
        platform_content: from_json(&row.get::<String, _>("platform_content"))?,
        scheduled_at: row.get("scheduled_at"),
        published_at: row.get("published_at"),
        status: parse_stored("post status", &row.get::<String, _>("status"))?,
        results: from_json(&row.get::<String, _>("results"))?,
        priority: row.get::<i64, _>("priority").clamp(0, 10) as u8,
        retry_count: row.get::<i64, _>("retry_count").max(0) as u32,
        max_retries: row.get::<i64, _>("max_retries").max(0) as u32,
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewPost, User};
    use tempfile::TempDir;

    async fn setup() -> (Database, String, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        let user = User::new("owner@example.com");
        db.create_user(&user).await.unwrap();
        (db, user.id, temp_dir)
    }

    fn post(owner: &str, title: &str, platforms: Vec<Platform>) -> Post {
        Post::from_request(
            owner,
            NewPost {
                title: title.to_string(),
                description: "Description".to_string(),
                hashtags: vec!["tag".to_string()],
                images: vec!["https://cdn.example.com/1.jpg".to_string()],
                target_platforms: platforms,
                ..Default::default()
            },
            5,
            3,
        )
    }

    #[tokio::test]
    async fn test_create_and_retrieve_post() {
        let (db, owner, _temp_dir) = setup().await;
        let post = post(&owner, "Jacket", vec![Platform::Facebook, Platform::Mercari]);
        db.create_post(&post).await.unwrap();

        let fetched = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Jacket");
        assert_eq!(
            fetched.target_platforms,
            vec![Platform::Facebook, Platform::Mercari]
        );
        assert_eq!(fetched.hashtags, vec!["tag"]);
        assert_eq!(fetched.status, PostStatus::Draft);
        assert!(fetched.results.is_empty());
    }

    #[tokio::test]
    async fn test_get_nonexistent_post_returns_none() {
        let (db, _owner, _temp_dir) = setup().await;
        assert!(db.get_post("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_posts_filters_by_platform_and_status() {
        let (db, owner, _temp_dir) = setup().await;
        let a = post(&owner, "A", vec![Platform::Facebook]);
        let b = post(&owner, "B", vec![Platform::Instagram, Platform::Facebook]);
        let mut c = post(&owner, "C", vec![Platform::Mercari]);
        c.status = PostStatus::Failed;
        for p in [&a, &b, &c] {
            db.create_post(p).await.unwrap();
        }

        let facebook = db
            .list_posts(
                &owner,
                &PostFilter {
                    platform: Some(Platform::Facebook),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(facebook.len(), 2);
        assert!(facebook.iter().all(|p| p.target_platforms.contains(&Platform::Facebook)));

        let failed = db
            .list_posts(
                &owner,
                &PostFilter {
                    status: Some(PostStatus::Failed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, c.id);
    }

    #[tokio::test]
    async fn test_list_posts_date_range_and_pagination() {
        let (db, owner, _temp_dir) = setup().await;
        let now = chrono::Utc::now().timestamp();
        for (i, age) in [0_i64, 3600, 7200].iter().enumerate() {
            let mut p = post(&owner, &format!("P{}", i), vec![Platform::Facebook]);
            p.created_at = now - age;
            db.create_post(&p).await.unwrap();
        }

        let recent = db
            .list_posts(
                &owner,
                &PostFilter {
                    since: Some(now - 4000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].title, "P0");

        let page = db
            .list_posts(
                &owner,
                &PostFilter {
                    limit: 1,
                    offset: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "P1");
    }

    #[tokio::test]
    async fn test_list_posts_is_scoped_to_owner() {
        let (db, owner, _temp_dir) = setup().await;
        let other = User::new("other@example.com");
        db.create_user(&other).await.unwrap();
        db.create_post(&post(&other.id, "Theirs", vec![Platform::Facebook]))
            .await
            .unwrap();

        let mine = db.list_posts(&owner, &PostFilter::default()).await.unwrap();
        assert!(mine.is_empty());
    }

    #[tokio::test]
    async fn test_delete_idle_post() {
        let (db, owner, _temp_dir) = setup().await;
        let p = post(&owner, "Gone", vec![Platform::Facebook]);
        db.create_post(&p).await.unwrap();

        assert!(db.delete_post_if_idle(&p.id).await.unwrap());
        assert!(db.get_post(&p.id).await.unwrap().is_none());
        assert!(!db.delete_post_if_idle(&p.id).await.unwrap());
    }
}
