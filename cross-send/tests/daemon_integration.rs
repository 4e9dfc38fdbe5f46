//! Integration tests for the cross-send daemon

use assert_cmd::Command;
use libcrosscast::error::ErrorCode;
use libcrosscast::types::{NewPost, User};
use libcrosscast::{Database, Platform, Post, PostStatus, QueueItem, QueueItemStatus};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Setup test environment with config and database
async fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[queue]
poll_interval_secs = 1
batch_size = 10
concurrency = 2
max_retries = 3
base_delay_secs = 1
max_delay_secs = 10
"#,
        db_path.display().to_string().replace('\\', "/")
    );

    fs::write(&config_path, config_content).unwrap();

    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    db.close().await;

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

/// Queue one item for `platform` that is already due; the owner has no connections
async fn create_due_item(db_path: &str, platform: Platform) -> String {
    let db = Database::new(db_path).await.unwrap();
    let now = chrono::Utc::now().timestamp();

    let user = User::new(&format!("{}@example.com", platform));
    db.create_user(&user).await.unwrap();

    let post = Post::from_request(
        &user.id,
        NewPost {
            title: "Vintage lamp".to_string(),
            description: "Brass, works fine".to_string(),
            target_platforms: vec![platform],
            ..Default::default()
        },
        5,
        3,
    );
    db.create_post(&post).await.unwrap();

    let item = QueueItem::new(&post, platform, QueueItemStatus::Pending, now - 10);
    db.enqueue(&post.id, &[item], Some(now - 10), &[platform], now)
        .await
        .unwrap();
    db.close().await;

    post.id
}

fn cross_send(config_path: &str, db_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("cross-send").unwrap();
    cmd.env("CROSSCAST_CONFIG", config_path)
        .env("CROSSCAST_DB_PATH", db_path)
        .env_remove("RUST_LOG");
    cmd
}

// BASIC FUNCTIONALITY TESTS

#[tokio::test]
async fn test_once_with_empty_queue() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;

    cross_send(&config_path, &db_path)
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("processed queue once, exiting"));
}

#[tokio::test]
async fn test_requires_valid_config() {
    let temp_dir = TempDir::new().unwrap();
    let invalid_config = temp_dir.path().join("invalid.toml");
    let db_path = temp_dir.path().join("test.db");

    fs::write(&invalid_config, "invalid toml content [[[").unwrap();

    cross_send(invalid_config.to_str().unwrap(), db_path.to_str().unwrap())
        .arg("--once")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[tokio::test]
async fn test_rejects_zero_batch_size() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;

    cross_send(&config_path, &db_path)
        .arg("--once")
        .arg("--batch-size")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("queue.batch_size"));
}

#[test]
fn test_help_lists_flags() {
    Command::cargo_bin("cross-send")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--once"))
        .stdout(predicate::str::contains("--poll-interval"));
}

// QUEUE PROCESSING TESTS

#[tokio::test]
async fn test_missing_connection_fails_item_without_retry() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_due_item(&db_path, Platform::Facebook).await;

    cross_send(&config_path, &db_path)
        .arg("--once")
        .assert()
        .success();

    let db = Database::new(&db_path).await.unwrap();
    let items = db.items_for_post(&post_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, QueueItemStatus::Failed);
    let result = items[0].result.as_ref().unwrap();
    assert_eq!(result.error_code, Some(ErrorCode::NotConnected));

    let post = db.get_post(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Failed);
}

#[tokio::test]
async fn test_processes_multiple_due_items() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;

    let mut post_ids = Vec::new();
    for platform in [Platform::Facebook, Platform::Pinterest, Platform::Instagram] {
        post_ids.push(create_due_item(&db_path, platform).await);
    }

    cross_send(&config_path, &db_path)
        .arg("--once")
        .assert()
        .success();

    let db = Database::new(&db_path).await.unwrap();
    for post_id in &post_ids {
        let items = db.items_for_post(post_id).await.unwrap();
        assert!(items.iter().all(|i| i.status == QueueItemStatus::Failed));
    }
    assert_eq!(db.queue_stats(None).await.unwrap().failed, 3);
}
