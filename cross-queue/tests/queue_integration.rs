//! Integration tests for cross-queue commands

use assert_cmd::Command;
use libcrosscast::types::{NewPost, User};
use libcrosscast::{Database, Platform, Post, PostStatus, QueueItem, QueueItemStatus};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

struct TestEnv {
    _temp_dir: TempDir,
    config_path: String,
    db_path: String,
    owner_id: String,
}

/// Config file, an initialized database and one owner
async fn setup_test_env() -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("crosscast.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[queue]
batch_size = 10
"#,
        escape_path_for_toml(&db_path.to_string_lossy())
    );
    fs::write(&config_path, config_content).unwrap();

    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    let user = User::new("queue-owner@example.com");
    db.create_user(&user).await.unwrap();
    db.close().await;

    TestEnv {
        _temp_dir: temp_dir,
        config_path: config_path.to_string_lossy().to_string(),
        db_path: db_path.to_string_lossy().to_string(),
        owner_id: user.id,
    }
}

/// Queue one item per platform for a new post, all in `status`
async fn seed_post(
    env: &TestEnv,
    platforms: &[Platform],
    status: QueueItemStatus,
    scheduled_at: i64,
    retry_count: u32,
) -> String {
    let db = Database::new(&env.db_path).await.unwrap();
    let now = chrono::Utc::now().timestamp();

    let post = Post::from_request(
        &env.owner_id,
        NewPost {
            title: "Mid-century chair".to_string(),
            description: "Walnut, light wear".to_string(),
            target_platforms: platforms.to_vec(),
            ..Default::default()
        },
        5,
        3,
    );
    db.create_post(&post).await.unwrap();

    let items: Vec<QueueItem> = platforms
        .iter()
        .map(|p| {
            let mut item = QueueItem::new(&post, *p, status, scheduled_at);
            item.retry_count = retry_count;
            if status.is_terminal() {
                item.completed_at = Some(now);
                item.error_message = Some("Network error: connection reset".to_string());
            }
            item
        })
        .collect();
    db.enqueue(&post.id, &items, Some(scheduled_at), platforms, now)
        .await
        .unwrap();
    db.close().await;

    post.id
}

fn cross_queue(env: &TestEnv) -> Command {
    let mut cmd = Command::cargo_bin("cross-queue").unwrap();
    cmd.env("CROSSCAST_CONFIG", &env.config_path)
        .env("CROSSCAST_DB_PATH", &env.db_path)
        .env_remove("CROSSCAST_OWNER");
    cmd
}

// STATUS

#[tokio::test]
async fn test_status_lists_owner_items() {
    let env = setup_test_env().await;
    let later = chrono::Utc::now().timestamp() + 7200;
    let post_id = seed_post(
        &env,
        &[Platform::Facebook, Platform::Poshmark],
        QueueItemStatus::Pending,
        later,
        0,
    )
    .await;

    cross_queue(&env)
        .args(["--owner", &env.owner_id, "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains(post_id.as_str()))
        .stdout(predicate::str::contains("facebook"))
        .stdout(predicate::str::contains("poshmark"))
        .stdout(predicate::str::contains("due in"));
}

#[tokio::test]
async fn test_status_json_with_filter() {
    let env = setup_test_env().await;
    let now = chrono::Utc::now().timestamp();
    seed_post(&env, &[Platform::Pinterest], QueueItemStatus::Pending, now + 600, 0).await;
    seed_post(&env, &[Platform::Mercari], QueueItemStatus::Failed, now, 1).await;

    let output = cross_queue(&env)
        .args(["--owner", &env.owner_id, "status", "--status", "failed", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let items = json["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["platform"], "mercari");
    assert_eq!(items[0]["status"], "failed");
    assert_eq!(json["stats"]["pending"], 1);
    assert_eq!(json["stats"]["failed"], 1);
}

#[tokio::test]
async fn test_status_rejects_unknown_platform() {
    let env = setup_test_env().await;

    cross_queue(&env)
        .args(["status", "--platform", "myspace"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Unknown platform"));
}

// STATS

#[tokio::test]
async fn test_stats_empty_queue() {
    let env = setup_test_env().await;

    cross_queue(&env)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Queue Statistics"))
        .stdout(predicate::str::contains("Total:      0"));
}

#[tokio::test]
async fn test_stats_json() {
    let env = setup_test_env().await;
    let now = chrono::Utc::now().timestamp();
    seed_post(
        &env,
        &[Platform::Facebook, Platform::Instagram],
        QueueItemStatus::Pending,
        now + 600,
        0,
    )
    .await;

    let output = cross_queue(&env)
        .args(["stats", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["pending"], 2);
    assert_eq!(json["total"], 2);
}

// RETRY

#[tokio::test]
async fn test_retry_requires_owner() {
    let env = setup_test_env().await;

    cross_queue(&env)
        .arg("retry")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("--owner"));
}

#[tokio::test]
async fn test_retry_requeues_failed_items_with_budget() {
    let env = setup_test_env().await;
    let now = chrono::Utc::now().timestamp();
    let retryable = seed_post(&env, &[Platform::Facebook], QueueItemStatus::Failed, now, 1).await;
    seed_post(&env, &[Platform::Pinterest], QueueItemStatus::Failed, now, 3).await;

    cross_queue(&env)
        .args(["--owner", &env.owner_id, "retry"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Re-queued 1 item"));

    let db = Database::new(&env.db_path).await.unwrap();
    let items = db.items_for_post(&retryable).await.unwrap();
    assert_eq!(items[0].status, QueueItemStatus::Pending);
    assert_eq!(items[0].retry_count, 2);
}

#[tokio::test]
async fn test_retry_unknown_owner() {
    let env = setup_test_env().await;

    cross_queue(&env)
        .args(["--owner", "nobody", "retry"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Not found"));
}

// UNSCHEDULE

#[tokio::test]
async fn test_unschedule_returns_post_to_draft() {
    let env = setup_test_env().await;
    let later = chrono::Utc::now().timestamp() + 3600;
    let post_id = seed_post(&env, &[Platform::Facebook], QueueItemStatus::Pending, later, 0).await;

    cross_queue(&env)
        .args(["--owner", &env.owner_id, "unschedule", &post_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("draft"));

    let db = Database::new(&env.db_path).await.unwrap();
    let post = db.get_post(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Draft);
    assert_eq!(post.scheduled_at, None);
}

#[tokio::test]
async fn test_unschedule_nothing_pending_conflicts() {
    let env = setup_test_env().await;
    let now = chrono::Utc::now().timestamp();
    let post_id = seed_post(&env, &[Platform::Facebook], QueueItemStatus::Failed, now, 3).await;

    cross_queue(&env)
        .args(["--owner", &env.owner_id, "unschedule", &post_id])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Conflict"));
}

// PROCESS

#[tokio::test]
async fn test_process_without_connection_fails_items() {
    let env = setup_test_env().await;
    let now = chrono::Utc::now().timestamp();
    let post_id = seed_post(&env, &[Platform::Instagram], QueueItemStatus::Pending, now - 5, 0).await;

    let output = cross_queue(&env)
        .args(["process", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["failed"], 1);
    assert_eq!(json["completed"], 0);

    let db = Database::new(&env.db_path).await.unwrap();
    let post = db.get_post(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Failed);
}
