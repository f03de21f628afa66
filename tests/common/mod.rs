//! Shared fixtures for integration tests

#![allow(dead_code)]

use agent_substrate::Store;
use std::future::Future;
use std::time::Duration;
use tempfile::TempDir;

/// A fresh store in a temporary directory
///
/// Keep the returned `TempDir` alive for as long as the store is used.
pub async fn temp_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("agents.db");
    let store = Store::connect(&path.to_string_lossy(), 5)
        .await
        .expect("connect temp store");
    (store, dir)
}

/// Poll `check` until it returns true, failing the test after `limit`
pub async fn wait_for<F, Fut>(limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {:?}",
            limit
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Insert a message row as another writer would, bypassing `Mailbox::send`
pub async fn insert_raw_message(
    store: &Store,
    recipient_id: &str,
    message_type: &str,
    content: &str,
    created_at: i64,
) -> i64 {
    sqlx::query(
        "INSERT INTO agent_messages (sender_id, recipient_id, message_type, content, created_at, is_read) \
         VALUES ('external', ?, ?, ?, ?, 0)",
    )
    .bind(recipient_id)
    .bind(message_type)
    .bind(content)
    .bind(created_at)
    .execute(store.pool())
    .await
    .expect("insert raw message")
    .last_insert_rowid()
}

/// Insert a pending task row as another writer would, bypassing `TaskQueue::create`
pub async fn insert_raw_task(store: &Store, task_id: &str, owner: &str, task_data: &str, priority: i64) {
    sqlx::query(
        "INSERT INTO agent_tasks (task_id, agent_id, status, priority, task_data, created_at) \
         VALUES (?, ?, 'pending', ?, ?, 0)",
    )
    .bind(task_id)
    .bind(owner)
    .bind(priority)
    .bind(task_data)
    .execute(store.pool())
    .await
    .expect("insert raw task");
}
