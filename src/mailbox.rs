//! Mailbox
//!
//! Point-to-point messages between agents, persisted as an append-only log.
//! Delivery is at-most-once: `receive` marks what it returns as read in the
//! same statement that selects it, so a crash after `receive` loses those
//! messages instead of redelivering them.

use crate::error::{Result, SubstrateError};
use crate::models::{Message, MessageRow, STORE_NOW_MILLIS};
use crate::store::Store;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

/// Persisted point-to-point message delivery
#[derive(Debug, Clone)]
pub struct Mailbox {
    pool: SqlitePool,
}

impl Mailbox {
    /// Create a mailbox handle on the shared store
    pub fn new(store: &Store) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }

    /// Send a message and return its generated id
    pub async fn send(
        &self,
        sender_id: &str,
        recipient_id: &str,
        message_type: &str,
        payload: &Value,
    ) -> Result<i64> {
        let content = serde_json::to_string(payload)?;

        let outcome = sqlx::query(&format!(
            "INSERT INTO agent_messages (sender_id, recipient_id, message_type, content, created_at, is_read) \
             VALUES (?, ?, ?, ?, {STORE_NOW_MILLIS}, 0)"
        ))
        .bind(sender_id)
        .bind(recipient_id)
        .bind(message_type)
        .bind(&content)
        .execute(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("send message", e))?;

        let message_id = outcome.last_insert_rowid();
        info!(
            sender_id = %sender_id,
            recipient_id = %recipient_id,
            message_type = %message_type,
            message_id = message_id,
            "Message sent"
        );
        Ok(message_id)
    }

    /// Receive every unread message addressed to `agent_id`, oldest first
    ///
    /// With `mark_as_read`, exactly the returned messages are flipped to read
    /// inside one transaction, so no sequential caller sees them again.
    /// A stored payload that is not JSON does not fail the batch: that
    /// message comes back with its raw text and `payload_error` set.
    pub async fn receive(&self, agent_id: &str, mark_as_read: bool) -> Result<Vec<Message>> {
        let mut rows = if mark_as_read {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| SubstrateError::store("begin receive transaction", e))?;

            let rows = sqlx::query_as::<_, MessageRow>(
                "UPDATE agent_messages SET is_read = 1 WHERE recipient_id = ? AND is_read = 0 \
                 RETURNING id, sender_id, recipient_id, message_type, content, created_at, is_read",
            )
            .bind(agent_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| SubstrateError::store("claim unread messages", e))?;

            tx.commit()
                .await
                .map_err(|e| SubstrateError::store("commit receive transaction", e))?;
            rows
        } else {
            sqlx::query_as::<_, MessageRow>(
                "SELECT id, sender_id, recipient_id, message_type, content, created_at, is_read \
                 FROM agent_messages WHERE recipient_id = ? AND is_read = 0",
            )
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubstrateError::store("peek unread messages", e))?
        };

        // RETURNING gives no ordering guarantee
        rows.sort_by_key(|row| (row.created_at, row.id));

        if !rows.is_empty() {
            debug!(
                agent_id = %agent_id,
                count = rows.len(),
                marked_read = mark_as_read,
                "Received messages"
            );
        }

        let messages: Vec<Message> = rows
            .into_iter()
            .map(Message::from)
            .inspect(|message| {
                if let Some(error) = &message.payload_error {
                    warn!(
                        agent_id = %agent_id,
                        message_id = message.id,
                        message_type = %message.message_type,
                        error = %error,
                        "Message payload is not valid JSON"
                    );
                }
            })
            .collect();
        Ok(messages)
    }

    /// Number of unread messages waiting for `agent_id`
    pub async fn unread_count(&self, agent_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM agent_messages WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("count unread messages", e))?;

        Ok(count)
    }
}
