//! Message store
//!
//! Append-only message log per conversation.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::models::{ConversationId, Message, Participant, UserId};
use crate::db::{parse_timestamp, timestamp};
use crate::error::{Error, Result};

pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        super::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Store a message and return it with the sender resolved for display.
    /// The conversation's `updated_at` moves to the send time.
    pub async fn append(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message> {
        let sent_at = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock before it reads.
        let touched = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(&sent_at)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "Conversation {} not found",
                conversation_id
            )));
        }

        let sender = Participant::find(&mut *tx, sender_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User {} not found", sender_id)))?;

        let result = sqlx::query(
            "INSERT INTO messages (conversation_id, sender_id, content, sent_at) VALUES (?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(&sent_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let message = Message {
            id: result.last_insert_rowid(),
            conversation_id,
            sender,
            content: content.to_string(),
            sent_at: parse_timestamp(&sent_at),
        };

        debug!(
            "[Chat] Message {} appended to conversation {} by {}",
            message.id, conversation_id, sender_id
        );

        Ok(message)
    }

    /// All messages of a conversation in send order. Unknown conversations
    /// have no messages.
    pub async fn list_by_conversation(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let rows: Vec<(i64, i64, i64, String, String, String)> = sqlx::query_as(
            r#"
            SELECT m.id, m.conversation_id, m.sender_id, u.username, m.content, m.sent_at
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            WHERE m.conversation_id = ?
            ORDER BY m.id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, conversation_id, sender_id, username, content, sent_at)| Message {
                    id,
                    conversation_id,
                    sender: Participant {
                        id: sender_id,
                        username,
                    },
                    content,
                    sent_at: parse_timestamp(&sent_at),
                },
            )
            .collect())
    }
}
