//! Conversation store
//!
//! Finds or creates the single conversation between two users and builds
//! per-user inbox summaries.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::models::{Conversation, ConversationId, ConversationSummary, Participant, UserId};
use crate::db::{parse_timestamp, timestamp};
use crate::error::{Error, Result};

type ConversationRow = (i64, i64, String, i64, String, String, String);

const SELECT_CONVERSATION: &str = r#"
    SELECT c.id, c.user_a, ua.username, c.user_b, ub.username, c.created_at, c.updated_at
    FROM conversations c
    JOIN users ua ON ua.id = c.user_a
    JOIN users ub ON ub.id = c.user_b
"#;

fn conversation_from_row(row: ConversationRow) -> Conversation {
    let (id, user_a, name_a, user_b, name_b, created_at, updated_at) = row;
    Conversation {
        id,
        participants: vec![
            Participant {
                id: user_a,
                username: name_a,
            },
            Participant {
                id: user_b,
                username: name_b,
            },
        ],
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    }
}

pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        super::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Return the conversation between `user_a` and `user_b`, creating it on
    /// first contact. Argument order does not matter for the lookup.
    pub async fn find_or_create(&self, user_a: UserId, user_b: UserId) -> Result<Conversation> {
        if user_a == user_b {
            return Err(Error::InvalidRequest(
                "Unable to create a chat with yourself".to_string(),
            ));
        }

        for user_id in [user_a, user_b] {
            if Participant::find(&self.pool, user_id).await?.is_none() {
                return Err(Error::NotFound(format!("User {} not found", user_id)));
            }
        }

        if let Some(existing) = self.find_between(user_a, user_b).await? {
            debug!(
                "[Chat] Reusing conversation {} for {} <-> {}",
                existing.id, user_a, user_b
            );
            return Ok(existing);
        }

        // A concurrent caller may win the insert; the pair index turns ours
        // into a no-op and the re-read below returns the winner's row.
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            "INSERT OR IGNORE INTO conversations (user_a, user_b, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_a)
        .bind(user_b)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let conversation = self.find_between(user_a, user_b).await?.ok_or_else(|| {
            Error::Internal(format!(
                "Conversation between {} and {} missing after insert",
                user_a, user_b
            ))
        })?;

        if result.rows_affected() == 1 {
            info!(
                "[Chat] Conversation {} started: {} <-> {}",
                conversation.id, user_a, user_b
            );
        }

        Ok(conversation)
    }

    async fn find_between(&self, user_a: UserId, user_b: UserId) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "{} WHERE (c.user_a = ? AND c.user_b = ?) OR (c.user_a = ? AND c.user_b = ?)",
            SELECT_CONVERSATION
        ))
        .bind(user_a)
        .bind(user_b)
        .bind(user_b)
        .bind(user_a)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(conversation_from_row))
    }

    /// Get a conversation by id
    pub async fn get(&self, conversation_id: ConversationId) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> =
            sqlx::query_as(&format!("{} WHERE c.id = ?", SELECT_CONVERSATION))
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(conversation_from_row))
    }

    /// Inbox for `user_id`: every conversation they take part in, most
    /// recent activity first.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ConversationSummary>> {
        let rows: Vec<(i64, String, Option<i64>, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT c.id, c.updated_at, u.id, u.username, m.content, m.sent_at
                FROM conversations c
                LEFT JOIN users u
                    ON u.id = CASE WHEN c.user_a = ? THEN c.user_b ELSE c.user_a END
                LEFT JOIN messages m
                    ON m.id = (SELECT MAX(id) FROM messages WHERE conversation_id = c.id)
                WHERE c.user_a = ? OR c.user_b = ?
                ORDER BY COALESCE(m.sent_at, c.updated_at) DESC, c.id DESC
                "#,
            )
            .bind(user_id)
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, updated_at, other_id, other_name, last_content, last_sent_at)| {
                    ConversationSummary {
                        id,
                        other_user: other_id.zip(other_name).map(|(id, username)| Participant {
                            id,
                            username,
                        }),
                        last_message: last_content.unwrap_or_default(),
                        last_date: parse_timestamp(last_sent_at.as_deref().unwrap_or(&updated_at)),
                    }
                },
            )
            .collect())
    }
}
