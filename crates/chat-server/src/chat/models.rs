use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;

use crate::error::Result;

pub type UserId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;

/// Display form of a user reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    pub username: String,
}

impl Participant {
    /// Resolve a user reference, `None` if it does not exist
    pub(crate) async fn find<'e, E>(executor: E, id: UserId) -> Result<Option<Self>>
    where
        E: SqliteExecutor<'e>,
    {
        let row: Option<(i64, String)> = sqlx::query_as("SELECT id, username FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(row.map(|(id, username)| Self { id, username }))
    }
}

/// A persistent two-party thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    /// Always two entries, in the order the conversation was started with
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single message. Never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: Participant,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Inbox entry for one conversation, seen from one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub other_user: Option<Participant>,
    /// Empty when no message was sent yet
    pub last_message: String,
    pub last_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_camel_case() {
        let message = Message {
            id: 1,
            conversation_id: 10,
            sender: Participant {
                id: 1,
                username: "alice".into(),
            },
            content: "hello".into(),
            sent_at: Utc::now(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["conversationId"], 10);
        assert_eq!(value["sender"]["username"], "alice");
        assert!(value.get("sentAt").is_some());
    }
}
