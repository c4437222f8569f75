//! Chat domain
//!
//! Two-party conversations and their append-only message logs, persisted in
//! the shared SQLite database next to the `users` table.

pub mod conversations;
pub mod handlers;
pub mod messages;
pub mod models;

pub use conversations::ConversationStore;
pub use messages::MessageStore;
pub use models::{
    Conversation, ConversationId, ConversationSummary, Message, MessageId, Participant, UserId,
};

use sqlx::SqlitePool;

use crate::error::Result;

/// Create the chat tables if they do not exist yet
pub(crate) async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_a INTEGER NOT NULL,
            user_b INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (user_a) REFERENCES users(id),
            FOREIGN KEY (user_b) REFERENCES users(id),
            CHECK (user_a <> user_b)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One conversation per unordered pair.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair
         ON conversations (min(user_a, user_b), max(user_a, user_b))",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_user_b ON conversations (user_b)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL,
            sender_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id),
            FOREIGN KEY (sender_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages (conversation_id, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
