//! Realtime frames
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::chat::{ConversationId, Message, UserId};

/// Client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: ConversationId,
    },
    LeaveConversation {
        conversation_id: ConversationId,
    },
    SendMessage {
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
    },
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A new message in a conversation the connection has joined
    Message(Message),
    /// A client event failed; only sent to the connection that caused it
    Error { message: String },
}
