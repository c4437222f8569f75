//! Chat REST handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::models::{Conversation, ConversationId, ConversationSummary, Message, UserId};
use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub content: String,
}

/// POST /chat/conversations/start
///
/// Start or get the existing conversation between two users.
pub async fn start_conversation(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<StartConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>)> {
    info!(
        "POST /chat/conversations/start - {} -> {} (session user {})",
        req.sender_id,
        req.receiver_id,
        ctx.user_id()
    );

    let conversation = state
        .conversations
        .find_or_create(req.sender_id, req.receiver_id)
        .await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /chat/conversations
///
/// Inbox of the current user.
pub async fn list_conversations(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<Vec<ConversationSummary>>> {
    info!("GET /chat/conversations - user {}", ctx.user_id());
    let summaries = state.conversations.list_for_user(ctx.user_id()).await?;
    Ok(Json(summaries))
}

/// GET /chat/messages/{conversation_id}
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<Vec<Message>>> {
    info!("GET /chat/messages/{}", conversation_id);
    let messages = state.messages.list_by_conversation(conversation_id).await?;
    Ok(Json(messages))
}

/// POST /chat/messages/send
///
/// Sender comes from the session. The stored message is also pushed to
/// everyone joined to the conversation over the gateway.
pub async fn send_message(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>)> {
    info!(
        "POST /chat/messages/send - conversation {} by {}",
        req.conversation_id,
        ctx.user_id()
    );

    let message = state
        .messages
        .append(req.conversation_id, ctx.user_id(), &req.content)
        .await?;
    state.gateway.publish(&message).await;

    Ok((StatusCode::CREATED, Json(message)))
}
