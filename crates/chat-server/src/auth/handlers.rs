//! Auth handlers

use crate::auth::{NewUser, UserInfo};
use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::{Error, Result};
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<UserInfo>)> {
    info!("POST /auth/register - {}", req.email);
    let user = state.auth.register(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    info!("POST /auth/login - {}", req.email);
    let (user, session) = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(AuthResponse {
        token: session.token,
        user,
    }))
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, ctx: Ctx) -> Result<StatusCode> {
    info!("POST /auth/logout - user {}", ctx.user_id());
    state.auth.logout(ctx.token()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/me
pub async fn me(State(state): State<AppState>, ctx: Ctx) -> Result<Json<UserInfo>> {
    let user = state
        .auth
        .get_user(ctx.user_id())
        .await?
        .ok_or_else(|| Error::NotFound(format!("User {} not found", ctx.user_id())))?;
    Ok(Json(user))
}
