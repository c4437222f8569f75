//! Marketplace Chat Server Library
//!
//! Buyer/seller conversations over REST plus a WebSocket gateway that fans
//! new messages out to every connection joined to a conversation.

pub mod auth;
pub mod chat;
pub mod config;
pub mod ctx;
pub mod db;
pub mod error;
pub mod gateway;

#[cfg(test)]
pub(crate) mod test_support;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use auth::handlers::{login, logout, me, register};
use auth::middleware::mw_require_auth;
use chat::handlers::{get_messages, list_conversations, send_message, start_conversation};
use config::{AppState, ChatServerConfig};
use gateway::ws_handler;

/// Build the HTTP router over a ready application state
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    // Everything here needs a valid session.
    let protected = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/chat/conversations/start", post(start_conversation))
        .route("/chat/conversations", get(list_conversations))
        .route("/chat/messages/send", post(send_message))
        .route("/chat/messages/{conversation_id}", get(get_messages))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            mw_require_auth,
        ));

    Router::new()
        .merge(protected)
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        // Realtime gateway
        .route("/ws", get(ws_handler))
        // Health check
        .route("/health", get(health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &ChatServerConfig) -> CorsLayer {
    let Some(origin) = config.cors_origin.as_deref() else {
        return CorsLayer::permissive();
    };

    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::GET,
                Method::HEAD,
                Method::PUT,
                Method::PATCH,
                Method::POST,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true),
        Err(_) => {
            warn!("Ignoring unusable CORS origin {:?}, allowing any origin", origin);
            CorsLayer::permissive()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        // Already set, ignore
    }
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = ChatServerConfig::default();

    info!("=== Marketplace Chat Server ===");
    info!("Data directory: {:?}", config.data_dir);

    let state = AppState::build(config.clone()).await?;
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_check() -> &'static str {
    "OK"
}
