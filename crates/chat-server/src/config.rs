//! Chat server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sqlx::SqlitePool;

use crate::auth::AuthManager;
use crate::chat::{ConversationStore, MessageStore};
use crate::db;
use crate::gateway::{Gateway, LocalGroupBus};

/// Configuration for the chat server
#[derive(Clone, Debug)]
pub struct ChatServerConfig {
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Allowed browser origin, `None` for permissive CORS
    pub cors_origin: Option<String>,
    /// Lifetime of a login session in days
    pub session_ttl_days: i64,
    /// Buffer size of each broadcast group and connection outbox
    pub group_capacity: usize,
    /// bcrypt work factor for password hashes
    pub bcrypt_cost: u32,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::var("CHAT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("chat_data")),
            bind_addr: std::env::var("CHAT_BIND_ADDR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000))),
            cors_origin: match std::env::var("CHAT_CORS_ORIGIN") {
                Ok(origin) if origin == "*" => None,
                Ok(origin) => Some(origin),
                Err(_) => Some("http://localhost:5173".to_string()),
            },
            session_ttl_days: std::env::var("CHAT_SESSION_TTL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            group_capacity: std::env::var("CHAT_GROUP_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(100),
            bcrypt_cost: std::env::var("CHAT_BCRYPT_COST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(bcrypt::DEFAULT_COST),
        }
    }
}

impl ChatServerConfig {
    /// Create config with custom base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("chat.sqlite")
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("Failed to create data dir {:?}", self.data_dir))?;
        Ok(())
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ChatServerConfig,
    pub pool: SqlitePool,
    pub auth: Arc<AuthManager>,
    pub conversations: Arc<ConversationStore>,
    pub messages: Arc<MessageStore>,
    pub gateway: Arc<Gateway>,
}

impl AppState {
    /// Open the database and wire every component together
    pub async fn build(config: ChatServerConfig) -> anyhow::Result<Self> {
        config.ensure_dirs().await?;
        let pool = db::connect(&config.database_path()).await?;

        let auth = Arc::new(
            AuthManager::new(pool.clone(), config.session_ttl_days, config.bcrypt_cost).await?,
        );
        let conversations = Arc::new(ConversationStore::new(pool.clone()).await?);
        let messages = Arc::new(MessageStore::new(pool.clone()).await?);
        let bus = Arc::new(LocalGroupBus::new(config.group_capacity));
        let gateway = Arc::new(Gateway::new(messages.clone(), bus, config.group_capacity));

        Ok(Self {
            config,
            pool,
            auth,
            conversations,
            messages,
            gateway,
        })
    }
}
