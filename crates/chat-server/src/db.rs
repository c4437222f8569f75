//! SQLite connection handling
//!
//! Every store shares one pool opened against `<data_dir>/chat.sqlite`.
//! Timestamps are stored as fixed-width RFC 3339 text so that ordering by
//! the column matches chronological order.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Open (creating if needed) the chat database
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!(
        "sqlite://{}",
        db_path.to_string_lossy().replace('\\', "/")
    ))
    .with_context(|| format!("Invalid database path {:?}", db_path))?
    .create_if_missing(true)
    .foreign_keys(true)
    .journal_mode(SqliteJournalMode::Wal)
    .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database at {:?}", db_path))?;

    info!("[Db] Connected to {:?}", db_path);
    Ok(pool)
}

/// Encode a timestamp for storage
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a stored timestamp, falling back to now for unreadable rows
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e| {
        warn!("[Db] Unreadable timestamp {:?}, using now: {}", raw, e);
        Utc::now()
    })
}
