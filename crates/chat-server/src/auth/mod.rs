//! Authentication Module
//!
//! Users, password login and bearer sessions. This is the minimal user
//! collaborator the chat endpoints need: identity, role and ban flag are
//! consumed by the chat stores by reference only.

pub mod handlers;
pub mod middleware;

use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::UserId;
use crate::db::{parse_timestamp, timestamp};
use crate::error::{Error, Result};

/// Marketplace role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Seller,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Seller => "seller",
            Role::Customer => "customer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "seller" => Ok(Role::Seller),
            "customer" => Ok(Role::Customer),
            other => Err(Error::InvalidRequest(format!("Unknown role: {}", other))),
        }
    }
}

/// User record stored in database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_banned: bool,
    pub created_at: DateTime<Utc>,
}

/// Public user info (no sensitive data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_banned: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            is_banned: user.is_banned,
            created_at: user.created_at,
        }
    }
}

/// Session token for authenticated requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Registration payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

type UserRow = (i64, String, String, String, String, bool, String);

fn user_from_row(row: UserRow) -> Result<User> {
    let (id, username, email, password_hash, role, is_banned, created_at) = row;
    Ok(User {
        id,
        username,
        email,
        password_hash,
        role: role.parse()?,
        is_banned,
        created_at: parse_timestamp(&created_at),
    })
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, is_banned, created_at";

/// Auth manager handles all authentication
pub struct AuthManager {
    pool: SqlitePool,
    session_ttl: Duration,
    bcrypt_cost: u32,
    /// In-memory session cache
    sessions: RwLock<HashMap<String, Session>>,
}

impl AuthManager {
    /// Create new auth manager
    pub async fn new(pool: SqlitePool, session_ttl_days: i64, bcrypt_cost: u32) -> Result<Self> {
        let manager = Self {
            pool,
            session_ttl: Duration::days(session_ttl_days),
            bcrypt_cost,
            sessions: RwLock::new(HashMap::new()),
        };

        manager.init_db().await?;

        info!("[Auth] Initialized");

        Ok(manager)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'customer',
                is_banned INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a new user. Only sellers and customers may sign up.
    pub async fn register(&self, new_user: NewUser) -> Result<UserInfo> {
        let NewUser {
            username,
            email,
            password,
            role,
        } = new_user;

        if !matches!(role, Role::Seller | Role::Customer) {
            return Err(Error::InvalidRequest("Invalid role selected.".to_string()));
        }
        if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(Error::InvalidRequest(
                "Username, email and password are required".to_string(),
            ));
        }

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(Error::Conflict("Email already exists.".to_string()));
        }

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(&username)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(Error::Conflict("Username already exists".to_string()));
        }

        let password_hash = hash(&password, self.bcrypt_cost)?;
        let created_at = timestamp(Utc::now());

        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, role, is_banned, created_at) VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&username)
        .bind(&email)
        .bind(&password_hash)
        .bind(role.as_str())
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::Conflict("User already exists".to_string())
            }
            other => Error::Database(other),
        })?;

        info!("[Auth] User registered: {} ({}, {})", username, email, role);

        Ok(UserInfo {
            id: result.last_insert_rowid(),
            username,
            email,
            role,
            is_banned: false,
            created_at: parse_timestamp(&created_at),
        })
    }

    /// Login user and create session
    pub async fn login(&self, email: &str, password: &str) -> Result<(UserInfo, Session)> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        let user = user_from_row(row.ok_or(Error::LoginFail)?)?;

        if !verify(password, &user.password_hash)? {
            warn!("[Auth] Failed login attempt for {}", email);
            return Err(Error::LoginFail);
        }

        if user.is_banned {
            warn!("[Auth] Banned user {} tried to log in", user.id);
            return Err(Error::Forbidden("User is banned".to_string()));
        }

        let session = self.create_session(user.id).await?;

        info!("[Auth] User logged in: {}", user.username);

        Ok((user.into(), session))
    }

    async fn create_session(&self, user_id: UserId) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id,
            created_at: now,
            expires_at: now + self.session_ttl,
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(session.user_id)
        .bind(timestamp(session.created_at))
        .bind(timestamp(session.expires_at))
        .execute(&self.pool)
        .await?;

        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());

        Ok(session)
    }

    /// Validate session token and return its user
    pub async fn validate_session(&self, token: &str) -> Result<UserInfo> {
        let cached = self.sessions.read().await.get(token).cloned();

        let session = match cached {
            Some(session) => session,
            None => {
                let row: Option<(String, i64, String, String)> = sqlx::query_as(
                    "SELECT token, user_id, created_at, expires_at FROM sessions WHERE token = ?",
                )
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

                let (token, user_id, created_at, expires_at) =
                    row.ok_or(Error::AuthFailInvalidSession)?;
                let session = Session {
                    token,
                    user_id,
                    created_at: parse_timestamp(&created_at),
                    expires_at: parse_timestamp(&expires_at),
                };
                self.sessions
                    .write()
                    .await
                    .insert(session.token.clone(), session.clone());
                session
            }
        };

        if session.expires_at <= Utc::now() {
            self.sessions.write().await.remove(token);
            return Err(Error::AuthFailInvalidSession);
        }

        let user = self
            .get_user(session.user_id)
            .await?
            .ok_or(Error::AuthFailInvalidSession)?;

        if user.is_banned {
            return Err(Error::Forbidden("User is banned".to_string()));
        }

        Ok(user)
    }

    /// Logout user (invalidate session)
    pub async fn logout(&self, token: &str) -> Result<()> {
        self.sessions.write().await.remove(token);

        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        info!("[Auth] Session invalidated");

        Ok(())
    }

    /// Get user by ID
    pub async fn get_user(&self, user_id: UserId) -> Result<Option<UserInfo>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|row| user_from_row(row).map(UserInfo::from))
            .transpose()
    }

    /// Set or clear the ban flag on a user
    pub async fn set_banned(&self, user_id: UserId, banned: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET is_banned = ? WHERE id = ?")
            .bind(banned)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("User {} not found", user_id)));
        }

        info!("[Auth] User {} banned={}", user_id, banned);
        Ok(())
    }
}
