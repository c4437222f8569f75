use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Auth Errors
    #[error("Invalid email or password")]
    LoginFail,
    #[error("No auth token found")]
    AuthFailNoToken,
    #[error("Auth token wrong format")]
    AuthFailTokenWrongFormat,
    #[error("Invalid or expired session")]
    AuthFailInvalidSession,
    #[error("Auth context missing")]
    AuthFailCtxNotInRequestExt,

    // Request Errors
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),

    // Generic
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::LoginFail
            | Error::AuthFailNoToken
            | Error::AuthFailTokenWrongFormat
            | Error::AuthFailInvalidSession => StatusCode::UNAUTHORIZED,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::AuthFailCtxNotInRequestExt | Error::Database(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand to a client. Driver details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::Database(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Error::Database(e) => error!("Database error: {}", e),
            Error::Internal(msg) => error!("Internal error: {}", msg),
            _ => {}
        }
        let error_message = self.public_message();

        let body = Json(json!({
            "error": {
                "message": error_message
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for Error {
    fn from(err: bcrypt::BcryptError) -> Self {
        Error::Internal(format!("Password hashing failed: {}", err))
    }
}
