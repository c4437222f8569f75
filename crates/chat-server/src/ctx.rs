use crate::chat::UserId;
use crate::error::{Error, Result};
use axum::{extract::FromRequestParts, http::request::Parts};

/// Authenticated caller, inserted by the auth middleware
#[derive(Clone, Debug)]
pub struct Ctx {
    user_id: UserId,
    token: String,
}

impl Ctx {
    pub fn new(user_id: UserId, token: String) -> Self {
        Self { user_id, token }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Ctx>()
            .cloned()
            .ok_or(Error::AuthFailCtxNotInRequestExt)
    }
}
