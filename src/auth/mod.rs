//! Request authentication.
//!
//! Handlers only see a [`Principal`]; how it was established lives behind
//! [`AuthMethod`].

mod api_key;
mod middleware;
mod token;

use std::fmt;

use axum::http::HeaderMap;
use serde::Serialize;

use crate::error::Result;

pub use api_key::{ApiKeyAuth, extract_key};
pub use middleware::RequireAdmin;
pub use token::{TokenGenerator, parse_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    ApiKey,
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey => f.write_str("api_key"),
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: String,
    pub kind: AuthKind,
    pub is_admin: bool,
}

pub trait AuthMethod: Send + Sync {
    fn kind(&self) -> AuthKind;

    /// Establish the caller from request headers. Missing or bad credentials
    /// are `Unauthorized`.
    fn authenticate(&self, headers: &HeaderMap) -> Result<Principal>;
}
