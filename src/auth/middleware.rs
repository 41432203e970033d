use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::Principal;
use crate::error::Error;
use crate::server::{ApiError, AppState};

/// Extractor for endpoints that mutate registry state.
pub struct RequireAdmin(pub Principal);

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = state.auth.authenticate(&parts.headers)?;

        if !principal.is_admin {
            return Err(Error::Forbidden.into());
        }

        Ok(RequireAdmin(principal))
    }
}
