use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::error::Error;

/// Standard envelope of the extended API.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

/// API error that converts to a proper HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    /// Stable kind name, see [`Error::code`].
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BadRequest",
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NotFound",
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "Internal",
            message: "Internal server error".to_string(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

fn status_of(error: &Error) -> StatusCode {
    match error {
        Error::InvalidTarget { .. }
        | Error::HostingDisabled(_)
        | Error::PathTraversal(_)
        | Error::InvalidPath(_)
        | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) | Error::ReindexProhibited(_) | Error::AlreadyExists => StatusCode::CONFLICT,
        Error::GitUnreachable(_)
        | Error::GitAuthRequired(_)
        | Error::GitTimeout
        | Error::GitRefNotFound(_)
        | Error::ExtractionFailed { .. } => StatusCode::BAD_GATEWAY,
        Error::NotFound => StatusCode::NOT_FOUND,
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::Forbidden => StatusCode::FORBIDDEN,
        Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        Error::ArchiveFailed(_)
        | Error::Database(_)
        | Error::Io(_)
        | Error::TokenLookupCollision
        | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn message_of(error: &Error) -> String {
    match error {
        Error::ExtractionFailed { message, stderr } if !stderr.trim().is_empty() => {
            format!("module extraction failed: {message}\n{}", stderr.trim())
        }
        Error::NotFound => "Not found".to_string(),
        Error::Unauthorized => "Authentication required".to_string(),
        Error::Forbidden => "Access denied".to_string(),
        other => other.to_string(),
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = status_of(&error);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed ({}): {error}", error.code());
            return Self::internal();
        }
        Self {
            status,
            code: error.code(),
            message: message_of(&error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "data": null,
            "error": self.message,
            "code": self.code,
            "errors": [self.message],
        });
        let mut response = (self.status, Json(body)).into_response();

        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"tfhost\""),
            );
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err = ApiError::from(Error::PathTraversal("../../etc/passwd".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "PathTraversal");

        let err = ApiError::from(Error::Conflict("busy".into()));
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err = ApiError::from(Error::GitTimeout);
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);

        let err = ApiError::from(Error::extraction("analyzer exited with 1", "boom"));
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "/srv/secret/path missing");
        let err = ApiError::from(Error::Io(io));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "Internal");
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn test_unauthorized_sets_challenge() {
        let response = ApiError::from(Error::Unauthorized).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(WWW_AUTHENTICATE));
    }
}
