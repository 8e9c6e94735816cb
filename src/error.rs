use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookingError {
    /// A required input is missing or malformed; nothing was sent to the backend.
    #[error("{0}")]
    Validation(String),

    /// The backend rejected a write on a unique key.
    #[error("{0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sign-in required: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Backend request failed: {0}")]
    Backend(String),
}

pub type BookingResult<T> = Result<T, BookingError>;

impl BookingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BookingError::Validation(msg.into())
    }

    pub fn backend(msg: impl std::fmt::Display) -> Self {
        BookingError::Backend(msg.to_string())
    }

    /// Replace a unique-key conflict with a user-facing message, leaving other errors as-is.
    pub fn on_conflict(self, msg: &str) -> Self {
        match self {
            BookingError::Conflict(_) => BookingError::Conflict(msg.to_string()),
            other => other,
        }
    }
}

impl From<reqwest::Error> for BookingError {
    fn from(error: reqwest::Error) -> Self {
        BookingError::Backend(error.to_string())
    }
}

impl From<serde_json::Error> for BookingError {
    fn from(error: serde_json::Error) -> Self {
        BookingError::Backend(format!("Malformed backend response: {error}"))
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = match self {
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::Conflict(_) => StatusCode::CONFLICT,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BookingError::Forbidden(_) => StatusCode::FORBIDDEN,
            BookingError::Backend(_) => StatusCode::BAD_GATEWAY,
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_conflict_rewrites_only_conflicts() {
        let err = BookingError::Conflict("23505".into()).on_conflict("This time slot already exists");
        assert_eq!(err.to_string(), "This time slot already exists");

        let err = BookingError::backend("timeout").on_conflict("ignored");
        assert_eq!(err, BookingError::Backend("timeout".into()));
    }

    #[test]
    fn test_status_codes() {
        let resp = BookingError::validation("Select a service").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = BookingError::Conflict("dup".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = BookingError::Forbidden("admin".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
