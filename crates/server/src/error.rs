//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//! Responses are JSON objects of the form `{"error": "..."}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use cartpool_core::token;

use crate::db::RepositoryError;

/// Application-level error type for the Cartpool server.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Presented invite or admin token failed verification.
    #[error("Invalid token")]
    InvalidToken(#[from] token::InvalidToken),

    /// Minting an invite or admin token failed.
    #[error("Token issue error: {0}")]
    TokenIssue(#[from] token::EncodeError),

    /// Session store operation failed.
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// CSV rendering failed.
    #[error("Export error: {0}")]
    Export(#[from] crate::services::export::ExportError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller lacks the capability for this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        let server_fault = match &self {
            Self::Database(err) => !matches!(err, RepositoryError::NotFound),
            Self::TokenIssue(_) | Self::Session(_) | Self::Export(_) | Self::Internal(_) => true,
            _ => false,
        };
        if server_fault {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Database(RepositoryError::NotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_)
            | Self::TokenIssue(_)
            | Self::Session(_)
            | Self::Export(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidToken(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        // Don't expose internal error details to clients. Token failures share
        // one message regardless of what went wrong with the token.
        let message = match &self {
            Self::Database(RepositoryError::NotFound) => "not found".to_string(),
            Self::Database(_)
            | Self::TokenIssue(_)
            | Self::Session(_)
            | Self::Export(_)
            | Self::Internal(_) => "internal server error".to_string(),
            Self::InvalidToken(_) => "invalid token".to_string(),
            Self::NotFound(what) => format!("{what} not found"),
            Self::Forbidden(msg) | Self::BadRequest(msg) => msg.clone(),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from an actor key.
///
/// Call this once the request's identity is resolved so errors are
/// associated with the acting participant.
pub fn set_sentry_user(actor_key: &impl ToString, username: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(actor_key.to_string()),
            username: username.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("order", "Added item", Some(&[("order_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
