use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors a workflow hands back to its caller.
///
/// Validation, authorization and lookup failures are raised before any mutation. Notification
/// failures never show up here, see [`NotifyError`].
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn as_label(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::Persistence(_) => "persistence",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Persistence { .. } | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "ok": false, "error": self.to_string() }))).into_response()
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique key rejected the write.
    #[error("duplicate key")]
    Duplicate,

    #[error("store backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Duplicate => "store_duplicate",
            StoreError::Backend(_) => "store_backend",
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
            _ => StoreError::Backend(error.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport backend: {0}")]
    Backend(String),

    #[error("unknown subscription {0}")]
    UnknownSubscription(String),

    #[error("could not encode payload: {0}")]
    Encode(String),
}

impl TransportError {
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Backend(_) => "transport_backend",
            TransportError::UnknownSubscription(_) => "transport_unknown_subscription",
            TransportError::Encode(_) => "transport_encode",
        }
    }
}

impl From<redis::RedisError> for TransportError {
    fn from(error: redis::RedisError) -> Self {
        TransportError::Backend(error.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        TransportError::Encode(error.to_string())
    }
}

/// Topic, subscription or publish failure. Logged at the call site, never surfaced.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl NotifyError {
    pub fn as_label(&self) -> &'static str {
        match self {
            NotifyError::Store(error) => error.as_label(),
            NotifyError::Transport(error) => error.as_label(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {key}")]
    Missing { key: String },

    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Anything that keeps the process from coming up.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Validation("name required".into()), StatusCode::BAD_REQUEST),
            (AppError::Unauthorized("login required".into()), StatusCode::UNAUTHORIZED),
            (AppError::NotFound("trip not found".into()), StatusCode::NOT_FOUND),
            (AppError::Persistence(StoreError::Backend("gone".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(AppError::Validation(String::new()).as_label(), "validation");
        assert_eq!(NotifyError::from(StoreError::Duplicate).as_label(), "store_duplicate");
        assert_eq!(
            NotifyError::from(TransportError::Backend("down".into())).as_label(),
            "transport_backend"
        );
    }
}
