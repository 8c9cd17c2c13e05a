//! Error taxonomy shared by the real-time router and the HTTP handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Validation(String),

    #[error("message not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ChatError::Forbidden(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short, non-sensitive text that is safe to show a client. Store
    /// failures are reduced to a generic message; `fallback` names the
    /// operation that failed ("Failed to send message").
    pub fn client_message(&self, fallback: &str) -> String {
        match self {
            ChatError::StoreUnavailable(_) => fallback.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let ChatError::StoreUnavailable(ref e) = self {
            error!("Store error while handling request: {}", e);
        }
        let status = self.status();
        let message = self.client_message("Server error");
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
