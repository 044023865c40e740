//! Error taxonomy for the messaging core.
//!
//! Validation failures and missing or foreign resources map to distinct
//! client errors; storage failures surface as opaque server errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message text cannot be empty")]
    EmptyBody,

    #[error("message text is too long")]
    MessageTooLong,

    #[error("display name is too long")]
    DisplayNameTooLong,

    #[error("a conversation needs two distinct participants")]
    InvalidParticipants,

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("receiver not found")]
    ReceiverNotFound,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("notification not found")]
    NotificationNotFound,

    #[error("not a participant of this conversation")]
    NotParticipant,

    #[error("invalid or missing credentials")]
    Unauthenticated,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::EmptyBody
            | ChatError::MessageTooLong
            | ChatError::DisplayNameTooLong
            | ChatError::InvalidParticipants
            | ChatError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
            ChatError::ReceiverNotFound
            | ChatError::ConversationNotFound
            | ChatError::NotificationNotFound => StatusCode::NOT_FOUND,
            ChatError::NotParticipant => StatusCode::FORBIDDEN,
            ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Storage details stay in the logs, clients get a generic message
        let message = if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
            "internal storage error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message, "code": status.as_u16() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ChatError::EmptyBody.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ChatError::InvalidParticipants.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ChatError::ReceiverNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ChatError::ConversationNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ChatError::NotParticipant.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ChatError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ChatError::Storage(anyhow::anyhow!("disk on fire")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
