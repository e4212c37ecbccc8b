use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use hidden_chat::ChatError;
use hidden_shared::ModelError;
use hidden_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing x-user-id header")]
    Unauthenticated,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChatError> for ServerError {
    fn from(e: ChatError) -> Self {
        match e {
            e if e.is_validation() => ServerError::BadRequest(e.to_string()),
            ChatError::NotAnOffer(_) => ServerError::BadRequest(e.to_string()),
            ChatError::Unauthorized { .. } => ServerError::Forbidden(e.to_string()),
            ChatError::ConversationNotFound(_) | ChatError::MessageNotFound(_) => {
                ServerError::NotFound(e.to_string())
            }
            ChatError::Store(StoreError::NotFound(what)) => ServerError::NotFound(what),
            ChatError::OfferAlreadySettled(_)
            | ChatError::Store(StoreError::PreconditionFailed { .. })
            | ChatError::Model(ModelError::OfferAlreadySettled(_))
            | ChatError::Model(ModelError::InvalidTransition { .. }) => {
                ServerError::Conflict(e.to_string())
            }
            other => {
                tracing::error!(error = %other, "Request failed");
                ServerError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
