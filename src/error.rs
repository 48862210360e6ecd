use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::mailer::MailError;
use crate::oauth::OAuthError;
use crate::store::StoreError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    OAuth(#[from] OAuthError),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::MalformedPayload(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::MalformedPayload(_)
            | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::OAuth(OAuthError::Provider(_) | OAuthError::InvalidState) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::NotConfigured(_)
            | AppError::Store(_)
            | AppError::Mail(_)
            | AppError::OAuth(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to callers of a failed downstream call; the detail goes
    /// to the log.
    fn public_message(&self) -> &'static str {
        match self {
            AppError::Store(_) => "Storage request failed",
            AppError::Mail(_) => "Email delivery failed",
            AppError::OAuth(_) => "Authentication failed",
            _ => "Internal server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            AppError::NotConfigured(_) => {
                error!(error = %self, "Request failed");
                json!({ "error": self.to_string() })
            }
            _ if status.is_server_error() => {
                error!(error = ?self, "Request failed");
                json!({ "error": self.public_message(), "details": self.to_string() })
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
