use axum::{
    extract::rejection::{BytesRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::{db::StoreError, models::InvalidProduct};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Product not found")]
    NotFound,

    #[error("{0}")]
    MalformedRequest(String),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            // Not-found is a 400 for compatibility with existing clients.
            Self::Validation(_) | Self::Conflict(_) | Self::NotFound | Self::MalformedRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

impl From<InvalidProduct> for AppError {
    fn from(invalid: InvalidProduct) -> Self {
        Self::Validation(invalid.to_string())
    }
}

impl From<BytesRejection> for AppError {
    fn from(rejection: BytesRejection) -> Self {
        Self::MalformedRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedRequest(format!("Invalid request body: {err}"))
    }
}

impl From<PathRejection> for AppError {
    // Ids that don't parse can never match a row.
    fn from(_: PathRejection) -> Self {
        Self::NotFound
    }
}
