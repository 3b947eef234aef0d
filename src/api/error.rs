use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
/// Errors returned by the query api.
pub enum ApiError {
    /// The store is unreachable or its connection is unusable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store rejected a query or returned data that cannot be decoded.
    #[error("store error: {0}")]
    Store(String),

    /// The blocking task running the query failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connect(_) | StoreError::Tls(_) | StoreError::Poisoned => {
                ApiError::StoreUnavailable(err.to_string())
            }
            StoreError::Query(_) | StoreError::Decode(_) => ApiError::Store(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ApiError::Store(_) => "STORE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::error!(target: "roomsafed::api", "Request failed: {}", self);

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string()
        }));

        (self.status(), body).into_response()
    }
}
