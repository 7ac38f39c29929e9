//! HTTP error responses: `{"error": "..."}` with a matching status

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bpy2obj::ConvertError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request, rejected before the engine runs
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Convert(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Convert(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
