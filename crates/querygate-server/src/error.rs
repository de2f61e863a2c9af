//! Server error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use querygate_runtime::error::GatewayError;
use serde_json::json;
use thiserror::Error;

/// Server error type
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed request or unknown data source
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend capacity is temporarily unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            ServerError::InvalidRequest(msg)
            | ServerError::NotFound(msg)
            | ServerError::Unavailable(msg)
            | ServerError::InternalError(msg) => msg,
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<GatewayError> for ServerError {
    fn from(err: GatewayError) -> Self {
        let message = err.to_string();
        match err {
            GatewayError::InvalidRequest(_) | GatewayError::UnknownDataSource(_) => {
                ServerError::InvalidRequest(message)
            }
            GatewayError::PoolExhausted { .. } | GatewayError::PoolClosed => {
                ServerError::Unavailable(message)
            }
            _ => ServerError::InternalError(message),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::InternalError(err.to_string())
    }
}
