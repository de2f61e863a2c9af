//! Custom extractors
//!
//! Body rejections become the same `{error, status}` envelope as every other
//! API error.

use crate::error::ServerError;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};

/// JSON body extractor that reports parse failures as 400 JSON errors
pub struct JsonExtractor<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonExtractor<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(value) => Ok(Self(value.0)),
            Err(rejection) => Err(ServerError::InvalidRequest(rejection_message(rejection))),
        }
    }
}

fn rejection_message(rejection: JsonRejection) -> String {
    match rejection {
        JsonRejection::JsonDataError(err) => format!("Invalid JSON data: {}", err.body_text()),
        JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err.body_text()),
        JsonRejection::MissingJsonContentType(_) => {
            "Missing 'Content-Type: application/json' header".to_string()
        }
        other => format!("Failed to parse JSON: {}", other.body_text()),
    }
}
