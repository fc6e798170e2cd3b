use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::Error;
use crate::pipeline::TriggerError;

/// Error body is always `{"error": "..."}`, plus `raw_response` when a
/// model reply could not be parsed
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    raw_response: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            raw_response: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::EmptyLog | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Llm(_) | Error::Parse { .. } => StatusCode::BAD_GATEWAY,
            Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", e);
        }

        match e {
            Error::Parse { message, raw } => Self {
                status,
                message,
                raw_response: Some(raw),
            },
            // Display adds an "Invalid input:" prefix clients don't need
            Error::InvalidInput(message) => Self::new(status, message),
            other => Self::new(status, other.to_string()),
        }
    }
}

impl From<TriggerError> for ApiError {
    fn from(e: TriggerError) -> Self {
        let status = match e {
            TriggerError::Busy => StatusCode::CONFLICT,
            TriggerError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.raw_response {
            Some(raw) => json!({ "error": self.message, "raw_response": raw }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}
