use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;
use crate::types::DeliveryStatus;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("no webhook configured")]
    NotConfigured,

    #[error("rate limit of {limit} requests per hour exceeded")]
    RateLimitExceeded {
        limit: usize,
        reset_at: DateTime<Utc>,
    },

    #[error("{0}")]
    Unauthorized(String),

    /// A delivery record was advanced after reaching a terminal status.
    #[error("delivery record is already {from}")]
    InvalidTransition { from: DeliveryStatus },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("payload serialization failed: {0}")]
    Payload(serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, WebhookError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
            WebhookError::NotConfigured => StatusCode::NOT_FOUND,
            WebhookError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            WebhookError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebhookError::InvalidTransition { .. }
            | WebhookError::Store(_)
            | WebhookError::Payload(_)
            | WebhookError::HttpClient(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            WebhookError::InvalidDestination(_) => "invalid_destination",
            WebhookError::NotConfigured => "not_configured",
            WebhookError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            WebhookError::Unauthorized(_) => "unauthorized",
            WebhookError::InvalidTransition { .. }
            | WebhookError::Store(_)
            | WebhookError::Payload(_)
            | WebhookError::HttpClient(_) => "internal_error",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();

        if let WebhookError::RateLimitExceeded { reset_at, .. } = &self {
            let retry_after = (*reset_at - Utc::now()).num_seconds().max(0);
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
