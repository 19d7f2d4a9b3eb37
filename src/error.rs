use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model not allowed: {0}")]
    UnknownModel(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream error {status}: {message}")]
    UpstreamClientError { status: u16, message: String },

    #[error("Unexpected upstream response format: {0}")]
    UpstreamProtocol(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnknownModel(_) | GatewayError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamUnavailable(_)
            | GatewayError::UpstreamClientError { .. }
            | GatewayError::UpstreamProtocol(_)
            | GatewayError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 仅 502/503/504 与传输层错误可重试；4xx 与响应格式错误不可重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::UpstreamUnavailable(_) | GatewayError::UpstreamTimeout(_) => true,
            GatewayError::Http(e) => !e.is_status(),
            _ => false,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 502 | 503 | 504)
}
