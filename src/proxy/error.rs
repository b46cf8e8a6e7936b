use axum::{
    Json,
    response::{IntoResponse, Response},
};
use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::service::admission::AdmissionError;
use crate::service::app_state::AppStoreError;
use crate::service::vault::VaultError;

/// Failure taxonomy of the forwarding hot path.
///
/// Admission rejections must stay distinguishable from generic server
/// errors so callers back off instead of hammering; upstream failures are
/// relayed with sanitized detail only. "No route" is intentionally absent:
/// it is a defined null-result outcome, not an error.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("store error: {0}")]
    Store(#[from] AppStoreError),
    /// Stored credential failed authenticated decryption. Fatal for that
    /// provider connection; there is no fallback credential.
    #[error("provider credential unusable")]
    Integrity(#[from] VaultError),
    /// Network-level upstream failure. The message is already sanitized:
    /// no URLs, no headers, no request-construction detail.
    #[error("{0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let (status, code, message, retry_after) = match &self {
            RouteError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, 2001, msg.clone(), None)
            }
            RouteError::Admission(AdmissionError::RateLimited { retry_after_secs }) => (
                StatusCode::TOO_MANY_REQUESTS,
                2101,
                self.to_string(),
                Some(*retry_after_secs),
            ),
            RouteError::Admission(AdmissionError::ConcurrencyExceeded) => (
                StatusCode::TOO_MANY_REQUESTS,
                2102,
                self.to_string(),
                None,
            ),
            RouteError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                2200,
                "application store operation failed".to_string(),
                None,
            ),
            RouteError::Integrity(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                2301,
                "provider credential unusable".to_string(),
                None,
            ),
            RouteError::Upstream(msg) => (StatusCode::BAD_GATEWAY, 2400, msg.clone(), None),
            RouteError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                0,
                "internal server error".to_string(),
                None,
            ),
        };

        let body = Json(json!({
            "code": code,
            "msg": message,
        }));
        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}
