use axum::{
    Json,
    response::{IntoResponse, Response},
};
use reqwest::StatusCode;
use serde_json::json;

use crate::routing::assignment::AssignmentError;
use crate::service::app_state::AppStoreError;
use crate::service::vault::VaultError;

#[derive(Debug)]
pub enum BaseError {
    ParamInvalid(Option<String>),
    NotFound(Option<String>),
    StoreError(Option<String>),
    VaultFailure(Option<String>),
    InternalServerError(Option<String>),
}

impl From<AppStoreError> for BaseError {
    fn from(err: AppStoreError) -> Self {
        BaseError::StoreError(Some(err.to_string()))
    }
}

impl From<VaultError> for BaseError {
    fn from(err: VaultError) -> Self {
        // The vault error text never contains key material.
        BaseError::VaultFailure(Some(err.to_string()))
    }
}

impl From<AssignmentError> for BaseError {
    fn from(err: AssignmentError) -> Self {
        match err {
            AssignmentError::EmptyModel => BaseError::ParamInvalid(Some(err.to_string())),
            AssignmentError::Store(inner) => inner.into(),
        }
    }
}

impl IntoResponse for BaseError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message) = match self {
            BaseError::ParamInvalid(msg) => (
                StatusCode::BAD_REQUEST,
                1001,
                msg.unwrap_or("request params invalid".to_string()),
            ),
            BaseError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                1002,
                msg.unwrap_or("data not found".to_string()),
            ),
            BaseError::StoreError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                1200,
                msg.unwrap_or("application store operation failed".to_string()),
            ),
            BaseError::VaultFailure(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                1300,
                msg.unwrap_or("credential vault operation failed".to_string()),
            ),
            BaseError::InternalServerError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                0,
                msg.unwrap_or("internal server error".to_string()),
            ),
        };
        let body = Json(json!({
            "code": error_code,
            "msg": error_message,
        }));
        (status, body).into_response()
    }
}
