use axum::{
    Json,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Header carrying the opaque caller identity, set by the upstream
/// authentication layer. The router never authenticates it, only keys
/// admission control by it.
pub const CALLER_HEADER: &str = "x-caller-id";
/// Header carrying the tenant/agent identity scoping provider connections
/// and tier assignments.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Optional conversation/session key for momentum tracking.
pub const SESSION_HEADER: &str = "x-session-id";

const DEFAULT_TENANT: &str = "default";

#[derive(Debug, Serialize)]
pub struct HttpResult<T> {
    pub code: usize,
    pub data: T,
}

impl<T> HttpResult<T> {
    pub fn new(data: T) -> HttpResult<T> {
        HttpResult { code: 0, data }
    }
}

impl<T> IntoResponse for HttpResult<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn tenant_from_headers(headers: &HeaderMap) -> String {
    header_str(headers, TENANT_HEADER).unwrap_or_else(|| DEFAULT_TENANT.to_string())
}

pub fn caller_from_headers(headers: &HeaderMap) -> Option<String> {
    header_str(headers, CALLER_HEADER)
}

/// Momentum session key: the explicit session header when present, else the
/// caller identity so single-session clients still get damping.
pub fn session_from_headers(headers: &HeaderMap, caller: &str) -> String {
    header_str(headers, SESSION_HEADER).unwrap_or_else(|| caller.to_string())
}
