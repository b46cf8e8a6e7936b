use std::io::Read;
use std::time::Duration;

use axum::{body::Body, response::Response};
use bytes::Bytes;
use cyder_tools::log::{debug, error, warn};
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::{
    Method, Proxy,
    header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING},
};

use crate::config::CONFIG;
use crate::service::admission::SlotGuard;

use super::error::RouteError;
use super::prepare::PreparedRequest;

pub(super) fn build_reqwest_client() -> Result<reqwest::Client, RouteError> {
    let mut client_builder = reqwest::Client::builder();
    if let Some(proxy_url) = &CONFIG.proxy {
        let proxy = Proxy::https(proxy_url).map_err(|e| {
            error!("Invalid proxy URL in configuration: {}", e);
            RouteError::Internal("invalid proxy configuration".to_string())
        })?;
        client_builder = client_builder.proxy(proxy);
    }
    client_builder
        .build()
        .map_err(|e| {
            error!("Failed to build reqwest client: {}", e);
            RouteError::Internal("failed to build HTTP client".to_string())
        })
}

// Upstream failures must not echo request-construction detail back to the
// caller; classify the error instead of relaying its text.
fn sanitize_send_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "upstream request timed out".to_string()
    } else if e.is_connect() {
        "failed to connect to upstream provider".to_string()
    } else {
        "upstream request failed".to_string()
    }
}

// Sends the prepared request and relays the upstream response, handling
// streaming (SSE) and gzip. Non-2xx upstream responses are relayed as-is;
// only transport-level failures become errors. The caller's concurrency
// slot travels in here so it stays held until the relay is actually done:
// for buffered responses that is the end of this function, for SSE it is
// the end of the body stream, which also covers a client disconnect
// dropping the stream mid-relay.
pub(super) async fn proxy_request(
    prepared: PreparedRequest,
    timeout: Duration,
    slot: SlotGuard,
) -> Result<Response<Body>, RouteError> {
    let client = build_reqwest_client()?;

    debug!("[proxy_request] forwarding to upstream, {} byte body", prepared.body.len());

    let response = match client
        .request(Method::POST, &prepared.url)
        .headers(prepared.headers)
        .timeout(timeout)
        .body(prepared.body)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            // Log keeps the detail (minus the URL); the caller gets the
            // sanitized classification only.
            let sanitized = sanitize_send_error(&e);
            error!("LLM request failed: {}", e.without_url());
            return Err(RouteError::Upstream(sanitized));
        }
    };

    let status_code = response.status();
    let response_headers = response.headers().clone();
    let mut response_builder = Response::builder().status(status_code);
    for (name, value) in response_headers.iter() {
        if name != CONTENT_LENGTH
            && name != CONTENT_ENCODING
            && name != TRANSFER_ENCODING
            && name != AUTHORIZATION
        {
            response_builder = response_builder.header(name, value);
        }
    }

    if !status_code.is_success() {
        warn!("Upstream returned status {}", status_code);
    }

    let is_sse = response_headers.get(CONTENT_TYPE).is_some_and(|value| {
        value.to_str().unwrap_or("").contains("text/event-stream")
    });

    if is_sse {
        let mut upstream = response.bytes_stream();
        let relay = async_stream::stream! {
            // The slot guard lives inside the stream: dropping the body,
            // whether at [DONE] or on client disconnect, releases it.
            let _slot = slot;
            while let Some(chunk) = upstream.next().await {
                yield chunk.map_err(std::io::Error::other);
            }
        };
        response_builder
            .body(Body::from_stream(relay))
            .map_err(|e| RouteError::Internal(format!("failed to build client response: {}", e)))
    } else {
        let is_gzip = response_headers
            .get(CONTENT_ENCODING)
            .is_some_and(|value| value.to_str().unwrap_or("").contains("gzip"));

        let body_bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to read LLM response body: {}", e.without_url());
                return Err(RouteError::Upstream(
                    "failed to read upstream response body".to_string(),
                ));
            }
        };

        let decompressed_body = if is_gzip {
            if body_bytes.is_empty() {
                Bytes::new()
            } else {
                let mut gz = GzDecoder::new(&body_bytes[..]);
                let mut decompressed_data = Vec::new();
                match gz.read_to_end(&mut decompressed_data) {
                    Ok(_) => Bytes::from(decompressed_data),
                    Err(e) => {
                        error!("Gzip decoding of upstream response failed: {}", e);
                        body_bytes // return original if decode fails
                    }
                }
            }
        } else {
            body_bytes
        };
        response_builder
            .body(Body::from(decompressed_body))
            .map_err(|e| RouteError::Internal(format!("failed to build client response: {}", e)))
    }
}
