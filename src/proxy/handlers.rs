use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::HeaderMap,
    response::Response,
};
use cyder_tools::log::{debug, info, warn};
use reqwest::StatusCode;
use serde_json::Value;
use uuid::Uuid;

use crate::routing::momentum;
use crate::routing::scorer::{self, ChatMessage};
use crate::routing::tier::Tier;
use crate::service::app_state::AppState;
use crate::service::catalog::ModelCatalogEntry;
use crate::utils::{caller_from_headers, session_from_headers, tenant_from_headers};

use super::core::proxy_request;
use super::endpoints::{PROVIDER_ENDPOINTS, ProviderEndpoint};
use super::error::RouteError;
use super::prepare::prepare_upstream_request;
use crate::config::CONFIG;

/// Everything a resolution run produced: the classification plus the
/// effective catalog entry, when one exists.
pub struct TierResolution {
    pub tier: Tier,
    pub score: u32,
    pub confidence: f32,
    pub reason: String,
    pub model: Option<Arc<ModelCatalogEntry>>,
}

struct ValidatedChatRequest {
    data: Value,
    messages: Vec<ChatMessage>,
    tools: Vec<Value>,
    tool_choice: Option<Value>,
}

// The message list must be a non-empty array of role/content objects;
// anything else fails before any upstream work happens.
fn validate_chat_request(data: Value) -> Result<ValidatedChatRequest, RouteError> {
    let raw_messages = data
        .get("messages")
        .ok_or_else(|| RouteError::Validation("'messages' field is required".to_string()))?;
    let array = raw_messages
        .as_array()
        .ok_or_else(|| RouteError::Validation("'messages' must be an array".to_string()))?;
    if array.is_empty() {
        return Err(RouteError::Validation(
            "'messages' must not be empty".to_string(),
        ));
    }

    let mut messages = Vec::with_capacity(array.len());
    for (index, raw) in array.iter().enumerate() {
        let obj = raw.as_object().ok_or_else(|| {
            RouteError::Validation(format!("messages[{}] must be an object", index))
        })?;
        let role = obj.get("role").and_then(Value::as_str).ok_or_else(|| {
            RouteError::Validation(format!("messages[{}].role must be a string", index))
        })?;
        if !obj.contains_key("content") {
            return Err(RouteError::Validation(format!(
                "messages[{}].content is required",
                index
            )));
        }
        messages.push(ChatMessage {
            role: role.to_string(),
            content: obj.get("content").cloned().unwrap_or(Value::Null),
        });
    }

    let tools = data
        .get("tools")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let tool_choice = data.get("tool_choice").cloned();

    Ok(ValidatedChatRequest {
        data,
        messages,
        tools,
        tool_choice,
    })
}

// Scorer + momentum + assignment lookup. The scorer always computes its own
// independent classification; momentum only damps it, and heartbeat
// decisions neither get damped nor recorded.
fn resolve_tier(
    app_state: &Arc<AppState>,
    tenant_id: &str,
    session_key: &str,
    request: &ValidatedChatRequest,
) -> Result<TierResolution, RouteError> {
    let outcome = scorer::score(
        &request.messages,
        &request.tools,
        request.tool_choice.as_ref(),
    );
    let recent = app_state.momentum.recent_tiers(session_key);
    let outcome = momentum::damp(outcome, recent.as_deref());
    if outcome.reason != "heartbeat" {
        app_state.momentum.record_tier(session_key, outcome.tier);
    }

    let tenant = app_state.tenant(tenant_id);
    let model = tenant.resolve_model(outcome.tier, &app_state.catalog)?;
    Ok(TierResolution {
        tier: outcome.tier,
        score: outcome.score,
        confidence: outcome.confidence,
        reason: outcome.reason,
        model,
    })
}

fn provenance_headers(
    headers: &mut HeaderMap,
    resolution: &TierResolution,
    request_id: &Uuid,
) {
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = value.parse() {
            headers.insert(name, value);
        }
    };
    set("x-router-tier", resolution.tier.to_string());
    set("x-router-score", resolution.score.to_string());
    set("x-router-confidence", format!("{:.2}", resolution.confidence));
    set("x-router-reason", resolution.reason.clone());
    set("x-router-request-id", request_id.to_string());
    if let Some(entry) = &resolution.model {
        set("x-router-model", entry.model_name.clone());
        set("x-router-provider", entry.provider.clone());
    }
}

fn resolution_body(resolution: &TierResolution) -> Value {
    serde_json::json!({
        "tier": resolution.tier,
        "model": resolution.model.as_ref().map(|m| m.model_name.clone()),
        "provider": resolution.model.as_ref().map(|m| m.provider.clone()),
        "score": resolution.score,
        "confidence": resolution.confidence,
        "reason": resolution.reason,
    })
}

// "No route" is a defined null result, not an error: the caller falls back
// to its own default model.
fn no_route_response(resolution: &TierResolution, request_id: &Uuid) -> Response<Body> {
    let mut body = resolution_body(resolution);
    body["object"] = Value::String("router.no_route".to_string());
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_default();
    provenance_headers(response.headers_mut(), resolution, request_id);
    response
}

fn registry_endpoint(entry: &ModelCatalogEntry) -> Result<&'static ProviderEndpoint, RouteError> {
    PROVIDER_ENDPOINTS.get(entry.provider.as_str()).ok_or_else(|| {
        // Catalog data referencing a provider outside the static registry is
        // a data-integrity problem, not a caller mistake.
        RouteError::Internal(format!(
            "catalog provider '{}' is not in the endpoint registry",
            entry.provider
        ))
    })
}

async fn read_json_body(request: Request<Body>) -> Result<Value, RouteError> {
    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| RouteError::Validation(format!("failed to read body: {}", e)))?;
    if body.is_empty() {
        return Err(RouteError::Validation("request body is required".to_string()));
    }
    serde_json::from_slice(&body)
        .map_err(|e| RouteError::Validation(format!("failed to parse JSON body: {}", e)))
}

/// The blind proxy forward path.
pub async fn handle_chat_request(
    app_state: Arc<AppState>,
    request: Request<Body>,
) -> Result<Response<Body>, RouteError> {
    let request_id = Uuid::new_v4();
    let original_headers = request.headers().clone();

    // Step 1: identities from the authenticated front layer.
    let caller = caller_from_headers(&original_headers).ok_or_else(|| {
        RouteError::Validation("missing caller identity header".to_string())
    })?;
    let tenant_id = tenant_from_headers(&original_headers);
    let session_key = session_from_headers(&original_headers, &caller);

    // Step 2: admission. The rate check comes first so a rate-limited
    // caller never consumes a concurrency slot. The slot guard releases on
    // every exit path: early returns drop it here, and the forward path
    // hands it to the relay so it stays held while the upstream body is
    // still flowing, including cancellation when the client disconnects.
    app_state.rate_gate.check_limit(&caller)?;
    let slot = app_state.concurrency_gate.acquire_slot(&caller)?;

    // Step 3: parse and validate the body.
    let data = read_json_body(request).await?;
    let chat_request = validate_chat_request(data)?;

    // Step 4: classify and resolve the model.
    let resolution = resolve_tier(&app_state, &tenant_id, &session_key, &chat_request)?;
    debug!(
        "[{}] resolved tier {} (score {}, confidence {:.2}, reason '{}')",
        request_id, resolution.tier, resolution.score, resolution.confidence, resolution.reason
    );

    let Some(entry) = resolution.model.clone() else {
        info!(
            "[{}] no active provider can serve tier {}, returning no-route",
            request_id, resolution.tier
        );
        return Ok(no_route_response(&resolution, &request_id));
    };

    // Step 5: destination exclusively from server-side state.
    let endpoint = registry_endpoint(&entry)?;
    let tenant = app_state.tenant(&tenant_id);
    let credential = tenant
        .providers
        .credential(&entry.provider, &app_state.vault)
        .map_err(|e| {
            warn!(
                "[{}] credential for provider '{}' failed decryption",
                request_id, entry.provider
            );
            RouteError::Integrity(e)
        })?;
    let prepared = prepare_upstream_request(
        endpoint,
        &entry,
        credential.as_deref(),
        chat_request.data,
        &original_headers,
    )?;

    // Step 6: forward and relay with provenance headers.
    info!(
        "[{}] forwarding {}/{} for caller '{}'",
        request_id, entry.provider, entry.model_name, caller
    );
    let mut response = proxy_request(prepared, CONFIG.upstream_timeout(), slot).await?;
    provenance_headers(response.headers_mut(), &resolution, &request_id);
    Ok(response)
}

/// The pure resolve path: classification and model lookup without any
/// admission gating or upstream call.
pub async fn handle_resolve_request(
    app_state: Arc<AppState>,
    request: Request<Body>,
) -> Result<Response<Body>, RouteError> {
    let request_id = Uuid::new_v4();
    let original_headers = request.headers().clone();

    let caller = caller_from_headers(&original_headers)
        .unwrap_or_else(|| "anonymous".to_string());
    let tenant_id = tenant_from_headers(&original_headers);
    let session_key = session_from_headers(&original_headers, &caller);

    let data = read_json_body(request).await?;
    let chat_request = validate_chat_request(data)?;
    let resolution = resolve_tier(&app_state, &tenant_id, &session_key, &chat_request)?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(resolution_body(&resolution).to_string()))
        .map_err(|e| RouteError::Internal(format!("failed to build response: {}", e)))?;
    provenance_headers(response.headers_mut(), &resolution, &request_id);
    Ok(response)
}
