use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::HeaderMap,
    routing::{get, post},
};
use cyder_tools::log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::proxy::endpoints::resolve_endpoint_key;
use crate::routing::assignment::OverrideReversion;
use crate::service::app_state::{AppState, StateRouter, create_state_router};
use crate::service::providers::ProviderSummary;
use crate::utils::{HttpResult, tenant_from_headers};

use super::BaseError;

async fn list(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResult<Vec<ProviderSummary>> {
    let tenant = app_state.tenant(&tenant_from_headers(&headers));
    HttpResult::new(tenant.providers.list())
}

#[derive(Deserialize, Default)]
struct ConnectPayload {
    /// Optional on reconnect; a stored credential is kept when absent.
    api_key: Option<String>,
}

#[derive(Serialize)]
struct DisconnectResult {
    provider: String,
    was_active: bool,
    reversions: Vec<OverrideReversion>,
}

async fn connect(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    payload: Option<Json<ConnectPayload>>,
) -> Result<HttpResult<ProviderSummary>, BaseError> {
    let provider = resolve_endpoint_key(&name).ok_or_else(|| {
        warn!("Rejected connect for unknown provider '{}'", name);
        BaseError::ParamInvalid(Some(format!("unknown provider '{}'", name)))
    })?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    if let Some(key) = payload.api_key.as_deref() {
        if key.trim().is_empty() {
            return Err(BaseError::ParamInvalid(Some(
                "api_key must not be empty when provided".to_string(),
            )));
        }
    }

    let tenant = app_state.tenant(&tenant_from_headers(&headers));
    let summary = tenant
        .providers
        .connect(provider, payload.api_key.as_deref(), &app_state.vault)?;
    tenant
        .assignments
        .recompute(&app_state.catalog, &tenant.providers.active_providers())?;
    Ok(HttpResult::new(summary))
}

async fn disconnect(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<HttpResult<DisconnectResult>, BaseError> {
    let provider = resolve_endpoint_key(&name)
        .ok_or_else(|| BaseError::ParamInvalid(Some(format!("unknown provider '{}'", name))))?;

    let tenant = app_state.tenant(&tenant_from_headers(&headers));
    let was_active = tenant.providers.disconnect(provider);
    let reversions = tenant.assignments.handle_disconnect(
        &app_state.catalog,
        provider,
        &tenant.providers.active_providers(),
    )?;
    for reversion in &reversions {
        info!("{}", reversion.message);
    }
    Ok(HttpResult::new(DisconnectResult {
        provider: provider.to_string(),
        was_active,
        reversions,
    }))
}

pub fn create_provider_router() -> StateRouter {
    create_state_router()
        .route("/providers", get(list))
        .route("/providers/{name}/connect", post(connect))
        .route("/providers/{name}/disconnect", post(disconnect))
}
