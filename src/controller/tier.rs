use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::HeaderMap,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::routing::tier::Tier;
use crate::service::app_state::{AppState, StateRouter, create_state_router};
use crate::utils::{HttpResult, tenant_from_headers};

use super::BaseError;

#[derive(Serialize)]
struct TierView {
    tier: Tier,
    auto_assigned_model: Option<String>,
    override_model: Option<String>,
    effective_model: Option<String>,
}

// Tier names arrive as freeform path strings; parsing into the closed enum
// here is the boundary that keeps unknown values out of the manager.
fn parse_tier(name: &str) -> Result<Tier, BaseError> {
    Tier::from_str(name)
        .map_err(|_| BaseError::ParamInvalid(Some(format!("unknown tier '{}'", name))))
}

async fn list(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<Vec<TierView>>, BaseError> {
    let tenant = app_state.tenant(&tenant_from_headers(&headers));
    let snapshot = tenant.assignments.snapshot()?;
    let mut views = Vec::new();
    for tier in Tier::iter() {
        let assignment = snapshot.get(&tier).cloned().unwrap_or_default();
        views.push(TierView {
            tier,
            effective_model: assignment.effective().map(str::to_string),
            auto_assigned_model: assignment.auto_assigned_model,
            override_model: assignment.override_model,
        });
    }
    Ok(HttpResult::new(views))
}

#[derive(Deserialize)]
struct OverridePayload {
    model: String,
}

async fn set_override(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<OverridePayload>,
) -> Result<HttpResult<()>, BaseError> {
    let tier = parse_tier(&name)?;
    let tenant = app_state.tenant(&tenant_from_headers(&headers));
    tenant.assignments.set_override(tier, &payload.model)?;
    Ok(HttpResult::new(()))
}

async fn clear_override(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<HttpResult<()>, BaseError> {
    let tier = parse_tier(&name)?;
    let tenant = app_state.tenant(&tenant_from_headers(&headers));
    tenant.assignments.clear_override(tier)?;
    Ok(HttpResult::new(()))
}

async fn reset_all(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<()>, BaseError> {
    let tenant = app_state.tenant(&tenant_from_headers(&headers));
    tenant.assignments.reset_all()?;
    Ok(HttpResult::new(()))
}

pub fn create_tier_router() -> StateRouter {
    create_state_router()
        .route("/tiers", get(list))
        .route(
            "/tiers/{tier}/override",
            put(set_override).delete(clear_override),
        )
        .route("/tiers/reset", post(reset_all))
}
