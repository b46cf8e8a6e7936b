use std::sync::Arc;

use axum::{
    extract::{Json, State},
    routing::get,
};
use cyder_tools::log::info;
use serde::Serialize;

use crate::service::app_state::{AppState, StateRouter, create_state_router};
use crate::service::catalog::ModelCatalogEntry;
use crate::utils::HttpResult;

use super::BaseError;

#[derive(Serialize)]
struct CatalogView {
    models: Vec<ModelCatalogEntry>,
}

async fn list(
    State(app_state): State<Arc<AppState>>,
) -> Result<HttpResult<CatalogView>, BaseError> {
    let models = app_state
        .catalog
        .list()?
        .iter()
        .map(|m| (**m).clone())
        .collect();
    Ok(HttpResult::new(CatalogView { models }))
}

// Full-snapshot refresh pushed by the external pricing cache.
async fn replace(
    State(app_state): State<Arc<AppState>>,
    Json(models): Json<Vec<ModelCatalogEntry>>,
) -> Result<HttpResult<usize>, BaseError> {
    if models.is_empty() {
        return Err(BaseError::ParamInvalid(Some(
            "catalog refresh must contain at least one model".to_string(),
        )));
    }
    let count = models.len();
    app_state.catalog.replace_all(models)?;
    info!("Model catalog refreshed with {} entries", count);
    Ok(HttpResult::new(count))
}

pub fn create_model_router() -> StateRouter {
    create_state_router().route("/models", get(list).put(replace))
}
