use axum::{http, response::IntoResponse};

use crate::service::app_state::{StateRouter, create_state_router};

use model::create_model_router;
use provider::create_provider_router;
use tier::create_tier_router;

mod error;
mod model;
mod provider;
mod tier;

pub use error::BaseError;

pub fn create_manager_router() -> StateRouter {
    let api_router = create_state_router().nest(
        "/api",
        create_state_router()
            .merge(create_provider_router())
            .merge(create_tier_router())
            .merge(create_model_router()),
    );

    create_state_router().nest("/manager", api_router)
}

pub async fn handle_404() -> impl IntoResponse {
    (http::StatusCode::NOT_FOUND, "not found")
}
