use axum::{
    body::Body,
    extract::{Request, State},
    routing::{any, post},
};

use crate::service::app_state::{StateRouter, create_state_router};

use super::handlers::{handle_chat_request, handle_resolve_request};

pub fn create_proxy_router() -> StateRouter {
    create_state_router()
        .route(
            "/v1/chat/completions",
            any(|State(app_state), request: Request<Body>| async move {
                handle_chat_request(app_state, request).await
            }),
        )
        .route(
            "/v1/route",
            post(|State(app_state), request: Request<Body>| async move {
                handle_resolve_request(app_state, request).await
            }),
        )
}
