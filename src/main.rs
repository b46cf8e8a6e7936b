use std::net::SocketAddr;

use config::CONFIG;
use controller::{create_manager_router, handle_404};
use proxy::create_proxy_router;
use crate::service::app_state::{create_app_state, create_state_router};

use cyder_tools::log::{LocalLogger, info};

mod config;
mod controller;
mod proxy;
mod routing;
mod service;
mod utils;

#[tokio::main]
async fn main() {
    LocalLogger::init(&CONFIG.log_level);
    let addr = format!("{}:{}", &CONFIG.host, CONFIG.port);
    info!("router start at {}", &addr);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    let app_state = create_app_state();
    let shutdown_state = app_state.clone();
    axum::serve(
        listener,
        create_state_router()
            .nest(
                &CONFIG.base_path,
                create_manager_router().merge(create_proxy_router()),
            )
            .fallback(handle_404)
            .with_state(app_state)
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, disposing background state");
        shutdown_state.shutdown();
    })
    .await
    .expect("failed to start server");
}
