//! API Gateway Library
//!
//! Mediates client access to versioned upstream HTTP services: API-key
//! authentication, HMAC request signing, per-caller rate limiting, pre-paid
//! quota billing, request proxying (streaming and buffered) and an
//! asynchronous task pipeline with callback delivery.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware_layer;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{ApiError, Result};
pub use state::AppState;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, request_id::SetRequestIdLayer, trace::TraceLayer};

/// Build the main application router with all middleware and routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", routes::api::router(state.clone()))
        .nest("/admin", routes::admin::router())
        .merge(routes::public::router())
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(SetRequestIdLayer::x_request_id(
                    tower_http::request_id::MakeRequestUuid,
                ))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}
