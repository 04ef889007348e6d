//! The authenticated `/api` group.
//!
//! The task-query surface owns its routes; every other path is an opaque
//! pass-through into the proxy engine. The middleware stack wraps both in
//! the fixed pipeline order.

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower::ServiceBuilder;

use crate::handlers::{health, proxy, tasks};
use crate::middleware_layer::{async_dispatch, auth, billing, call_log, metrics, rate_limit};
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    let pipeline = ServiceBuilder::new()
        .layer(from_fn_with_state(state.clone(), auth::authenticate))
        .layer(from_fn_with_state(state.clone(), rate_limit::enforce))
        .layer(from_fn_with_state(state.clone(), billing::check_quota))
        .layer(from_fn_with_state(state.clone(), billing::deduct_on_success))
        .layer(from_fn_with_state(state.clone(), call_log::record_call))
        .layer(from_fn_with_state(state.clone(), async_dispatch::dispatch))
        .layer(from_fn_with_state(state, metrics::track));

    let protected = Router::new()
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/:task_id", get(tasks::get_task))
        .route("/tasks/:task_id/status", get(tasks::get_task_status))
        .fallback(proxy::proxy_request)
        .layer(pipeline);

    Router::new()
        .route("/health", get(health::health_check))
        .merge(protected)
}
