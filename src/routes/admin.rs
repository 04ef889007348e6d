//! The `/admin` group: caller management and gateway statistics.

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::admin;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/clients",
            post(admin::create_client).get(admin::list_clients),
        )
        .route("/clients/:id", get(admin::get_client))
        .route("/clients/:id/status", put(admin::update_client_status))
        .route("/clients/:id/qps", put(admin::update_client_qps))
        .route("/clients/:id/recharge", post(admin::recharge_client))
        .route("/clients/:id/logs", get(admin::get_client_logs))
        .route("/stats", get(admin::get_stats))
}
