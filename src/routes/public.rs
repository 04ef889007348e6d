//! Public routes that bypass authentication.

use axum::{routing::get, Router};

use crate::handlers::health;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(health::metrics))
}
