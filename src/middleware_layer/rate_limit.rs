//! Rate-limit stage: one token per request from the caller's bucket.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::AuthContext;
use crate::error::{ApiError, Result};
use crate::state::AppState;

pub async fn enforce(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let ctx = request
        .extensions()
        .get::<AuthContext>()
        .ok_or_else(|| ApiError::internal("caller context missing in rate limit stage"))?;

    let client_id = ctx.client.id_hex();
    let qps = u32::try_from(ctx.client.qps.max(1)).unwrap_or(u32::MAX);

    if !state.rate_limiter.try_acquire(&client_id, qps) {
        warn!(client_id = %client_id, qps, "rate limit exceeded");
        return Err(ApiError::rate_limit_exceeded(client_id, qps));
    }

    Ok(next.run(request).await)
}
