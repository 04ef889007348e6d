//! Billing stages: quota check before the handler, deduction after it.
//!
//! Deduction is billed once per final 200 response, which includes accepted
//! async submissions. A deduction failure is logged and swallowed; the
//! response is already decided at that point and must not change.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, info};

use super::{AuthContext, QuotaChecked, STORE_TIMEOUT};
use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Reject callers whose pre-paid balance is exhausted and stamp the request
/// scope for the deduction stage.
pub async fn check_quota(
    State(_state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let ctx = request
        .extensions()
        .get::<AuthContext>()
        .ok_or_else(|| ApiError::internal("caller context missing in quota check stage"))?;

    if !ctx.client.has_calls_remaining() {
        info!(
            client_id = %ctx.client.id_hex(),
            remaining = ctx.client.call_count,
            "quota check failed"
        );
        return Err(ApiError::insufficient_calls(
            ctx.client.id_hex(),
            ctx.client.call_count,
        ));
    }

    debug!(
        client_id = %ctx.client.id_hex(),
        remaining = ctx.client.call_count,
        "quota check passed"
    );
    request.extensions_mut().insert(QuotaChecked {
        started_at: Instant::now(),
    });

    Ok(next.run(request).await)
}

/// Deduct one call if and only if the final response status is 200.
pub async fn deduct_on_success(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = request.extensions().get::<AuthContext>().cloned();
    let checked = request.extensions().get::<QuotaChecked>().copied();

    let response = next.run(request).await;

    if response.status() != StatusCode::OK {
        debug!(status = %response.status(), "skipping quota deduction");
        return response;
    }

    let Some(checked) = checked else {
        error!("quota deduction reached without a prior quota check");
        return response;
    };

    let Some(ctx) = ctx else {
        error!("caller context missing during quota deduction");
        return response;
    };
    let Some(client_id) = ctx.client.id else {
        error!("caller without id during quota deduction");
        return response;
    };

    match tokio::time::timeout(STORE_TIMEOUT, state.client_repo.deduct_call_count(client_id)).await
    {
        Ok(Ok(())) => {
            debug!(
                client_id = %client_id.to_hex(),
                elapsed_ms = checked.started_at.elapsed().as_millis() as u64,
                "deducted one call"
            );
        }
        Ok(Err(err)) => {
            error!(client_id = %client_id.to_hex(), error = %err, "quota deduction failed");
        }
        Err(_) => {
            error!(client_id = %client_id.to_hex(), "quota deduction timed out");
        }
    }

    response
}
