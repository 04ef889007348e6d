//! The ordered middleware chain for the `/api` group.
//!
//! Stages run strictly in this order: authenticate (with optional signature
//! check) → rate limit → quota check → quota deduct on success → call log →
//! async dispatch → metrics. Each stage short-circuits with an error
//! envelope; later stages never run after a rejection.

pub mod async_dispatch;
pub mod auth;
pub mod billing;
pub mod call_log;
pub mod capture;
pub mod metrics;
pub mod rate_limit;

use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use bytes::Bytes;

use crate::error::{ApiError, Result};
use crate::models::Client;

/// Store lookups on the request path give up after this long.
pub(crate) const STORE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Authenticated caller attached to the request scope by the auth stage.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub client: Client,
    pub api_key: String,
}

/// Marker set by the quota-check stage; the deduct stage refuses to bill a
/// request that never passed the check.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QuotaChecked {
    pub started_at: Instant,
}

/// Read the full request body and hand back a request that still carries it,
/// so later stages and the proxy can read it again.
pub(crate) async fn buffer_request(request: Request) -> Result<(Bytes, Request)> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| ApiError::internal(format!("failed to read request body: {err}")))?;
    let request = Request::from_parts(parts, Body::from(bytes.clone()));
    Ok((bytes, request))
}
