//! Call-log stage: captures each request outcome for audit and billing
//! reconciliation.
//!
//! The response body flows to the client unchanged while a capped tail
//! buffer accumulates alongside it. For `/stream` paths the buffer is
//! scanned as Server-Sent Events and only the last `complete`/`error` frame
//! is persisted; other paths persist the buffered body verbatim. The store
//! write happens off the request path with its own generous timeout and can
//! never affect the response.

use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error};

use super::{buffer_request, capture::observe_response_body, AuthContext};
use crate::error::{ApiError, Result};
use crate::models::CallLog;
use crate::state::AppState;

/// Upper bound on retained response bytes per request.
const CAPTURE_LIMIT: usize = 256 * 1024;

/// Detached log writes give up after this long.
const LOG_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn record_call(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let ctx = request
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| ApiError::internal("caller context missing in call log stage"))?;
    let Some(client_id) = ctx.client.id else {
        return Err(ApiError::internal("caller without id in call log stage"));
    };

    let started = Instant::now();
    let path = request.uri().path().to_string();
    let is_stream = path.contains("/stream");

    let (body, request) = buffer_request(request).await?;
    let request_body = String::from_utf8_lossy(&body).into_owned();

    let response = next.run(request).await;
    let status = response.status().as_u16() as i32;

    let repo = state.call_log_repo.clone();
    let api_key = ctx.api_key.clone();

    Ok(observe_response_body(
        response,
        CAPTURE_LIMIT,
        move |captured, _total| {
            let response_body = if is_stream {
                extract_final_stream_frame(&captured).unwrap_or_default()
            } else {
                String::from_utf8_lossy(&captured).into_owned()
            };

            let entry = CallLog::new(
                client_id,
                api_key,
                path,
                status,
                started.elapsed().as_millis() as i64,
                request_body,
                response_body,
            );

            tokio::spawn(async move {
                match tokio::time::timeout(LOG_WRITE_TIMEOUT, repo.create(&entry)).await {
                    Ok(Ok(())) => debug!(
                        path = %entry.path,
                        status = entry.status,
                        duration_ms = entry.duration,
                        "call logged"
                    ),
                    Ok(Err(err)) => error!(error = %err, "failed to write call log"),
                    Err(_) => error!("call log write timed out"),
                }
            });
        },
    ))
}

/// Scan an SSE body for `data: <json>` frames and return the last one whose
/// `type` field is `complete` or `error`.
fn extract_final_stream_frame(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let mut last_terminal = None;

    for line in text.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };

        let Ok(frame) = serde_json::from_str::<serde_json::Value>(data) else {
            continue;
        };

        if matches!(frame["type"].as_str(), Some("complete") | Some("error")) {
            last_terminal = Some(data.to_string());
        }
    }

    last_terminal
}
