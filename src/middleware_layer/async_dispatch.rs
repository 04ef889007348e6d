//! Async-dispatch gate: turns a marked request into a persisted task and an
//! immediate handle instead of a synchronous proxy call.
//!
//! Quota for the submission was already deducted by the billing stage; a
//! failed upstream later still consumes it (billing-before-work).

use std::collections::HashMap;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use super::{buffer_request, AuthContext};
use crate::error::{ApiError, Result};
use crate::models::Task;
use crate::state::AppState;

pub const ASYNC_HEADER: &str = "x-async";
pub const CALLBACK_URL_HEADER: &str = "x-callback-url";
pub const CALLBACK_METHOD_HEADER: &str = "x-callback-method";
pub const CALLBACK_AUTH_HEADER: &str = "x-callback-auth";

/// Headers never copied onto a task record.
const SENSITIVE_HEADERS: [&str; 5] = [
    "authorization",
    "x-api-key",
    "x-signature",
    "x-secret",
    "cookie",
];

pub async fn dispatch(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let is_async = header_value(&request, ASYNC_HEADER)
        .map(|value| value == "true")
        .unwrap_or(false);
    let callback_url = header_value(&request, CALLBACK_URL_HEADER).unwrap_or_default();

    // Not an async submission, or the async pipeline is disabled: fall
    // through to the synchronous proxy.
    if !is_async || callback_url.is_empty() {
        return Ok(next.run(request).await);
    }
    let Some(queue) = state.task_queue.clone() else {
        return Ok(next.run(request).await);
    };

    let ctx = request
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| ApiError::internal("caller context missing in async dispatch stage"))?;

    let target = state
        .config
        .target_for(&ctx.client.version)
        .ok_or_else(|| ApiError::unsupported_version(&ctx.client.version))?;
    let target_url = target.url.clone();

    let (body, request) = buffer_request(request).await?;

    let mut headers = HashMap::new();
    for (name, value) in request.headers() {
        if SENSITIVE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }

    let mut callback_headers = HashMap::new();
    if let Some(auth) = header_value(&request, CALLBACK_AUTH_HEADER) {
        callback_headers.insert("Authorization".to_string(), auth);
    }

    let task_id = Uuid::new_v4().to_string();
    let mut task = Task::new(
        task_id.clone(),
        ctx.client.id_hex(),
        ctx.api_key.clone(),
        request.method().as_str(),
        request.uri().path(),
        target_url,
        callback_url.clone(),
        headers,
        String::from_utf8_lossy(&body).into_owned(),
    );
    if let Some(method) = header_value(&request, CALLBACK_METHOD_HEADER) {
        task.callback_method = method;
    }
    task.callback_headers = callback_headers;

    if let Err(err) = state.task_repo.create(&mut task).await {
        error!(task_id = %task_id, error = %err, "failed to persist task");
        return Err(ApiError::internal("failed to create task"));
    }

    if let Err(err) = queue.enqueue(&task).await {
        error!(task_id = %task_id, error = %err, "failed to enqueue task");
        return Err(ApiError::QueueUnavailable);
    }

    info!(task_id = %task_id, client_id = %task.client_id, "task accepted");

    // The handle goes straight back to the caller; no later stage runs.
    Ok(Json(json!({
        "code": 0,
        "message": "task accepted for asynchronous processing",
        "data": {
            "task_id": task.task_id,
            "status": task.status,
            "callback_url": task.callback_url,
            "created_at": task.created_at.to_rfc3339(),
        },
    }))
    .into_response())
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}
