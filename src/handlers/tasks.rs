//! Owner-scoped task query surface.
//!
//! A caller can only read tasks it submitted; anything else is a 403
//! regardless of whether the task exists.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, Result};
use crate::middleware_layer::AuthContext;
use crate::models::Task;
use crate::state::AppState;

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: u64,
}

fn default_limit() -> i64 {
    10
}

/// GET /api/tasks/:task_id
pub async fn get_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>> {
    let task = load_owned_task(&state, &ctx, &task_id).await?;

    Ok(Json(json!({
        "code": 20000,
        "message": "success",
        "data": task_json(&task),
    })))
}

/// GET /api/tasks/:task_id/status returns the condensed view.
pub async fn get_task_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>> {
    let task = load_owned_task(&state, &ctx, &task_id).await?;

    Ok(Json(json!({
        "code": 20000,
        "message": "success",
        "data": {
            "task_id": task.task_id,
            "status": task.status,
            "created_at": task.created_at.to_rfc3339(),
            "completed_at": task.completed_at.map(|at| at.to_rfc3339()),
            "result": task.result,
            "error": task.error_message,
        },
    })))
}

/// GET /api/tasks?limit=&offset=
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Value>> {
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);

    let tasks = state
        .task_repo
        .list_by_client(&ctx.client.id_hex(), limit, query.offset)
        .await?;

    Ok(Json(json!({
        "code": 20000,
        "message": "success",
        "data": {
            "tasks": tasks.iter().map(task_json).collect::<Vec<_>>(),
            "limit": limit,
            "offset": query.offset,
        },
    })))
}

async fn load_owned_task(state: &AppState, ctx: &AuthContext, task_id: &str) -> Result<Task> {
    let task = state
        .task_repo
        .get_by_task_id(task_id)
        .await?
        .ok_or(ApiError::TaskNotFound)?;

    if task.client_id != ctx.client.id_hex() {
        return Err(ApiError::TaskForbidden);
    }
    Ok(task)
}

/// Full task view for API responses; timestamps as RFC 3339.
fn task_json(task: &Task) -> Value {
    json!({
        "task_id": task.task_id,
        "client_id": task.client_id,
        "method": task.method,
        "path": task.path,
        "target_url": task.target_url,
        "callback_url": task.callback_url,
        "callback_method": task.callback_method,
        "status": task.status,
        "result": task.result,
        "error_message": task.error_message,
        "status_code": task.status_code,
        "callback_attempts": task.callback_attempts,
        "callback_status": task.callback_status,
        "last_callback_at": task.last_callback_at.map(|at| at.to_rfc3339()),
        "created_at": task.created_at.to_rfc3339(),
        "started_at": task.started_at.map(|at| at.to_rfc3339()),
        "completed_at": task.completed_at.map(|at| at.to_rfc3339()),
        "expire_at": task.expire_at.to_rfc3339(),
    })
}
