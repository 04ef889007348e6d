//! Admin surface: caller CRUD, quota top-ups and gateway statistics.
//!
//! Unauthenticated by design in the core gateway; deployments front this
//! group with their own access control.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use mongodb::bson::oid::ObjectId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::{ApiError, Result};
use crate::models::{CallLog, Client};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub initial_call_count: i64,
    #[serde(default)]
    pub qps: Option<i64>,
}

/// Create response; the only place the secret is ever returned.
#[derive(Debug, Serialize)]
pub struct CreateClientResponse {
    pub id: String,
    pub name: String,
    pub api_key: String,
    pub secret: String,
    pub version: String,
    pub call_count: i64,
    pub qps: i64,
    pub status: i32,
    pub created_at: String,
}

/// Caller view without credentials.
#[derive(Debug, Serialize)]
pub struct ClientView {
    pub id: String,
    pub name: String,
    pub api_key: String,
    pub version: String,
    pub call_count: i64,
    pub total_count: i64,
    pub qps: i64,
    pub status: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl ClientView {
    fn from_client(client: &Client) -> Self {
        Self {
            id: client.id_hex(),
            name: client.name.clone(),
            api_key: client.api_key.clone(),
            version: client.version.clone(),
            call_count: client.call_count,
            total_count: client.total_count,
            qps: client.qps,
            status: client.status,
            created_at: client.created_at.to_rfc3339(),
            updated_at: client.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RechargeRequest {
    pub call_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQpsRequest {
    pub qps: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_page_size")]
    pub limit: i64,
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// POST /admin/clients
pub async fn create_client(
    State(state): State<AppState>,
    Json(request): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<CreateClientResponse>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    if request.version.trim().is_empty() {
        return Err(ApiError::validation("version is required"));
    }
    if request.initial_call_count < 0 {
        return Err(ApiError::validation("initial_call_count must be >= 0"));
    }
    if let Some(qps) = request.qps {
        validate_qps(qps)?;
    }

    let mut api_key = generate_api_key();
    // A collision is vanishingly unlikely under a unique index; one
    // regeneration keeps creation single-shot.
    if state.client_repo.get_by_api_key(&api_key).await?.is_some() {
        api_key = generate_api_key();
    }
    let secret = generate_secret();

    let mut client = Client::new(
        request.name.trim(),
        api_key,
        secret,
        request.version.trim(),
        request.initial_call_count,
    );
    if let Some(qps) = request.qps {
        client.qps = qps;
    }

    state.client_repo.create(&mut client).await?;
    info!(client_id = %client.id_hex(), name = %client.name, "client created");

    let response = CreateClientResponse {
        id: client.id_hex(),
        name: client.name.clone(),
        api_key: client.api_key.clone(),
        secret: client.secret.clone(),
        version: client.version.clone(),
        call_count: client.call_count,
        qps: client.qps,
        status: client.status,
        created_at: client.created_at.to_rfc3339(),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /admin/clients
pub async fn list_clients(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>> {
    let limit = page.limit.clamp(1, MAX_PAGE_SIZE);
    let clients = state.client_repo.list(page.offset, limit).await?;

    let views: Vec<_> = clients.iter().map(ClientView::from_client).collect();
    Ok(Json(json!({
        "clients": views,
        "offset": page.offset,
        "limit": limit,
        "count": views.len(),
    })))
}

/// GET /admin/clients/:id
pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClientView>> {
    let client = load_client(&state, &id).await?;
    Ok(Json(ClientView::from_client(&client)))
}

/// POST /admin/clients/:id/recharge
pub async fn recharge_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RechargeRequest>,
) -> Result<Json<Value>> {
    if request.call_count < 1 {
        return Err(ApiError::validation("call_count must be >= 1"));
    }

    let object_id = parse_client_id(&id)?;
    state
        .client_repo
        .update_call_count(object_id, request.call_count)
        .await?;
    info!(client_id = %id, amount = request.call_count, "client recharged");

    let client = load_client(&state, &id).await?;
    Ok(Json(json!({
        "message": "client recharged successfully",
        "client": ClientView::from_client(&client),
    })))
}

/// PUT /admin/clients/:id/status
pub async fn update_client_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<ClientView>> {
    if !(0..=1).contains(&request.status) {
        return Err(ApiError::validation("status must be 0 or 1"));
    }

    let object_id = parse_client_id(&id)?;
    state
        .client_repo
        .update_status(object_id, request.status)
        .await?;
    info!(client_id = %id, status = request.status, "client status updated");

    let client = load_client(&state, &id).await?;
    Ok(Json(ClientView::from_client(&client)))
}

/// PUT /admin/clients/:id/qps
pub async fn update_client_qps(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateQpsRequest>,
) -> Result<Json<ClientView>> {
    validate_qps(request.qps)?;

    let object_id = parse_client_id(&id)?;
    state.client_repo.update_qps(object_id, request.qps).await?;
    info!(client_id = %id, qps = request.qps, "client qps updated");

    let client = load_client(&state, &id).await?;
    Ok(Json(ClientView::from_client(&client)))
}

/// GET /admin/clients/:id/logs
pub async fn get_client_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>> {
    let object_id = parse_client_id(&id)?;
    let limit = page.limit.clamp(1, MAX_PAGE_SIZE);

    let logs = state
        .call_log_repo
        .get_by_client_id(object_id, page.offset, limit)
        .await?;

    Ok(Json(json!({
        "logs": logs.iter().map(call_log_json).collect::<Vec<_>>(),
        "offset": page.offset,
        "limit": limit,
        "count": logs.len(),
    })))
}

/// GET /admin/stats
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let stats = state.client_repo.stats().await?;
    let mut value = serde_json::to_value(stats)?;

    if let Some(queue) = &state.task_queue {
        if let Ok(depth) = queue.size().await {
            value["queue_depth"] = json!(depth);
        }
    }

    Ok(Json(value))
}

async fn load_client(state: &AppState, id: &str) -> Result<Client> {
    let object_id = parse_client_id(id)?;
    state
        .client_repo
        .get_by_id(object_id)
        .await?
        .ok_or_else(|| ApiError::not_found("client"))
}

fn parse_client_id(id: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| ApiError::validation(format!("invalid client id: {id}")))
}

fn validate_qps(qps: i64) -> Result<()> {
    if !(1..=1000).contains(&qps) {
        return Err(ApiError::validation("qps must be between 1 and 1000"));
    }
    Ok(())
}

fn call_log_json(log: &CallLog) -> Value {
    json!({
        "client_id": log.client_id.to_hex(),
        "api_key": log.api_key,
        "path": log.path,
        "status": log.status,
        "duration": log.duration,
        "request_body": log.request_body,
        "response_body": log.response_body,
        "created_at": log.created_at.to_rfc3339(),
    })
}

fn generate_api_key() -> String {
    format!("ak_{}", random_hex(32))
}

fn generate_secret() -> String {
    random_hex(32)
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|byte| format!("{byte:02x}")).collect()
}
