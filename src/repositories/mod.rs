//! Persistence contracts and their MongoDB implementations.
//!
//! The middleware chain and handlers only see the traits; the Mongo-backed
//! implementations bootstrap their own indexes at construction. The single
//! hard contract here is `ClientRepository::deduct_call_count`, which must
//! be atomic and conditional on a positive balance.

mod call_logs;
mod clients;
mod tasks;

pub use call_logs::CallLogMongoRepository;
pub use clients::ClientMongoRepository;
pub use tasks::TaskMongoRepository;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use serde::Serialize;

use crate::error::Result;
use crate::models::{CallLog, Client, Task, TaskStatus};

/// Collection names.
pub const CLIENTS_COLLECTION: &str = "gw_clients";
pub const CALL_LOGS_COLLECTION: &str = "gw_call_logs";
pub const TASKS_COLLECTION: &str = "tasks";

/// Aggregated caller statistics for the admin surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientStats {
    pub total_clients: i64,
    pub active_clients: i64,
    pub disabled_clients: i64,
    pub total_calls_used: i64,
}

/// Caller store (C1).
#[async_trait]
pub trait ClientRepository: Send + Sync {
    /// Insert a new caller; assigns `client.id`.
    async fn create(&self, client: &mut Client) -> Result<()>;

    async fn get_by_id(&self, id: ObjectId) -> Result<Option<Client>>;

    async fn get_by_api_key(&self, api_key: &str) -> Result<Option<Client>>;

    async fn update(&self, client: &Client) -> Result<()>;

    /// Paged listing, newest first.
    async fn list(&self, offset: u64, limit: i64) -> Result<Vec<Client>>;

    /// Add `delta` to the remaining quota; positive deltas also add to the
    /// cumulative purchased total.
    async fn update_call_count(&self, id: ObjectId, delta: i64) -> Result<()>;

    /// Atomically decrement the remaining quota by one. Fails with
    /// `insufficient_calls` when the caller is absent or the balance is zero;
    /// the balance never goes negative.
    async fn deduct_call_count(&self, id: ObjectId) -> Result<()>;

    async fn update_qps(&self, id: ObjectId, qps: i64) -> Result<()>;

    async fn update_status(&self, id: ObjectId, status: i32) -> Result<()>;

    async fn delete(&self, id: ObjectId) -> Result<()>;

    async fn stats(&self) -> Result<ClientStats>;
}

/// Append-only call-log store (C2).
#[async_trait]
pub trait CallLogRepository: Send + Sync {
    async fn create(&self, log: &CallLog) -> Result<()>;

    async fn get_by_client_id(
        &self,
        client_id: ObjectId,
        offset: u64,
        limit: i64,
    ) -> Result<Vec<CallLog>>;

    async fn get_by_api_key(&self, api_key: &str, offset: u64, limit: i64)
        -> Result<Vec<CallLog>>;

    async fn list(&self, offset: u64, limit: i64) -> Result<Vec<CallLog>>;
}

/// Task store (C3).
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task; assigns `task.id`. `task_id` is unique.
    async fn create(&self, task: &mut Task) -> Result<()>;

    async fn get_by_task_id(&self, task_id: &str) -> Result<Option<Task>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Task>>;

    /// Full replace keyed by `task_id`.
    async fn update(&self, task: &Task) -> Result<()>;

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    /// Record the terminal callback delivery outcome without touching the
    /// attempt counter.
    async fn update_callback_status(&self, task_id: &str, callback_status: &str) -> Result<()>;

    /// Paged listing for one caller, newest first.
    async fn list_by_client(
        &self,
        client_id: &str,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<Task>>;

    /// Bump `callback_attempts` and stamp `last_callback_at`.
    async fn increment_callback_attempts(&self, task_id: &str) -> Result<()>;

    /// Manual fallback for the TTL index; returns the number of reaped tasks.
    async fn delete_expired(&self) -> Result<u64>;
}
