//! Shared test fixtures: in-memory store/queue implementations and helpers
//! for standing up upstream and callback HTTP servers.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use mongodb::bson::oid::ObjectId;
use tokio_util::sync::CancellationToken;

use api_gateway::config::{Config, TargetConfig};
use api_gateway::error::{ApiError, Result};
use api_gateway::models::{CallLog, Client, Task, TaskStatus};
use api_gateway::repositories::{
    CallLogRepository, ClientRepository, ClientStats, TaskRepository,
};
use api_gateway::services::metrics::MetricsService;
use api_gateway::services::queue::TaskQueue;
use api_gateway::services::rate_limiter::RateLimiterService;
use api_gateway::services::signature::HmacSignatureVerifier;
use api_gateway::state::{create_http_client, AppState};

// ---------------------------------------------------------------------------
// In-memory caller store

#[derive(Default)]
pub struct InMemoryClientRepo {
    clients: Mutex<HashMap<ObjectId, Client>>,
}

impl InMemoryClientRepo {
    pub fn client(&self, id: ObjectId) -> Option<Client> {
        self.clients.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl ClientRepository for InMemoryClientRepo {
    async fn create(&self, client: &mut Client) -> Result<()> {
        let id = client.id.unwrap_or_else(ObjectId::new);
        client.id = Some(id);
        self.clients.lock().unwrap().insert(id, client.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: ObjectId) -> Result<Option<Client>> {
        Ok(self.clients.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_api_key(&self, api_key: &str) -> Result<Option<Client>> {
        Ok(self
            .clients
            .lock()
            .unwrap()
            .values()
            .find(|client| client.api_key == api_key)
            .cloned())
    }

    async fn update(&self, client: &Client) -> Result<()> {
        let id = client.id.expect("client must have an id");
        self.clients.lock().unwrap().insert(id, client.clone());
        Ok(())
    }

    async fn list(&self, offset: u64, limit: i64) -> Result<Vec<Client>> {
        let mut clients: Vec<_> = self.clients.lock().unwrap().values().cloned().collect();
        clients.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(clients
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update_call_count(&self, id: ObjectId, delta: i64) -> Result<()> {
        let mut clients = self.clients.lock().unwrap();
        let client = clients.get_mut(&id).ok_or(ApiError::not_found("client"))?;
        client.call_count += delta;
        if delta > 0 {
            client.total_count += delta;
        }
        Ok(())
    }

    async fn deduct_call_count(&self, id: ObjectId) -> Result<()> {
        // Mutex-held read-check-write mirrors the conditional atomic update.
        let mut clients = self.clients.lock().unwrap();
        match clients.get_mut(&id) {
            Some(client) if client.call_count > 0 => {
                client.call_count -= 1;
                Ok(())
            }
            _ => Err(ApiError::insufficient_calls(id.to_hex(), 0)),
        }
    }

    async fn update_qps(&self, id: ObjectId, qps: i64) -> Result<()> {
        let mut clients = self.clients.lock().unwrap();
        let client = clients.get_mut(&id).ok_or(ApiError::not_found("client"))?;
        client.qps = qps;
        Ok(())
    }

    async fn update_status(&self, id: ObjectId, status: i32) -> Result<()> {
        let mut clients = self.clients.lock().unwrap();
        let client = clients.get_mut(&id).ok_or(ApiError::not_found("client"))?;
        client.status = status;
        Ok(())
    }

    async fn delete(&self, id: ObjectId) -> Result<()> {
        self.clients
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(ApiError::not_found("client"))
    }

    async fn stats(&self) -> Result<ClientStats> {
        let clients = self.clients.lock().unwrap();
        let total_clients = clients.len() as i64;
        let active_clients = clients.values().filter(|c| c.is_active()).count() as i64;
        Ok(ClientStats {
            total_clients,
            active_clients,
            disabled_clients: total_clients - active_clients,
            total_calls_used: clients
                .values()
                .map(|c| c.total_count - c.call_count)
                .sum(),
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory call-log store

#[derive(Default)]
pub struct InMemoryCallLogRepo {
    logs: Mutex<Vec<CallLog>>,
}

impl InMemoryCallLogRepo {
    pub fn entries(&self) -> Vec<CallLog> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallLogRepository for InMemoryCallLogRepo {
    async fn create(&self, log: &CallLog) -> Result<()> {
        self.logs.lock().unwrap().push(log.clone());
        Ok(())
    }

    async fn get_by_client_id(
        &self,
        client_id: ObjectId,
        offset: u64,
        limit: i64,
    ) -> Result<Vec<CallLog>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.client_id == client_id)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_by_api_key(
        &self,
        api_key: &str,
        offset: u64,
        limit: i64,
    ) -> Result<Vec<CallLog>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.api_key == api_key)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list(&self, offset: u64, limit: i64) -> Result<Vec<CallLog>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// In-memory task store

#[derive(Default)]
pub struct InMemoryTaskRepo {
    tasks: Mutex<HashMap<String, Task>>,
}

impl InMemoryTaskRepo {
    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(task_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepo {
    async fn create(&self, task: &mut Task) -> Result<()> {
        task.id = Some(ObjectId::new());
        self.tasks
            .lock()
            .unwrap()
            .insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get_by_task_id(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(task_id).cloned())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
        let object_id = ObjectId::parse_str(id)
            .map_err(|_| ApiError::validation(format!("invalid task id: {id}")))?;
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .find(|task| task.id == Some(object_id))
            .cloned())
    }

    async fn update(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(stored) = tasks.get_mut(&task.task_id) {
            // Preserve counters owned by targeted updates.
            let attempts = stored.callback_attempts;
            let last_callback_at = stored.last_callback_at;
            let callback_status = stored.callback_status.clone();
            *stored = task.clone();
            stored.callback_attempts = attempts;
            stored.last_callback_at = last_callback_at;
            if stored.callback_status.is_none() {
                stored.callback_status = callback_status;
            }
        }
        Ok(())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
            task.status = status;
        }
        Ok(())
    }

    async fn update_callback_status(&self, task_id: &str, callback_status: &str) -> Result<()> {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
            task.callback_status = Some(callback_status.to_string());
        }
        Ok(())
    }

    async fn list_by_client(
        &self,
        client_id: &str,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<Task>> {
        let mut tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| task.client_id == client_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn increment_callback_attempts(&self, task_id: &str) -> Result<()> {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
            task.callback_attempts += 1;
            task.last_callback_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = chrono::Utc::now();
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|_, task| task.expire_at > now);
        Ok((before - tasks.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// In-memory FIFO queue

#[derive(Default)]
pub struct InMemoryQueue {
    items: Mutex<VecDeque<Task>>,
    pub fail_enqueue: std::sync::atomic::AtomicBool,
}

impl InMemoryQueue {
    pub fn depth(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, task: &Task) -> Result<()> {
        if self.fail_enqueue.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ApiError::QueueUnavailable);
        }
        self.items.lock().unwrap().push_back(task.clone());
        Ok(())
    }

    async fn dequeue(&self, shutdown: &CancellationToken) -> Result<Option<Task>> {
        // Short bounded poll standing in for the queue's blocking pop.
        for _ in 0..100 {
            if shutdown.is_cancelled() {
                return Err(ApiError::Cancelled);
            }
            if let Some(task) = self.items.lock().unwrap().pop_front() {
                return Ok(Some(task));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(None)
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.depth() as u64)
    }

    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// State and server helpers

pub struct TestHarness {
    pub state: AppState,
    pub clients: Arc<InMemoryClientRepo>,
    pub call_logs: Arc<InMemoryCallLogRepo>,
    pub tasks: Arc<InMemoryTaskRepo>,
    pub queue: Arc<InMemoryQueue>,
}

/// Build an AppState over in-memory stores with the given targets.
pub fn harness_with_config(mut config: Config) -> TestHarness {
    let clients = Arc::new(InMemoryClientRepo::default());
    let call_logs = Arc::new(InMemoryCallLogRepo::default());
    let tasks = Arc::new(InMemoryTaskRepo::default());
    let queue = Arc::new(InMemoryQueue::default());
    config.async_tasks.enabled = true;

    let state = AppState {
        config: Arc::new(config),
        db_client: None,
        client_repo: clients.clone(),
        call_log_repo: call_logs.clone(),
        task_repo: tasks.clone(),
        task_queue: Some(queue.clone()),
        rate_limiter: Arc::new(RateLimiterService::new()),
        signature_verifier: Arc::new(HmacSignatureVerifier::new(Duration::from_secs(300))),
        metrics: Arc::new(MetricsService::new().unwrap()),
        http_client: create_http_client().unwrap(),
    };

    TestHarness {
        state,
        clients,
        call_logs,
        tasks,
        queue,
    }
}

pub fn harness_with_target(target_url: &str) -> TestHarness {
    let mut config = Config::default();
    config.targets.insert(
        "v1".to_string(),
        TargetConfig {
            url: target_url.to_string(),
            timeout: 5_000,
        },
    );
    harness_with_config(config)
}

/// Register a caller and return it with its id assigned.
pub async fn seed_client(
    harness: &TestHarness,
    api_key: &str,
    quota: i64,
    qps: i64,
) -> Client {
    let mut client = Client::new("acme", api_key, "test-secret", "v1", quota);
    client.qps = qps;
    harness.clients.create(&mut client).await.unwrap();
    client
}

/// Serve a router on an ephemeral local port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Poll `probe` until it returns Some or the deadline passes.
pub async fn wait_for<T, F>(mut probe: F, timeout: Duration) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = probe() {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
