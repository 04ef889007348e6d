//! Worker pool for the asynchronous task pipeline.
//!
//! N long-lived workers share one cancellation token. Each loop iteration
//! dequeues (bounded block), executes the captured upstream call, persists
//! the outcome and delivers the callback with a bounded retry budget.
//! Shutdown cancels the token and joins every worker; an in-flight task is
//! drained to completion first.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ApiError, Result};
use crate::models::{Task, MAX_CALLBACK_ATTEMPTS};
use crate::repositories::TaskRepository;
use crate::services::queue::TaskQueue;

/// Base unit of the callback retry backoff: the n-th failure waits
/// `n * CALLBACK_BACKOFF_BASE` before the next attempt.
const CALLBACK_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Pause after a dequeue error so a sick queue does not spin the loop.
const DEQUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const CALLBACK_SUCCEEDED: &str = "success";
const CALLBACK_FAILED: &str = "failed";

pub struct WorkerPool {
    worker_count: usize,
    queue: Arc<dyn TaskQueue>,
    task_repo: Arc<dyn TaskRepository>,
    http_client: reqwest::Client,
    callback_backoff: Duration,
    cancel: CancellationToken,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        queue: Arc<dyn TaskQueue>,
        task_repo: Arc<dyn TaskRepository>,
    ) -> Result<Self> {
        // No total request timeout: the upstream is trusted to respond and
        // streaming bodies may be long-lived.
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            worker_count: worker_count.max(1),
            queue,
            task_repo,
            http_client,
            callback_backoff: CALLBACK_BACKOFF_BASE,
            cancel: CancellationToken::new(),
            handles: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Shrink the retry backoff; used by tests that exercise the full retry
    /// budget without the production pacing.
    pub fn with_callback_backoff(mut self, backoff: Duration) -> Self {
        self.callback_backoff = backoff;
        self
    }

    pub fn start(&self) {
        info!(workers = self.worker_count, "starting worker pool");

        let mut handles = self.handles.lock().expect("worker handle lock poisoned");
        for worker_id in 0..self.worker_count {
            let worker = Worker {
                id: worker_id,
                queue: self.queue.clone(),
                task_repo: self.task_repo.clone(),
                http_client: self.http_client.clone(),
                callback_backoff: self.callback_backoff,
                cancel: self.cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
    }

    /// Cancel the shared token and wait for every worker to drain.
    pub async fn shutdown(&self) {
        info!("stopping worker pool");
        self.cancel.cancel();

        let handles: Vec<_> = {
            let mut guard = self.handles.lock().expect("worker handle lock poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task panicked during shutdown");
            }
        }
        info!("worker pool stopped");
    }
}

struct Worker {
    id: usize,
    queue: Arc<dyn TaskQueue>,
    task_repo: Arc<dyn TaskRepository>,
    http_client: reqwest::Client,
    callback_backoff: Duration,
    cancel: CancellationToken,
}

/// Outcome of one upstream execution.
enum UpstreamOutcome {
    Success { body: String, status: u16 },
    Failed { message: String, status: u16 },
}

impl Worker {
    async fn run(self) {
        info!(worker = self.id, "worker started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.queue.dequeue(&self.cancel).await {
                Ok(Some(task)) => self.process_task(task).await,
                Ok(None) => continue,
                Err(ApiError::Cancelled) => break,
                Err(err) => {
                    error!(worker = self.id, error = %err, "failed to dequeue task");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(DEQUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(worker = self.id, "worker stopped");
    }

    async fn process_task(&self, mut task: Task) {
        task.mark_processing();
        if let Err(err) = self.task_repo.update(&task).await {
            error!(task_id = %task.task_id, error = %err, "failed to mark task processing");
        }

        match self.call_upstream(&task).await {
            UpstreamOutcome::Success { body, status } => {
                info!(worker = self.id, task_id = %task.task_id, status, "task succeeded");
                task.mark_success(body, i32::from(status));
            }
            UpstreamOutcome::Failed { message, status } => {
                error!(worker = self.id, task_id = %task.task_id, status, "task failed");
                task.mark_failed(message, i32::from(status));
            }
        }

        if let Err(err) = self.task_repo.update(&task).await {
            error!(task_id = %task.task_id, error = %err, "failed to persist task outcome");
        }

        if !task.callback_url.is_empty() {
            self.execute_callback(&task).await;
        }
    }

    async fn call_upstream(&self, task: &Task) -> UpstreamOutcome {
        let method = match Method::from_bytes(task.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return UpstreamOutcome::Failed {
                    message: format!("invalid method: {}|", task.method),
                    status: 0,
                }
            }
        };

        let mut request = self
            .http_client
            .request(method, &task.target_url)
            .body(task.body.clone());
        for (name, value) in &task.headers {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                return UpstreamOutcome::Failed {
                    message: format!("{err}|"),
                    status: 0,
                }
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                return UpstreamOutcome::Failed {
                    message: format!("{err}|"),
                    status,
                }
            }
        };

        if status >= 400 {
            UpstreamOutcome::Failed {
                message: body,
                status,
            }
        } else {
            UpstreamOutcome::Success { body, status }
        }
    }

    /// POST the terminal state to the caller-supplied URL: up to three
    /// attempts, a growing pause between them, success on any 2xx.
    async fn execute_callback(&self, task: &Task) {
        info!(task_id = %task.task_id, url = %task.callback_url, "delivering callback");

        let payload = callback_payload(task);
        let method = Method::from_bytes(task.callback_method.as_bytes())
            .unwrap_or(Method::POST);

        let mut delivered = false;
        for attempt in 1..=MAX_CALLBACK_ATTEMPTS {
            if attempt > 1 {
                let pause = self.callback_backoff * (attempt - 1) as u32;
                tokio::time::sleep(pause).await;
            }

            let mut request = self
                .http_client
                .request(method.clone(), &task.callback_url)
                .header("X-Task-ID", &task.task_id)
                .json(&payload);
            for (name, value) in &task.callback_headers {
                request = request.header(name, value);
            }

            let result = request.send().await;

            if let Err(err) = self
                .task_repo
                .increment_callback_attempts(&task.task_id)
                .await
            {
                error!(task_id = %task.task_id, error = %err, "failed to record callback attempt");
            }

            match result {
                Ok(response) if response.status().is_success() => {
                    info!(task_id = %task.task_id, attempt, "callback delivered");
                    delivered = true;
                    break;
                }
                Ok(response) => {
                    warn!(
                        task_id = %task.task_id,
                        attempt,
                        status = response.status().as_u16(),
                        "callback rejected"
                    );
                }
                Err(err) => {
                    warn!(task_id = %task.task_id, attempt, error = %err, "callback attempt failed");
                }
            }
        }

        let callback_status = if delivered {
            CALLBACK_SUCCEEDED
        } else {
            CALLBACK_FAILED
        };
        if let Err(err) = self
            .task_repo
            .update_callback_status(&task.task_id, callback_status)
            .await
        {
            error!(task_id = %task.task_id, error = %err, "failed to record callback status");
        }
    }
}

/// The JSON document delivered to the callback URL.
fn callback_payload(task: &Task) -> Value {
    json!({
        "task_id": task.task_id,
        "status": task.status,
        "result": task.result,
        "error": task.error_message,
        "status_code": task.status_code,
        "completed_at": task.completed_at.map(|at| at.to_rfc3339()),
    })
}
