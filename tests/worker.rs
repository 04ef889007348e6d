//! Worker-pool tests: upstream execution, outcome persistence and callback
//! delivery with its bounded retry budget.

mod support;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use api_gateway::models::{Task, TaskStatus};
use api_gateway::repositories::TaskRepository;
use api_gateway::services::queue::TaskQueue;
use api_gateway::services::worker::WorkerPool;

use support::{spawn_server, wait_for, InMemoryQueue, InMemoryTaskRepo};

#[derive(Clone, Default)]
struct CallbackRecorder {
    payloads: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    hits: Arc<AtomicUsize>,
    respond_with: Arc<AtomicUsize>,
}

impl CallbackRecorder {
    fn recorded(&self) -> Vec<(HeaderMap, Value)> {
        self.payloads.lock().unwrap().clone()
    }

    fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn router(&self) -> Router {
        async fn record(
            State(recorder): State<CallbackRecorder>,
            headers: HeaderMap,
            Json(payload): Json<Value>,
        ) -> StatusCode {
            recorder.hits.fetch_add(1, Ordering::SeqCst);
            recorder.payloads.lock().unwrap().push((headers, payload));
            StatusCode::from_u16(recorder.respond_with.load(Ordering::SeqCst) as u16)
                .unwrap_or(StatusCode::OK)
        }

        Router::new()
            .route("/cb", post(record))
            .with_state(self.clone())
    }
}

fn recorder_with_status(status: u16) -> CallbackRecorder {
    let recorder = CallbackRecorder::default();
    recorder.respond_with.store(status as usize, Ordering::SeqCst);
    recorder
}

async fn seed_task(
    repo: &InMemoryTaskRepo,
    queue: &InMemoryQueue,
    target_url: &str,
    callback_url: &str,
) -> Task {
    let mut task = Task::new(
        "task-w1",
        "client-1",
        "ak_test",
        "POST",
        "/api/run",
        target_url,
        callback_url,
        HashMap::from([("x-request-source".to_string(), "async".to_string())]),
        "{\"work\":true}".to_string(),
    );
    repo.create(&mut task).await.unwrap();
    queue.enqueue(&task).await.unwrap();
    task
}

#[tokio::test]
async fn worker_executes_task_and_delivers_callback() {
    let upstream = Router::new().fallback(|| async { "xyz" });
    let upstream_addr = spawn_server(upstream).await;

    let recorder = recorder_with_status(200);
    let callback_addr = spawn_server(recorder.router()).await;

    let repo = Arc::new(InMemoryTaskRepo::default());
    let queue = Arc::new(InMemoryQueue::default());
    seed_task(
        &repo,
        &queue,
        &format!("http://{upstream_addr}/run"),
        &format!("http://{callback_addr}/cb"),
    )
    .await;

    let pool = WorkerPool::new(
        1,
        queue.clone() as Arc<dyn TaskQueue>,
        repo.clone() as Arc<dyn TaskRepository>,
    )
    .unwrap()
    .with_callback_backoff(Duration::from_millis(20));
    pool.start();

    // Wait until the callback lands.
    let delivered = {
        let recorder = recorder.clone();
        wait_for(
            move || (recorder.hit_count() > 0).then_some(()),
            Duration::from_secs(5),
        )
        .await
    };
    assert!(delivered.is_some(), "callback never delivered");

    let task = wait_for(
        {
            let repo = repo.clone();
            move || {
                repo.task("task-w1")
                    .filter(|task| task.callback_status.is_some())
            }
        },
        Duration::from_secs(5),
    )
    .await
    .expect("task with callback status");

    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.result, "xyz");
    assert_eq!(task.status_code, 200);
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());
    assert_eq!(task.callback_attempts, 1);
    assert_eq!(task.callback_status.as_deref(), Some("success"));

    let recorded = recorder.recorded();
    let (headers, payload) = &recorded[0];
    assert_eq!(headers.get("x-task-id").unwrap(), "task-w1");
    assert_eq!(payload["task_id"], "task-w1");
    assert_eq!(payload["status"], "success");
    assert_eq!(payload["result"], "xyz");
    assert_eq!(payload["status_code"], 200);
    assert!(payload["completed_at"].is_string());

    pool.shutdown().await;
}

#[tokio::test]
async fn failing_callback_stops_after_three_attempts() {
    let upstream = Router::new().fallback(|| async { "done" });
    let upstream_addr = spawn_server(upstream).await;

    let recorder = recorder_with_status(500);
    let callback_addr = spawn_server(recorder.router()).await;

    let repo = Arc::new(InMemoryTaskRepo::default());
    let queue = Arc::new(InMemoryQueue::default());
    seed_task(
        &repo,
        &queue,
        &format!("http://{upstream_addr}/run"),
        &format!("http://{callback_addr}/cb"),
    )
    .await;

    let pool = WorkerPool::new(
        1,
        queue.clone() as Arc<dyn TaskQueue>,
        repo.clone() as Arc<dyn TaskRepository>,
    )
    .unwrap()
    .with_callback_backoff(Duration::from_millis(20));
    pool.start();

    let task = wait_for(
        {
            let repo = repo.clone();
            move || {
                repo.task("task-w1")
                    .filter(|task| task.callback_status.is_some())
            }
        },
        Duration::from_secs(5),
    )
    .await
    .expect("task with terminal callback status");

    assert_eq!(task.callback_attempts, 3);
    assert_eq!(task.callback_status.as_deref(), Some("failed"));
    // The upstream call itself succeeded; only delivery failed.
    assert_eq!(task.status, TaskStatus::Success);

    // No fourth attempt arrives after the budget is spent.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.hit_count(), 3);

    pool.shutdown().await;
}

#[tokio::test]
async fn upstream_http_error_marks_task_failed_with_body() {
    let upstream = Router::new().fallback(|| async {
        (StatusCode::UNPROCESSABLE_ENTITY, "bad input")
    });
    let upstream_addr = spawn_server(upstream).await;

    let recorder = recorder_with_status(200);
    let callback_addr = spawn_server(recorder.router()).await;

    let repo = Arc::new(InMemoryTaskRepo::default());
    let queue = Arc::new(InMemoryQueue::default());
    seed_task(
        &repo,
        &queue,
        &format!("http://{upstream_addr}/run"),
        &format!("http://{callback_addr}/cb"),
    )
    .await;

    let pool = WorkerPool::new(
        1,
        queue.clone() as Arc<dyn TaskQueue>,
        repo.clone() as Arc<dyn TaskRepository>,
    )
    .unwrap()
    .with_callback_backoff(Duration::from_millis(20));
    pool.start();

    let task = wait_for(
        {
            let repo = repo.clone();
            move || repo.task("task-w1").filter(|task| task.is_completed())
        },
        Duration::from_secs(5),
    )
    .await
    .expect("completed task");

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message, "bad input");
    assert_eq!(task.status_code, 422);

    // Failed tasks still notify the caller.
    let payload = wait_for(
        {
            let recorder = recorder.clone();
            move || recorder.recorded().into_iter().next().map(|(_, p)| p)
        },
        Duration::from_secs(5),
    )
    .await
    .expect("callback payload");
    assert_eq!(payload["status"], "failed");
    assert_eq!(payload["error"], "bad input");
    assert_eq!(payload["status_code"], 422);

    pool.shutdown().await;
}

#[tokio::test]
async fn unreachable_upstream_marks_task_failed_with_zero_status() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let repo = Arc::new(InMemoryTaskRepo::default());
    let queue = Arc::new(InMemoryQueue::default());

    // No callback URL: the worker stops after persisting the outcome.
    let mut task = Task::new(
        "task-w2",
        "client-1",
        "ak_test",
        "POST",
        "/api/run",
        format!("http://{dead_addr}/run"),
        "",
        HashMap::new(),
        String::new(),
    );
    repo.create(&mut task).await.unwrap();
    queue.enqueue(&task).await.unwrap();

    let pool = WorkerPool::new(
        1,
        queue.clone() as Arc<dyn TaskQueue>,
        repo.clone() as Arc<dyn TaskRepository>,
    )
    .unwrap();
    pool.start();

    let task = wait_for(
        {
            let repo = repo.clone();
            move || repo.task("task-w2").filter(|task| task.is_completed())
        },
        Duration::from_secs(5),
    )
    .await
    .expect("completed task");

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.status_code, 0);
    assert!(task.error_message.ends_with('|'));
    assert_eq!(task.callback_attempts, 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_in_flight_task() {
    let upstream = Router::new().fallback(|| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        "slow"
    });
    let upstream_addr = spawn_server(upstream).await;

    let repo = Arc::new(InMemoryTaskRepo::default());
    let queue = Arc::new(InMemoryQueue::default());

    let mut task = Task::new(
        "task-w3",
        "client-1",
        "ak_test",
        "POST",
        "/api/run",
        format!("http://{upstream_addr}/run"),
        "",
        HashMap::new(),
        String::new(),
    );
    repo.create(&mut task).await.unwrap();
    queue.enqueue(&task).await.unwrap();

    let pool = WorkerPool::new(
        2,
        queue.clone() as Arc<dyn TaskQueue>,
        repo.clone() as Arc<dyn TaskRepository>,
    )
    .unwrap();
    pool.start();

    // Let a worker pick the task up, then stop the pool mid-flight.
    wait_for(
        {
            let repo = repo.clone();
            move || {
                repo.task("task-w3")
                    .filter(|task| task.status == TaskStatus::Processing)
            }
        },
        Duration::from_secs(5),
    )
    .await
    .expect("task picked up");

    pool.shutdown().await;

    // The in-flight task completed before the worker exited.
    let task = repo.task("task-w3").unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.result, "slow");
}
