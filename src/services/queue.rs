//! FIFO task queue backed by a Redis list.
//!
//! Producers LPUSH, consumers BRPOP with a bounded block so worker loops can
//! re-check shutdown between polls. Tasks travel as self-describing JSON.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RedisSettings;
use crate::error::{ApiError, Result};
use crate::models::Task;

/// How long one dequeue poll blocks before reporting an empty queue.
const DEQUEUE_BLOCK: Duration = Duration::from_secs(5);

/// FIFO queue of pending tasks (C4).
///
/// `dequeue` returns `Ok(None)` when the queue stayed empty for the blocking
/// window and `Err(ApiError::Cancelled)` when `shutdown` fired mid-wait, so
/// worker loops can tell an idle queue from a stop request. Delivery is
/// at-most-once: the pop is the commit point.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &Task) -> Result<()>;

    async fn dequeue(&self, shutdown: &CancellationToken) -> Result<Option<Task>>;

    async fn size(&self) -> Result<u64>;

    async fn close(&self);
}

pub struct RedisTaskQueue {
    conn: ConnectionManager,
    queue_key: String,
}

impl RedisTaskQueue {
    /// Connect and verify the server responds before the gateway starts
    /// accepting async submissions.
    pub async fn connect(settings: &RedisSettings) -> Result<Self> {
        let client = redis::Client::open(settings.url())?;
        let conn = ConnectionManager::new(client).await?;

        let mut ping_conn = conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut ping_conn)
            .await?;

        info!(addr = %settings.addr, key = %settings.queue_key, "task queue connected");

        Ok(Self {
            conn,
            queue_key: settings.queue_key.clone(),
        })
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_string(task)?;

        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, shutdown: &CancellationToken) -> Result<Option<Task>> {
        let mut conn = self.conn.clone();
        let queue_key = self.queue_key.clone();
        let pop = async move {
            redis::cmd("BRPOP")
                .arg(&queue_key)
                .arg(DEQUEUE_BLOCK.as_secs())
                .query_async::<_, Option<(String, String)>>(&mut conn)
                .await
        };

        tokio::select! {
            _ = shutdown.cancelled() => Err(ApiError::Cancelled),
            result = pop => match result? {
                Some((_key, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
                None => Ok(None),
            },
        }
    }

    async fn size(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("LLEN")
            .arg(&self.queue_key)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn close(&self) {
        // The connection manager tears down with its last clone; nothing to
        // flush since enqueues are synchronous.
        info!(key = %self.queue_key, "task queue closed");
    }
}
