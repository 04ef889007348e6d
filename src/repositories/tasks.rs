//! MongoDB-backed task store with TTL expiry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use tracing::warn;

use super::{TaskRepository, TASKS_COLLECTION};
use crate::error::{ApiError, Result};
use crate::models::{Task, TaskStatus};

pub struct TaskMongoRepository {
    collection: Collection<Task>,
}

impl TaskMongoRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(TASKS_COLLECTION),
        }
    }

    /// Index bootstrap: unique `task_id`, the per-caller listing index, the
    /// pending-scan index and the TTL reaper on `expire_at`.
    pub async fn ensure_indexes(&self) {
        let models = [
            IndexModel::builder()
                .keys(doc! { "task_id": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            IndexModel::builder()
                .keys(doc! { "client_id": 1, "created_at": -1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "status": 1, "created_at": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "expire_at": 1 })
                .options(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .build(),
                )
                .build(),
        ];

        for model in models {
            if let Err(err) = self.collection.create_index(model, None).await {
                warn!(error = %err, "failed to create index on tasks");
            }
        }
    }

    fn now_bson() -> Bson {
        Bson::DateTime(mongodb::bson::DateTime::from_chrono(Utc::now()))
    }
}

#[async_trait]
impl TaskRepository for TaskMongoRepository {
    async fn create(&self, task: &mut Task) -> Result<()> {
        let result = self.collection.insert_one(&*task, None).await?;
        if let Bson::ObjectId(id) = result.inserted_id {
            task.id = Some(id);
        }
        Ok(())
    }

    async fn get_by_task_id(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self
            .collection
            .find_one(doc! { "task_id": task_id }, None)
            .await?)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
        let object_id = ObjectId::parse_str(id)
            .map_err(|_| ApiError::validation(format!("invalid task id: {id}")))?;
        Ok(self
            .collection
            .find_one(doc! { "_id": object_id }, None)
            .await?)
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.collection
            .replace_one(doc! { "task_id": &task.task_id }, task, None)
            .await?;
        Ok(())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.collection
            .update_one(
                doc! { "task_id": task_id },
                doc! { "$set": { "status": status.as_str() } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn update_callback_status(&self, task_id: &str, callback_status: &str) -> Result<()> {
        self.collection
            .update_one(
                doc! { "task_id": task_id },
                doc! { "$set": { "callback_status": callback_status } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn list_by_client(
        &self,
        client_id: &str,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<Task>> {
        let options = FindOptions::builder()
            .skip(offset)
            .limit(limit)
            .sort(doc! { "created_at": -1 })
            .build();

        let cursor = self
            .collection
            .find(doc! { "client_id": client_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn increment_callback_attempts(&self, task_id: &str) -> Result<()> {
        self.collection
            .update_one(
                doc! { "task_id": task_id },
                doc! {
                    "$inc": { "callback_attempts": 1 },
                    "$set": { "last_callback_at": Self::now_bson() },
                },
                None,
            )
            .await?;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { "expire_at": { "$lt": Self::now_bson() } }, None)
            .await?;
        Ok(result.deleted_count)
    }
}
