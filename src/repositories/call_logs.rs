//! MongoDB-backed call-log store. Append-only on the hot path.

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::FindOptions;
use mongodb::{Collection, Database};
use tracing::warn;

use super::{CallLogRepository, CALL_LOGS_COLLECTION};
use crate::error::Result;
use crate::models::CallLog;

pub struct CallLogMongoRepository {
    collection: Collection<CallLog>,
}

impl CallLogMongoRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(CALL_LOGS_COLLECTION),
        }
    }

    pub async fn ensure_indexes(&self) {
        let indexes = [
            doc! { "client_id": 1, "created_at": -1 },
            doc! { "api_key": 1, "created_at": -1 },
        ];
        for keys in indexes {
            let model = mongodb::IndexModel::builder().keys(keys.clone()).build();
            if let Err(err) = self.collection.create_index(model, None).await {
                warn!(error = %err, index = ?keys, "failed to create index on gw_call_logs");
            }
        }
    }

    async fn find_page(&self, filter: Document, offset: u64, limit: i64) -> Result<Vec<CallLog>> {
        let options = FindOptions::builder()
            .skip(offset)
            .limit(limit)
            .sort(doc! { "created_at": -1 })
            .build();

        let cursor = self.collection.find(filter, options).await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl CallLogRepository for CallLogMongoRepository {
    async fn create(&self, log: &CallLog) -> Result<()> {
        self.collection.insert_one(log, None).await?;
        Ok(())
    }

    async fn get_by_client_id(
        &self,
        client_id: ObjectId,
        offset: u64,
        limit: i64,
    ) -> Result<Vec<CallLog>> {
        self.find_page(doc! { "client_id": client_id }, offset, limit)
            .await
    }

    async fn get_by_api_key(
        &self,
        api_key: &str,
        offset: u64,
        limit: i64,
    ) -> Result<Vec<CallLog>> {
        self.find_page(doc! { "api_key": api_key }, offset, limit)
            .await
    }

    async fn list(&self, offset: u64, limit: i64) -> Result<Vec<CallLog>> {
        self.find_page(doc! {}, offset, limit).await
    }
}
