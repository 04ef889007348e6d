//! MongoDB-backed caller store.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use tracing::warn;

use super::{ClientRepository, ClientStats, CLIENTS_COLLECTION};
use crate::error::{ApiError, Result};
use crate::models::{Client, CLIENT_STATUS_ACTIVE, CLIENT_STATUS_DISABLED};

pub struct ClientMongoRepository {
    collection: Collection<Client>,
}

impl ClientMongoRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(CLIENTS_COLLECTION),
        }
    }

    /// Create the unique `api_key` index. Index creation failures are logged
    /// rather than fatal so the gateway still boots against a degraded store.
    pub async fn ensure_indexes(&self) {
        let index = IndexModel::builder()
            .keys(doc! { "api_key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        if let Err(err) = self.collection.create_index(index, None).await {
            warn!(error = %err, "failed to create api_key index on gw_clients");
        }
    }

    fn now_bson() -> Bson {
        Bson::DateTime(mongodb::bson::DateTime::from_chrono(Utc::now()))
    }
}

#[async_trait]
impl ClientRepository for ClientMongoRepository {
    async fn create(&self, client: &mut Client) -> Result<()> {
        if client.id.is_none() {
            client.id = Some(ObjectId::new());
        }
        let now = Utc::now();
        client.created_at = now;
        client.updated_at = now;

        self.collection.insert_one(&*client, None).await?;
        Ok(())
    }

    async fn get_by_id(&self, id: ObjectId) -> Result<Option<Client>> {
        Ok(self.collection.find_one(doc! { "_id": id }, None).await?)
    }

    async fn get_by_api_key(&self, api_key: &str) -> Result<Option<Client>> {
        Ok(self
            .collection
            .find_one(doc! { "api_key": api_key }, None)
            .await?)
    }

    async fn update(&self, client: &Client) -> Result<()> {
        let id = client
            .id
            .ok_or_else(|| ApiError::internal("cannot update a client without an id"))?;

        let result = self
            .collection
            .replace_one(doc! { "_id": id }, client, None)
            .await?;

        if result.matched_count == 0 {
            return Err(ApiError::not_found("client"));
        }
        Ok(())
    }

    async fn list(&self, offset: u64, limit: i64) -> Result<Vec<Client>> {
        let options = FindOptions::builder()
            .skip(offset)
            .limit(limit)
            .sort(doc! { "created_at": -1 })
            .build();

        let cursor = self.collection.find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_call_count(&self, id: ObjectId, delta: i64) -> Result<()> {
        let mut increments = doc! { "call_count": delta };
        if delta > 0 {
            increments.insert("total_count", delta);
        }
        let update = doc! {
            "$inc": increments,
            "$set": { "updated_at": Self::now_bson() },
        };

        let result = self
            .collection
            .update_one(doc! { "_id": id }, update, None)
            .await?;

        if result.matched_count == 0 {
            return Err(ApiError::not_found("client"));
        }
        Ok(())
    }

    async fn deduct_call_count(&self, id: ObjectId) -> Result<()> {
        // Single conditional find-and-update: only a document with a positive
        // balance matches, so the counter can never go below zero.
        let filter = doc! { "_id": id, "call_count": { "$gt": 0 } };
        let update = doc! {
            "$inc": { "call_count": -1 },
            "$set": { "updated_at": Self::now_bson() },
        };

        let updated = self
            .collection
            .find_one_and_update(filter, update, None)
            .await?;

        match updated {
            Some(_) => Ok(()),
            None => Err(ApiError::insufficient_calls(id.to_hex(), 0)),
        }
    }

    async fn update_qps(&self, id: ObjectId, qps: i64) -> Result<()> {
        let update = doc! {
            "$set": { "qps": qps, "updated_at": Self::now_bson() },
        };

        let result = self
            .collection
            .update_one(doc! { "_id": id }, update, None)
            .await?;

        if result.matched_count == 0 {
            return Err(ApiError::not_found("client"));
        }
        Ok(())
    }

    async fn update_status(&self, id: ObjectId, status: i32) -> Result<()> {
        let update = doc! {
            "$set": { "status": status, "updated_at": Self::now_bson() },
        };

        let result = self
            .collection
            .update_one(doc! { "_id": id }, update, None)
            .await?;

        if result.matched_count == 0 {
            return Err(ApiError::not_found("client"));
        }
        Ok(())
    }

    async fn delete(&self, id: ObjectId) -> Result<()> {
        let result = self.collection.delete_one(doc! { "_id": id }, None).await?;
        if result.deleted_count == 0 {
            return Err(ApiError::not_found("client"));
        }
        Ok(())
    }

    async fn stats(&self) -> Result<ClientStats> {
        let total_clients = self.collection.count_documents(doc! {}, None).await? as i64;
        let active_clients = self
            .collection
            .count_documents(doc! { "status": CLIENT_STATUS_ACTIVE }, None)
            .await? as i64;
        let disabled_clients = self
            .collection
            .count_documents(doc! { "status": CLIENT_STATUS_DISABLED }, None)
            .await? as i64;

        let pipeline = vec![doc! {
            "$group": {
                "_id": Bson::Null,
                "used": { "$sum": { "$subtract": ["$total_count", "$call_count"] } },
            }
        }];
        let mut cursor = self.collection.aggregate(pipeline, None).await?;
        let total_calls_used = match cursor.try_next().await? {
            Some(document) => read_i64(&document, "used"),
            None => 0,
        };

        Ok(ClientStats {
            total_clients,
            active_clients,
            disabled_clients,
            total_calls_used,
        })
    }
}

fn read_i64(document: &Document, key: &str) -> i64 {
    match document.get(key) {
        Some(Bson::Int64(v)) => *v,
        Some(Bson::Int32(v)) => i64::from(*v),
        Some(Bson::Double(v)) => *v as i64,
        _ => 0,
    }
}
