//! Caller identity and billing record.

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

/// Caller status values. Anything other than active is rejected at the
/// authentication stage.
pub type ClientStatus = i32;

pub const CLIENT_STATUS_DISABLED: ClientStatus = 0;
pub const CLIENT_STATUS_ACTIVE: ClientStatus = 1;

/// An authenticated consumer of the gateway holding a pre-paid call quota.
///
/// Serialized straight into the `gw_clients` collection; API responses go
/// through dedicated response types so `secret` never reaches a caller
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub api_key: String,
    /// Shared key for HMAC request signing.
    pub secret: String,
    /// Selects the upstream target.
    pub version: String,
    /// Remaining pre-paid quota. Never negative.
    pub call_count: i64,
    /// Cumulative purchased quota.
    pub total_count: i64,
    /// Allowed requests per second.
    pub qps: i64,
    pub status: ClientStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Create a new active caller. QPS defaults to 10.
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
        version: impl Into<String>,
        initial_call_count: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name: name.into(),
            api_key: api_key.into(),
            secret: secret.into(),
            version: version.into(),
            call_count: initial_call_count,
            total_count: initial_call_count,
            qps: 10,
            status: CLIENT_STATUS_ACTIVE,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CLIENT_STATUS_ACTIVE
    }

    pub fn has_calls_remaining(&self) -> bool {
        self.call_count > 0
    }

    /// Hex form of the caller id; empty string before first persist.
    pub fn id_hex(&self) -> String {
        self.id.map(|id| id.to_hex()).unwrap_or_default()
    }
}
