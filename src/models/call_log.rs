//! Immutable audit record of a processed request.

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

/// One entry in the append-only `gw_call_logs` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLog {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub client_id: ObjectId,
    pub api_key: String,
    pub path: String,
    /// Final HTTP status sent to the caller.
    pub status: i32,
    /// Wall-clock duration in milliseconds.
    pub duration: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_body: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl CallLog {
    pub fn new(
        client_id: ObjectId,
        api_key: impl Into<String>,
        path: impl Into<String>,
        status: i32,
        duration: i64,
        request_body: String,
        response_body: String,
    ) -> Self {
        Self {
            id: None,
            client_id,
            api_key: api_key.into(),
            path: path.into(),
            status,
            duration,
            request_body,
            response_body,
            created_at: Utc::now(),
        }
    }
}
