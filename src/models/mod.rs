//! Persistent document models: callers, call logs and async tasks.

mod call_log;
mod client;
mod task;

pub use call_log::CallLog;
pub use client::{Client, ClientStatus, CLIENT_STATUS_ACTIVE, CLIENT_STATUS_DISABLED};
pub use task::{Task, TaskStatus, MAX_CALLBACK_ATTEMPTS};

/// Serde adapter for optional `chrono` datetimes stored as BSON dates.
///
/// The driver's `chrono_datetime_as_bson_datetime` helper only covers the
/// non-optional case; nullable timestamps (`started_at`, `completed_at`)
/// route through this module instead.
pub(crate) mod bson_datetime_option {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => bson::DateTime::from_chrono(*dt).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<bson::DateTime>::deserialize(deserializer)?;
        Ok(value.map(|dt| dt.to_chrono()))
    }
}
