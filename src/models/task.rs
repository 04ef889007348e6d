//! Async work item: one deferred upstream call and its callback intent.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use super::bson_datetime_option;

/// Tasks live in the store for this long before the TTL index reaps them.
const TASK_TTL_HOURS: i64 = 24;

/// Maximum callback delivery attempts per task.
pub const MAX_CALLBACK_ATTEMPTS: i64 = 3;

/// Task lifecycle state. Transitions are monotonic:
/// pending → processing → {success | failed | timeout}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
        }
    }
}

/// A persisted asynchronous task.
///
/// Serialized both into the `tasks` collection and onto the queue as a
/// self-describing JSON record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Externally unique, caller-visible identifier.
    pub task_id: String,
    pub client_id: String,
    pub api_key: String,

    // Captured request.
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub target_url: String,

    // Callback intent.
    pub callback_url: String,
    pub callback_method: String,
    pub callback_headers: HashMap<String, String>,

    // Outcome.
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default)]
    pub status_code: i32,

    // Callback delivery state.
    #[serde(default)]
    pub callback_attempts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_status: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_option"
    )]
    pub last_callback_at: Option<DateTime<Utc>>,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_option"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    /// TTL anchor; the store reaps the document at or after this instant.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expire_at: DateTime<Utc>,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: impl Into<String>,
        client_id: impl Into<String>,
        api_key: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        target_url: impl Into<String>,
        callback_url: impl Into<String>,
        headers: HashMap<String, String>,
        body: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            task_id: task_id.into(),
            client_id: client_id.into(),
            api_key: api_key.into(),
            method: method.into(),
            path: path.into(),
            headers,
            body,
            target_url: target_url.into(),
            callback_url: callback_url.into(),
            callback_method: "POST".to_string(),
            callback_headers: HashMap::new(),
            status: TaskStatus::Pending,
            result: String::new(),
            error_message: String::new(),
            status_code: 0,
            callback_attempts: 0,
            callback_status: None,
            last_callback_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            expire_at: now + Duration::hours(TASK_TTL_HOURS),
        }
    }

    /// Whether the task reached a terminal state.
    pub fn is_completed(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Timeout
        )
    }

    /// Only terminal tasks with remaining budget may trigger callbacks.
    pub fn can_retry_callback(&self) -> bool {
        self.callback_attempts < MAX_CALLBACK_ATTEMPTS && self.is_completed()
    }

    pub fn mark_processing(&mut self) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_success(&mut self, result: String, status_code: i32) {
        self.status = TaskStatus::Success;
        self.result = result;
        self.status_code = status_code;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error_message: String, status_code: i32) {
        self.status = TaskStatus::Failed;
        self.error_message = error_message;
        self.status_code = status_code;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_timeout(&mut self) {
        self.status = TaskStatus::Timeout;
        self.error_message = "task execution timeout".to_string();
        self.completed_at = Some(Utc::now());
    }
}
