use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::JobPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "runtime_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeStatus {
    Waiting,
    Running,
    Retrying,
}

impl RuntimeStatus {
    pub fn is_claimable(&self) -> bool {
        matches!(self, RuntimeStatus::Waiting | RuntimeStatus::Retrying)
    }
}

// One open row per in-flight execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRuntime {
    pub execution_id: String,
    pub job_id: i64,
    pub job_name: String,
    pub job_group: String,
    pub status: RuntimeStatus,
    pub node_id: Option<String>,
    pub scheduled_time: DateTime<Utc>,
    pub enqueue_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retry: i32,
    /// Serialized `JobPayload` snapshot taken at submission.
    pub payload: String,
}

impl JobRuntime {
    pub fn waiting(execution_id: &str, job: &JobPayload, max_retry: i32, payload: String) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.to_string(),
            job_id: job.job_id,
            job_name: job.name.clone(),
            job_group: job.group_name.clone(),
            status: RuntimeStatus::Waiting,
            node_id: None,
            scheduled_time: now,
            enqueue_time: now,
            start_time: None,
            retry_count: 0,
            max_retry,
            payload,
        }
    }

    pub fn decode_payload(&self) -> Result<JobPayload, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}
