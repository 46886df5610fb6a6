use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "execution_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Timeout,
    Canceled,
}

pub const SKIP_LOCK_CONTENTION: &str = "skipped: lock contention";
pub const SKIP_NOT_MASTER: &str = "skipped: not master";

/// Append-only record of how an execution attempt concluded.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobExecutionLog {
    pub id: i64,
    pub execution_id: String,
    pub job_id: i64,
    pub job_name: String,
    pub job_group: String,
    pub status: ExecutionStatus,
    pub node_id: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub error_detail: Option<String>,
    pub payload: Option<String>,
}

/// Insert shape; the id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub execution_id: String,
    pub job_id: i64,
    pub job_name: String,
    pub job_group: String,
    pub status: ExecutionStatus,
    pub node_id: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub error_detail: Option<String>,
    pub payload: Option<String>,
}

impl NewExecutionLog {
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds().max(0)
    }

    pub fn into_log(self, id: i64) -> JobExecutionLog {
        let duration_ms = self.duration_ms();
        JobExecutionLog {
            id,
            execution_id: self.execution_id,
            job_id: self.job_id,
            job_name: self.job_name,
            job_group: self.job_group,
            status: self.status,
            node_id: self.node_id,
            scheduled_time: self.scheduled_time,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_ms,
            retry_count: self.retry_count,
            error_message: self.error_message,
            error_detail: self.error_detail,
            payload: self.payload,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQuery {
    pub job_id: Option<i64>,
    pub execution_id: Option<String>,
    pub limit: Option<i64>,
}
