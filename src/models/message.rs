use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{JobPayload, Priority};

/// Envelope pushed onto the Redis lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: String,
    pub execution_id: String,
    /// `None` targets the any-node pool.
    pub target_node: Option<String>,
    pub priority: Priority,
    pub job: JobPayload,
    /// Backed by a durable runtime row that the executor must claim.
    pub tracked: bool,
    pub retry_count: i32,
    pub scheduled_time: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    /// Exact JSON this message was read from, used to remove it from the processing list.
    #[serde(skip)]
    pub raw: Option<String>,
}

impl TaskMessage {
    pub fn new(job: JobPayload, execution_id: &str, tracked: bool) -> Self {
        let now = Utc::now();
        Self {
            task_id: job.task_id(),
            execution_id: execution_id.to_string(),
            target_node: None,
            priority: job.priority,
            job,
            tracked,
            retry_count: 0,
            scheduled_time: now,
            enqueued_at: now,
            raw: None,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let mut message: TaskMessage = serde_json::from_str(raw)?;
        message.raw = Some(raw.to_string());
        Ok(message)
    }
}

/// What the consumer callback did with a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Finished here (including skip outcomes); acknowledge normally.
    Done,
    /// Republished to another queue; the EXECUTING marker was already handed off.
    Relayed,
}
