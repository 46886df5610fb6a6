use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// A configured job, edited through the management surface.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobDefinition {
    pub id: i64,
    pub name: String,
    pub group_name: String,
    /// Logical handler name resolved through the handler registry, e.g. `stock.refresh`.
    pub invoke_target: String,
    pub cron_expression: Option<String>,
    pub enabled: bool,
    pub concurrent: bool,
    pub master_only: bool,
    /// Opt-in for the replenishment loop. Only jobs meant to be perpetually queued set this.
    pub auto_replenish: bool,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    /// Task identifier used by the PENDING/EXECUTING sets and monitoring markers.
    pub fn task_id(&self) -> String {
        task_id(&self.group_name, &self.name)
    }

    pub fn to_payload(&self) -> JobPayload {
        JobPayload {
            job_id: self.id,
            name: self.name.clone(),
            group_name: self.group_name.clone(),
            invoke_target: self.invoke_target.clone(),
            concurrent: self.concurrent,
            master_only: self.master_only,
            priority: self.priority,
            trace_id: None,
        }
    }
}

pub fn task_id(group: &str, name: &str) -> String {
    format!("{}.{}", group, name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_priority", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    #[default]
    Normal,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }
}

/// Job snapshot carried in queue messages and stored on runtime rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: i64,
    pub name: String,
    pub group_name: String,
    pub invoke_target: String,
    pub concurrent: bool,
    pub master_only: bool,
    #[serde(default)]
    pub priority: Priority,
    /// Caller-supplied trace id, reused as the execution id when present.
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl JobPayload {
    pub fn task_id(&self) -> String {
        task_id(&self.group_name, &self.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub name: String,
    pub group_name: Option<String>,
    pub invoke_target: String,
    pub cron_expression: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub master_only: bool,
    #[serde(default)]
    pub auto_replenish: bool,
    #[serde(default)]
    pub priority: Priority,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateJob {
    pub name: Option<String>,
    pub group_name: Option<String>,
    pub invoke_target: Option<String>,
    /// Absent leaves the expression unchanged; `null` clears it.
    #[serde(default, deserialize_with = "present_or_null")]
    pub cron_expression: Option<Option<String>>,
    pub concurrent: Option<bool>,
    pub master_only: Option<bool>,
    pub auto_replenish: Option<bool>,
    pub priority: Option<Priority>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub const DEFAULT_GROUP: &str = "DEFAULT";
