use crate::models::Priority;

pub const PENDING: &str = "task:pending";
pub const EXECUTING: &str = "task:executing";
pub const RECENT: &str = "task:monitor:recent";
pub const NODES: &str = "scheduler:nodes";
pub const MASTER: &str = "scheduler:master";
pub const MONITOR_PREFIX: &str = "monitor:";

const ANY_NODE: &str = "any";

pub fn dedup(job_id: i64) -> String {
    format!("dedup:{}", job_id)
}

pub fn runtime(execution_id: &str) -> String {
    format!("runtime:{}", execution_id)
}

pub fn monitor(task_id: &str) -> String {
    format!("{}{}", MONITOR_PREFIX, task_id)
}

pub fn alert_cooldown(task_id: &str) -> String {
    format!("alert-cooldown:{}", task_id)
}

/// Waiting list for a node, or the any-node pool when `node` is `None`.
pub fn queue(node: Option<&str>, priority: Priority) -> String {
    format!("task:queue:{}:{}", node.unwrap_or(ANY_NODE), priority.as_str())
}

pub fn processing(node: &str) -> String {
    format!("task:queue:{}:processing", node)
}

pub fn node_metrics(node: &str) -> String {
    format!("scheduler:node:{}:metrics", node)
}

pub fn job_lock(job_id: i64) -> String {
    format!("lock:job:{}", job_id)
}

pub fn execution_lock(execution_id: &str) -> String {
    format!("lock:exec:{}", execution_id)
}

pub fn stock_status(code: &str) -> String {
    format!("stock:task:status:{}", code)
}

pub fn stock_idempotency(trace_id: &str, code: &str) -> String {
    format!("stock:idem:{}:{}", trace_id, code)
}
