use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Load figures a node publishes with its heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub node_id: String,
    pub pool_usage: f64,
    pub pool_capacity: usize,
    pub queue_depth: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterView {
    pub node_id: String,
    pub master: Option<String>,
    pub alive_nodes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub pending: u64,
    pub executing: u64,
    pub local_queue_length: u64,
}
