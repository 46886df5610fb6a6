mod job;
mod runtime;
mod execution_log;
mod message;
mod node;
pub mod stock;

pub use job::{task_id, CreateJob, JobDefinition, JobPayload, Priority, UpdateJob, DEFAULT_GROUP};
pub use runtime::{JobRuntime, RuntimeStatus};
pub use execution_log::{
    ExecutionStatus, JobExecutionLog, LogQuery, NewExecutionLog, SKIP_LOCK_CONTENTION, SKIP_NOT_MASTER,
};
pub use message::{Disposition, TaskMessage};
pub use node::{ClusterView, NodeMetrics, QueueStats};
pub use stock::{
    NewStockRefreshRecord, StockQuote, StockRefreshRecord, StockRefreshTask, StockTaskState,
    StockTaskStatus, StockTrade, WatchStock,
};
