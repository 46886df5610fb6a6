pub mod job_queries;
pub mod runtime_queries;
pub mod execution_log_queries;
pub mod stock_queries;
