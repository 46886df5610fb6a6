pub mod distributor;
pub mod executor;
pub mod handlers;
pub mod lock;
pub mod management;
pub mod message_queue;
pub mod monitoring;
pub mod node_registry;
pub mod notification;
pub mod recovery;
pub mod replenishment;
pub mod scheduler;
pub mod stock_refresh;
pub mod trigger;
pub mod worker_pool;
