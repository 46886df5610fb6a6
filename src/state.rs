use std::sync::Arc;

use crate::services::management::ManagementService;
use crate::services::stock_refresh::StockRefreshWorker;

#[derive(Clone)]
pub struct AppState {
    pub node_id: String,
    pub management: Arc<ManagementService>,
    pub stock_worker: Arc<StockRefreshWorker>,
}
