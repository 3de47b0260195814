pub mod catalog;
pub mod common;
pub mod ledger;
pub mod serials;
pub mod stations;
pub mod work_orders;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    catalog::CatalogService,
    labels::{LabelPrinter, LabelService},
    ledger::LedgerService,
    lifecycle::{GenerationLimits, LifecycleService},
    station_lock::StationLockService,
    work_orders::WorkOrderService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub station_locks: Arc<StationLockService>,
    pub work_orders: Arc<WorkOrderService>,
    pub lifecycle: Arc<LifecycleService>,
    pub labels: Arc<LabelService>,
    pub ledger: Arc<LedgerService>,
}

impl AppServices {
    /// Builds every service over one pool and one event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        printer: Arc<dyn LabelPrinter>,
        limits: GenerationLimits,
    ) -> Self {
        let labels = LabelService::new(db_pool.clone(), printer, event_sender.clone());
        let work_orders = WorkOrderService::new(db_pool.clone(), event_sender.clone());
        let lifecycle = LifecycleService::new(
            db_pool.clone(),
            event_sender.clone(),
            labels.clone(),
            work_orders.clone(),
            limits,
        );

        Self {
            catalog: Arc::new(CatalogService::new(db_pool.clone())),
            station_locks: Arc::new(StationLockService::new(db_pool.clone(), event_sender)),
            work_orders: Arc::new(work_orders),
            lifecycle: Arc::new(lifecycle),
            labels: Arc::new(labels),
            ledger: Arc::new(LedgerService::new(db_pool)),
        }
    }
}
