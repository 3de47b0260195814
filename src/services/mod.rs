// Reference data
pub mod catalog;
pub mod serial_mask;

// Station access
pub mod station_lock;

// Production flow
pub mod lifecycle;
pub mod work_orders;

// Traceability
pub mod labels;
pub mod ledger;
