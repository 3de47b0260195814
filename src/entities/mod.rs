//! Persistence models for the line: catalog, work orders, units and their ledgers.

pub mod operation;
pub mod part_number;
pub mod print_event;
pub mod process_route;
pub mod route_step;
pub mod serial_history;
pub mod serial_unit;
pub mod work_order;

pub use part_number::SerialGenType;
pub use print_event::{LabelType, PrintStatus};
pub use work_order::WorkOrderStatus;
