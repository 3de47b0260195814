use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::LabelType;

/// Cloneable handle for publishing domain events
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes without waiting. Production state is already committed when
    /// events go out, so a full or closed channel is logged and dropped.
    pub fn send_or_log(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                metrics::counter!("battery_mes.events.dropped", 1);
                warn!(event = event.name(), "event channel full; dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(event = event.name(), "event channel closed; dropping event");
            }
        }
    }
}

/// Things that happened on the line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    StationEntered {
        operation_id: String,
        operator_id: String,
    },
    StationExited {
        operation_id: String,
        operator_id: String,
    },
    StationForceUnlocked {
        operation_id: String,
        previous_holder: Option<String>,
        by: String,
    },
    WorkOrderCreated {
        work_order_id: Uuid,
        order_number: String,
    },
    WorkOrderUpdated {
        work_order_id: Uuid,
        quantity: i32,
    },
    WorkOrderClosed {
        order_number: String,
        produced: u64,
        forced: bool,
    },
    UnitCreated {
        serial_number: String,
        order_number: String,
        operation_id: String,
    },
    UnitAdvanced {
        serial_number: String,
        operation_id: String,
        completed: bool,
    },
    TrayGenerated {
        tray_id: String,
        order_number: String,
        units: usize,
    },
    TrayAdvanced {
        tray_id: String,
        order_number: String,
        operation_id: String,
        units: usize,
    },
    LotCompleted {
        order_number: String,
        units: usize,
    },
    UnitUnassigned {
        serial_number: String,
        previous_order: Option<String>,
    },
    UnitReassigned {
        serial_number: String,
        order_number: String,
        operation_id: String,
    },
    LabelPrinted {
        reference: String,
        label_type: LabelType,
    },
    LabelPrintFailed {
        reference: String,
        label_type: LabelType,
        reason: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StationEntered { .. } => "station_entered",
            Event::StationExited { .. } => "station_exited",
            Event::StationForceUnlocked { .. } => "station_force_unlocked",
            Event::WorkOrderCreated { .. } => "work_order_created",
            Event::WorkOrderUpdated { .. } => "work_order_updated",
            Event::WorkOrderClosed { .. } => "work_order_closed",
            Event::UnitCreated { .. } => "unit_created",
            Event::UnitAdvanced { .. } => "unit_advanced",
            Event::TrayGenerated { .. } => "tray_generated",
            Event::TrayAdvanced { .. } => "tray_advanced",
            Event::LotCompleted { .. } => "lot_completed",
            Event::UnitUnassigned { .. } => "unit_unassigned",
            Event::UnitReassigned { .. } => "unit_reassigned",
            Event::LabelPrinted { .. } => "label_printed",
            Event::LabelPrintFailed { .. } => "label_print_failed",
        }
    }
}

/// Drains the event channel until every sender is dropped
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("battery_mes.events.processed", 1, "event" => event.name());

        match &event {
            Event::WorkOrderClosed {
                order_number,
                produced,
                forced: true,
            } => {
                warn!(
                    order_number = %order_number,
                    produced = *produced,
                    "work order closed by forced transition"
                );
            }
            Event::WorkOrderClosed {
                order_number,
                produced,
                ..
            } => {
                info!(order_number = %order_number, produced = *produced, "lot finished");
            }
            Event::StationForceUnlocked {
                operation_id,
                previous_holder,
                by,
            } => {
                warn!(
                    operation_id = %operation_id,
                    previous_holder = ?previous_holder,
                    by = %by,
                    "station force unlocked"
                );
            }
            Event::LabelPrintFailed {
                reference,
                label_type,
                reason,
            } => {
                warn!(
                    reference = %reference,
                    label_type = label_type.as_str(),
                    reason = %reason,
                    "label print failed"
                );
            }
            other => debug!(event = other.name(), payload = ?other, "event"),
        }
    }

    info!("Event processing loop stopped");
}
