use crate::{
    auth::Operator,
    db::DbPool,
    entities::{part_number, serial_history, serial_unit, work_order, WorkOrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::{final_operation_ids, find_part, find_part_by_product_code},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, Query},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Order with the figures the station screen shows next to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct WorkOrderSummary {
    pub order: work_order::Model,
    pub part: part_number::Model,
    pub produced: u64,
    pub remaining: u64,
    /// True when this call created the order
    pub created: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OpenOrGetInput {
    /// Internal or SAP order number to resume
    pub reference: Option<String>,
    pub product_code: Option<String>,
    pub quantity: Option<i32>,
    /// Route active at the station; the order's part must follow it
    pub route_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateWorkOrderInput {
    pub quantity: Option<i32>,
    pub status: Option<WorkOrderStatus>,
}

/// Outcome of a completion check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CompletionCheck {
    pub produced: u64,
    pub quantity: u64,
    /// Set when this check moved the order to CLOSED
    pub lot_finished: bool,
}

#[derive(Clone)]
pub struct WorkOrderService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl WorkOrderService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates an OPEN order with a fresh order number for the part sold as `product_code`.
    #[instrument(skip(self))]
    pub async fn generate_auto_order(
        &self,
        external_ref: Option<String>,
        product_code: &str,
        quantity: i32,
    ) -> Result<work_order::Model, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let db = &*self.db;
        let part = find_part_by_product_code(db, product_code).await?;

        let order = work_order::ActiveModel {
            order_number: Set(next_order_number()),
            sap_order_number: Set(external_ref
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())),
            part_number_id: Set(part.id),
            quantity: Set(quantity),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        counter!("battery_mes.work_orders.created", 1);
        info!(order_number = %order.order_number, part = %part.part_number, quantity, "work order opened");
        self.event_sender.send_or_log(Event::WorkOrderCreated {
            work_order_id: order.id,
            order_number: order.order_number.clone(),
        });

        Ok(order)
    }

    /// Finds an order by internal order number or SAP order number.
    #[instrument(skip(self))]
    pub async fn get_by_reference(&self, reference: &str) -> Result<work_order::Model, ServiceError> {
        find_by_reference(&*self.db, reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Work order {} not found", reference)))
    }

    pub async fn get(&self, id: Uuid) -> Result<work_order::Model, ServiceError> {
        work_order::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Work order {} not found", id)))
    }

    /// Resumes an order by reference, or opens a new one when none matches.
    #[instrument(skip(self, input))]
    pub async fn open_or_get(&self, input: OpenOrGetInput) -> Result<WorkOrderSummary, ServiceError> {
        let reference = input
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        let existing = match reference {
            Some(r) => find_by_reference(&*self.db, r).await?,
            None => None,
        };

        let (order, created) = match existing {
            Some(order) => (order, false),
            None => {
                let product_code = input.product_code.as_deref().ok_or_else(|| match reference {
                    Some(r) => ServiceError::NotFound(format!("Work order {} not found", r)),
                    None => ServiceError::ValidationError(
                        "an order reference or a product code is required".to_string(),
                    ),
                })?;
                let quantity = input.quantity.ok_or_else(|| {
                    ServiceError::ValidationError("quantity is required for a new order".to_string())
                })?;
                let order = self
                    .generate_auto_order(reference.map(str::to_string), product_code, quantity)
                    .await?;
                (order, true)
            }
        };

        let part = find_part(&*self.db, order.part_number_id).await?;
        if let (Some(active), Some(assigned)) = (input.route_id, part.process_route_id) {
            if active != assigned {
                counter!("battery_mes.scan.rejected", 1, "reason" => "wrong_context");
                return Err(ServiceError::WrongContext(format!(
                    "order {} builds part {} which follows a different route",
                    order.order_number, part.part_number
                )));
            }
        }

        self.summarize(order, part, created).await
    }

    /// Orders newest first
    #[instrument(skip(self))]
    pub async fn list(&self, limit: u64) -> Result<Vec<work_order::Model>, ServiceError> {
        work_order::Entity::find()
            .order_by_desc(work_order::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn summary(&self, reference: &str) -> Result<WorkOrderSummary, ServiceError> {
        let order = self.get_by_reference(reference).await?;
        let part = find_part(&*self.db, order.part_number_id).await?;
        self.summarize(order, part, false).await
    }

    async fn summarize(
        &self,
        order: work_order::Model,
        part: part_number::Model,
        created: bool,
    ) -> Result<WorkOrderSummary, ServiceError> {
        let produced = produced_count(&*self.db, &order.order_number).await?;
        let quantity = order.quantity.max(0) as u64;
        Ok(WorkOrderSummary {
            order,
            part,
            produced,
            remaining: quantity.saturating_sub(produced),
            created,
        })
    }

    /// Supervisor edit of the target quantity, or an admin-forced status change.
    #[instrument(skip(self, input, operator), fields(operator_id = %operator.id))]
    pub async fn update_order(
        &self,
        id: Uuid,
        input: UpdateWorkOrderInput,
        operator: &Operator,
    ) -> Result<work_order::Model, ServiceError> {
        if input.quantity.is_none() && input.status.is_none() {
            return Err(ServiceError::ValidationError("nothing to update".to_string()));
        }
        if let Some(quantity) = input.quantity {
            operator.require_supervisor("changing order quantity")?;
            if quantity < 1 {
                return Err(ServiceError::ValidationError(
                    "quantity must be at least 1".to_string(),
                ));
            }
        }
        if input.status.is_some() {
            operator.require_admin("forcing order status")?;
        }

        let current = self.get(id).await?;
        let mut update = work_order::Entity::update_many()
            .col_expr(
                work_order::Column::Version,
                Expr::col(work_order::Column::Version).add(1),
            )
            .col_expr(work_order::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(quantity) = input.quantity {
            update = update.col_expr(work_order::Column::Quantity, Expr::value(quantity));
        }
        let forced = input.status.filter(|s| *s != current.status);
        if let Some(status) = forced {
            let closed_at = match status {
                WorkOrderStatus::Closed => Some(Utc::now()),
                WorkOrderStatus::Open => None,
            };
            update = update
                .col_expr(work_order::Column::Status, Expr::value(status.as_str()))
                .col_expr(work_order::Column::ClosedAt, Expr::value(closed_at));
        }

        let result = update
            .filter(work_order::Column::Id.eq(id))
            .filter(work_order::Column::Version.eq(current.version))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "work order {} was modified concurrently",
                current.order_number
            )));
        }

        let updated = self.get(id).await?;
        self.event_sender.send_or_log(Event::WorkOrderUpdated {
            work_order_id: updated.id,
            quantity: updated.quantity,
        });
        if let Some(status) = forced {
            warn!(
                order_number = %updated.order_number,
                from = current.status.as_str(),
                to = status.as_str(),
                "forced work order status transition"
            );
            if status == WorkOrderStatus::Closed {
                let produced = produced_count(&*self.db, &updated.order_number).await?;
                counter!("battery_mes.work_orders.closed", 1, "forced" => "true");
                self.event_sender.send_or_log(Event::WorkOrderClosed {
                    order_number: updated.order_number.clone(),
                    produced,
                    forced: true,
                });
            }
        }

        Ok(updated)
    }

    /// Explicit completion check. Fails with `Conflict` when the order is already CLOSED.
    #[instrument(skip(self))]
    pub async fn close_if_complete(&self, reference: &str) -> Result<CompletionCheck, ServiceError> {
        let order = self.get_by_reference(reference).await?;
        if !order.is_open() {
            return Err(ServiceError::Conflict(format!(
                "work order {} is already closed",
                order.order_number
            )));
        }
        let check = close_if_complete(&*self.db, &order).await?;
        self.announce_close(&order.order_number, &check);
        Ok(check)
    }

    pub(crate) fn announce_close(&self, order_number: &str, check: &CompletionCheck) {
        if check.lot_finished {
            counter!("battery_mes.work_orders.closed", 1, "forced" => "false");
            self.event_sender.send_or_log(Event::WorkOrderClosed {
                order_number: order_number.to_string(),
                produced: check.produced,
                forced: false,
            });
        }
    }

    /// Detaches a unit from its order. History rows keep the order they were recorded under.
    #[instrument(skip(self, operator), fields(operator_id = %operator.id))]
    pub async fn unassign_serial(
        &self,
        serial_number: &str,
        operator: &Operator,
    ) -> Result<serial_unit::Model, ServiceError> {
        let db = &*self.db;
        let unit = serial_unit::Entity::find_by_id(serial_number.to_string())
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Serial {} not found", serial_number)))?;

        if unit.order_number.is_none() {
            return Ok(unit);
        }

        let result = serial_unit::Entity::update_many()
            .col_expr(
                serial_unit::Column::OrderNumber,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                serial_unit::Column::Version,
                Expr::col(serial_unit::Column::Version).add(1),
            )
            .col_expr(serial_unit::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(serial_unit::Column::SerialNumber.eq(serial_number))
            .filter(serial_unit::Column::Version.eq(unit.version))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "serial {} was modified concurrently",
                serial_number
            )));
        }

        info!(serial_number, previous_order = ?unit.order_number, "unit unassigned");
        self.event_sender.send_or_log(Event::UnitUnassigned {
            serial_number: serial_number.to_string(),
            previous_order: unit.order_number,
        });

        serial_unit::Entity::find_by_id(serial_number.to_string())
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Serial {} not found", serial_number)))
    }
}

/// Order number for system-generated orders
fn next_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "WO-{}-{}",
        Utc::now().format("%Y%m%d"),
        suffix[..10].to_uppercase()
    )
}

pub(crate) async fn find_by_reference<C: ConnectionTrait>(
    db: &C,
    reference: &str,
) -> Result<Option<work_order::Model>, ServiceError> {
    let reference = reference.trim();
    work_order::Entity::find()
        .filter(
            sea_orm::Condition::any()
                .add(work_order::Column::OrderNumber.eq(reference))
                .add(work_order::Column::SapOrderNumber.eq(reference)),
        )
        .order_by_desc(work_order::Column::CreatedAt)
        .one(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Units currently in the order that have visited a final station.
pub(crate) async fn produced_count<C: ConnectionTrait>(
    db: &C,
    order_number: &str,
) -> Result<u64, ServiceError> {
    let finals = final_operation_ids(db).await?;
    if finals.is_empty() {
        return Ok(0);
    }

    serial_history::Entity::find()
        .select_only()
        .column(serial_history::Column::SerialNumber)
        .distinct()
        .filter(serial_history::Column::OperationId.is_in(finals))
        .filter(
            serial_history::Column::SerialNumber.in_subquery(
                Query::select()
                    .column(serial_unit::Column::SerialNumber)
                    .from(serial_unit::Entity)
                    .and_where(serial_unit::Column::OrderNumber.eq(order_number))
                    .to_owned(),
            ),
        )
        .count(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Closes the order when produced >= quantity. The status flip is a
/// compare-and-set on `version`; losing the race surfaces as `Conflict`.
pub(crate) async fn close_if_complete<C: ConnectionTrait>(
    db: &C,
    order: &work_order::Model,
) -> Result<CompletionCheck, ServiceError> {
    let produced = produced_count(db, &order.order_number).await?;
    let quantity = order.quantity.max(0) as u64;
    let mut check = CompletionCheck {
        produced,
        quantity,
        lot_finished: false,
    };
    if !order.is_open() || produced < quantity {
        return Ok(check);
    }

    let now = Utc::now();
    let result = work_order::Entity::update_many()
        .col_expr(
            work_order::Column::Status,
            Expr::value(WorkOrderStatus::Closed.as_str()),
        )
        .col_expr(work_order::Column::ClosedAt, Expr::value(Some(now)))
        .col_expr(work_order::Column::UpdatedAt, Expr::value(now))
        .col_expr(
            work_order::Column::Version,
            Expr::col(work_order::Column::Version).add(1),
        )
        .filter(work_order::Column::Id.eq(order.id))
        .filter(work_order::Column::Version.eq(order.version))
        .filter(work_order::Column::Status.eq(WorkOrderStatus::Open))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "work order {} changed while closing",
            order.order_number
        )));
    }

    info!(order_number = %order.order_number, produced, quantity, "lot finished");
    check.lot_finished = true;
    Ok(check)
}
