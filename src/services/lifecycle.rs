use crate::{
    auth::Operator,
    config::AppConfig,
    db::DbPool,
    entities::{
        operation, part_number, serial_history, serial_unit, work_order, LabelType,
        SerialGenType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::{ensure_station_on_route, find_operation, find_part},
        labels::{LabelService, PrintJob, PrintOutcome},
        serial_mask::validate_serial,
        station_lock::ensure_holder,
        work_orders::{
            close_if_complete, find_by_reference, produced_count, CompletionCheck,
            WorkOrderService,
        },
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Rows per multi-row insert, kept under SQLite's bound-parameter limit
const INSERT_CHUNK: usize = 500;

/// Labels excluded from a box label job so only the box label prints
const BOX_LABEL_EXCLUDES: [LabelType; 3] =
    [LabelType::Carton1, LabelType::Carton2, LabelType::Nameplate];

/// Ceilings on how many records one scan may synthesize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationLimits {
    pub max_tray_quantity: u32,
    pub max_lot_quantity: u32,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_tray_quantity: 100,
            max_lot_quantity: 9999,
        }
    }
}

impl From<&AppConfig> for GenerationLimits {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_tray_quantity: cfg.max_tray_quantity,
            max_lot_quantity: cfg.max_lot_quantity,
        }
    }
}

/// How a scan turns into unit records, selected by the part's `serial_gen_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStrategy {
    /// Each unit scanned by its own serial, validated against the part mask
    PerUnit,
    /// One tray scan creates or moves every unit on the tray
    PerTray,
    /// One action completes the whole remaining lot
    WholeLot,
}

impl From<SerialGenType> for GenerationStrategy {
    fn from(kind: SerialGenType) -> Self {
        match kind {
            SerialGenType::PcbSerial => Self::PerUnit,
            SerialGenType::LotBased => Self::PerTray,
            SerialGenType::Accessories => Self::WholeLot,
        }
    }
}

impl GenerationStrategy {
    /// Whether the scan code is a serial, a tray id, or unused
    pub fn code_label(&self) -> Option<&'static str> {
        match self {
            Self::PerUnit => Some("serial number"),
            Self::PerTray => Some("tray id"),
            Self::WholeLot => None,
        }
    }
}

/// A scan at a station
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub order_reference: String,
    pub operation_id: String,
    /// Serial number for PCB parts, tray id for lot parts
    pub code: Option<String>,
    /// Units to generate for a new tray; defaults to the part's std qty
    pub quantity: Option<u32>,
}

/// What a scan did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ScanOutcome {
    pub order_number: String,
    pub operation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tray_id: Option<String>,
    pub units: Vec<serial_unit::Model>,
    pub completed: usize,
    pub prints: Vec<PrintOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionCheck>,
    pub lot_finished: bool,
}

struct ScanContext {
    operation: operation::Model,
    order: work_order::Model,
    part: part_number::Model,
}

/// Everything decided inside the transaction, applied after commit
struct Staged {
    order_number: String,
    units: Vec<serial_unit::Model>,
    tray_id: Option<String>,
    prints: Vec<PrintJob>,
    completion: Option<CompletionCheck>,
    events: Vec<Event>,
}

/// Moves units through their route.
///
/// Every scan runs in one transaction: the station must be held by the
/// scanning operator, the order must be OPEN and the station must be on the
/// part's route. Labels print only after commit.
#[derive(Clone)]
pub struct LifecycleService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    labels: LabelService,
    work_orders: WorkOrderService,
    limits: GenerationLimits,
}

impl LifecycleService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        labels: LabelService,
        work_orders: WorkOrderService,
        limits: GenerationLimits,
    ) -> Self {
        Self {
            db,
            event_sender,
            labels,
            work_orders,
            limits,
        }
    }

    /// Single entry point for station scans; dispatches on the part's strategy.
    #[instrument(skip(self, request, operator), fields(operator_id = %operator.id, order = %request.order_reference))]
    pub async fn create_or_advance(
        &self,
        request: ScanRequest,
        operator: &Operator,
    ) -> Result<ScanOutcome, ServiceError> {
        let (strategy, is_initial, existing) = {
            let db = &*self.db;
            let order = find_by_reference(db, &request.order_reference)
                .await?
                .ok_or_else(|| not_found_order(&request.order_reference))?;
            let part = find_part(db, order.part_number_id).await?;
            let op = find_operation(db, &request.operation_id).await?;
            let strategy = GenerationStrategy::from(part.serial_gen_type);
            let existing = match (strategy, request.code.as_deref()) {
                (GenerationStrategy::PerUnit, Some(serial)) => {
                    serial_unit::Entity::find_by_id(serial.trim().to_string())
                        .count(db)
                        .await
                        .map_err(ServiceError::db_error)?
                        > 0
                }
                (GenerationStrategy::PerTray, Some(tray)) => {
                    serial_unit::Entity::find()
                        .filter(serial_unit::Column::TrayId.eq(tray.trim()))
                        .filter(serial_unit::Column::OrderNumber.eq(order.order_number.as_str()))
                        .count(db)
                        .await
                        .map_err(ServiceError::db_error)?
                        > 0
                }
                _ => false,
            };
            (strategy, op.is_initial, existing)
        };

        let code = match strategy.code_label() {
            Some(label) => request
                .code
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| ServiceError::ValidationError(format!("{} is required", label)))?
                .to_string(),
            None => String::new(),
        };

        match strategy {
            GenerationStrategy::PerUnit if !existing && is_initial => {
                self.create_unit(&code, &request.order_reference, &request.operation_id, operator)
                    .await
            }
            GenerationStrategy::PerUnit => {
                self.advance_unit(&code, &request.order_reference, &request.operation_id, operator)
                    .await
            }
            GenerationStrategy::PerTray if !existing && is_initial => {
                self.generate_batch(
                    &code,
                    &request.order_reference,
                    &request.operation_id,
                    request.quantity,
                    operator,
                )
                .await
            }
            GenerationStrategy::PerTray => {
                self.advance_batch(&code, &request.order_reference, &request.operation_id, operator)
                    .await
            }
            GenerationStrategy::WholeLot => {
                self.complete_lot(&request.order_reference, &request.operation_id, operator)
                    .await
            }
        }
    }

    /// Registers a PCB unit at an initial station and prints its nameplate.
    #[instrument(skip(self, operator), fields(operator_id = %operator.id))]
    pub async fn create_unit(
        &self,
        serial_number: &str,
        order_reference: &str,
        operation_id: &str,
        operator: &Operator,
    ) -> Result<ScanOutcome, ServiceError> {
        let serial_number = serial_number.trim();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let staged = stage_create_unit(&txn, serial_number, order_reference, operation_id, operator)
            .await
            .map_err(|e| rejected("create_unit", e))?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("battery_mes.units.created", 1);
        info!(serial_number, operation_id, "unit created");
        self.finish(operation_id, staged, operator).await
    }

    /// Moves a PCB unit to `operation_id`; completes it at a final station.
    #[instrument(skip(self, operator), fields(operator_id = %operator.id))]
    pub async fn advance_unit(
        &self,
        serial_number: &str,
        order_reference: &str,
        operation_id: &str,
        operator: &Operator,
    ) -> Result<ScanOutcome, ServiceError> {
        let serial_number = serial_number.trim();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let staged = stage_advance_unit(&txn, serial_number, order_reference, operation_id, operator)
            .await
            .map_err(|e| rejected("advance_unit", e))?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("battery_mes.units.advanced", 1);
        info!(serial_number, operation_id, "unit advanced");
        self.finish(operation_id, staged, operator).await
    }

    /// Synthesizes a tray of lot-tracked units at an initial station. All or nothing.
    #[instrument(skip(self, operator), fields(operator_id = %operator.id))]
    pub async fn generate_batch(
        &self,
        tray_id: &str,
        order_reference: &str,
        operation_id: &str,
        quantity: Option<u32>,
        operator: &Operator,
    ) -> Result<ScanOutcome, ServiceError> {
        let tray_id = tray_id.trim();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let staged = stage_generate_batch(
            &txn,
            tray_id,
            order_reference,
            operation_id,
            quantity,
            self.limits,
            operator,
        )
        .await
        .map_err(|e| rejected("generate_batch", e))?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("battery_mes.trays.generated", 1);
        counter!("battery_mes.units.created", staged.units.len() as u64);
        info!(tray_id, units = staged.units.len(), "tray generated");
        self.finish(operation_id, staged, operator).await
    }

    /// Moves every unit on the tray for this order. All or nothing.
    #[instrument(skip(self, operator), fields(operator_id = %operator.id))]
    pub async fn advance_batch(
        &self,
        tray_id: &str,
        order_reference: &str,
        operation_id: &str,
        operator: &Operator,
    ) -> Result<ScanOutcome, ServiceError> {
        let tray_id = tray_id.trim();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let staged = stage_advance_batch(&txn, tray_id, order_reference, operation_id, operator)
            .await
            .map_err(|e| rejected("advance_batch", e))?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("battery_mes.units.advanced", staged.units.len() as u64);
        info!(tray_id, units = staged.units.len(), "tray advanced");
        self.finish(operation_id, staged, operator).await
    }

    /// Records the remaining quantity of an accessories order as complete.
    #[instrument(skip(self, operator), fields(operator_id = %operator.id))]
    pub async fn complete_lot(
        &self,
        order_reference: &str,
        operation_id: &str,
        operator: &Operator,
    ) -> Result<ScanOutcome, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let staged = stage_complete_lot(&txn, order_reference, operation_id, self.limits, operator)
            .await
            .map_err(|e| rejected("complete_lot", e))?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("battery_mes.units.created", staged.units.len() as u64);
        info!(order_reference, units = staged.units.len(), "lot completed");
        self.finish(operation_id, staged, operator).await
    }

    /// Runs the post-commit effects on their own task. The scan is already
    /// committed, so a caller that gives up must not cut the print ledger short.
    async fn finish(
        &self,
        operation_id: &str,
        staged: Staged,
        operator: &Operator,
    ) -> Result<ScanOutcome, ServiceError> {
        let this = self.clone();
        let operation_id = operation_id.to_string();
        let operator = operator.clone();
        tokio::spawn(async move { this.after_commit(&operation_id, staged, &operator).await })
            .await
            .map_err(|e| ServiceError::InternalError(format!("post-commit task failed: {}", e)))
    }

    /// Post-commit side effects: events, completion signal, labels
    async fn after_commit(&self, operation_id: &str, staged: Staged, operator: &Operator) -> ScanOutcome {
        for event in staged.events {
            self.event_sender.send_or_log(event);
        }

        if let Some(check) = &staged.completion {
            self.work_orders.announce_close(&staged.order_number, check);
        }

        let prints = self.labels.print_all(staged.prints, Some(&operator.id)).await;

        ScanOutcome {
            order_number: staged.order_number,
            operation_id: operation_id.to_string(),
            tray_id: staged.tray_id,
            completed: staged.units.iter().filter(|u| u.is_complete).count(),
            lot_finished: staged.completion.map(|c| c.lot_finished).unwrap_or(false),
            completion: staged.completion,
            units: staged.units,
            prints,
        }
    }
}

fn not_found_order(reference: &str) -> ServiceError {
    ServiceError::NotFound(format!("Work order {} not found", reference))
}

fn rejected(action: &'static str, err: ServiceError) -> ServiceError {
    if !err.is_retryable() {
        counter!("battery_mes.scan.rejected", 1, "reason" => err.code());
        warn!(action, code = err.code(), error = %err, "scan rejected");
    }
    err
}

async fn prepare(
    txn: &DatabaseTransaction,
    order_reference: &str,
    operation_id: &str,
    operator: &Operator,
) -> Result<ScanContext, ServiceError> {
    let operation = ensure_holder(txn, operation_id, &operator.id).await?;
    let order = find_by_reference(txn, order_reference)
        .await?
        .ok_or_else(|| not_found_order(order_reference))?;
    if !order.is_open() {
        return Err(ServiceError::Conflict(format!(
            "work order {} is closed",
            order.order_number
        )));
    }
    let part = find_part(txn, order.part_number_id).await?;
    ensure_station_on_route(txn, &part, &operation.id).await?;

    Ok(ScanContext {
        operation,
        order,
        part,
    })
}

fn ensure_strategy(part: &part_number::Model, expected: GenerationStrategy) -> Result<(), ServiceError> {
    if GenerationStrategy::from(part.serial_gen_type) == expected {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "part {} is {} and cannot be processed this way",
            part.part_number,
            part.serial_gen_type.as_str()
        )))
    }
}

fn ensure_initial(op: &operation::Model) -> Result<(), ServiceError> {
    if op.is_initial {
        Ok(())
    } else {
        Err(ServiceError::WrongContext(format!(
            "new units can only be registered at an initial station, not {}",
            op.id
        )))
    }
}

fn new_unit(
    serial_number: String,
    ctx: &ScanContext,
    tray_id: Option<String>,
    is_complete: bool,
    now: DateTime<Utc>,
) -> serial_unit::ActiveModel {
    serial_unit::ActiveModel {
        serial_number: Set(serial_number),
        order_number: Set(Some(ctx.order.order_number.clone())),
        part_number_id: Set(ctx.part.id),
        current_operation_id: Set(ctx.operation.id.clone()),
        is_complete: Set(is_complete),
        tray_id: Set(tray_id),
        version: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

fn history_row(
    serial_number: &str,
    ctx: &ScanContext,
    operator: &Operator,
    now: DateTime<Utc>,
) -> serial_history::ActiveModel {
    serial_history::ActiveModel {
        serial_number: Set(serial_number.to_string()),
        operation_id: Set(ctx.operation.id.clone()),
        operation_name: Set(ctx.operation.name.clone()),
        operator_id: Set(operator.id.clone()),
        operator_name: Set(operator.name.clone()),
        order_number: Set(Some(ctx.order.order_number.clone())),
        recorded_at: Set(now),
        ..Default::default()
    }
}

/// Generated identifier for lot and accessory units
fn generate_serial() -> String {
    format!("SN-{}", Uuid::new_v4().simple().to_string().to_uppercase())
}

async fn insert_units(
    txn: &DatabaseTransaction,
    units: Vec<serial_unit::ActiveModel>,
) -> Result<(), ServiceError> {
    for chunk in units.chunks(INSERT_CHUNK) {
        serial_unit::Entity::insert_many(chunk.to_vec())
            .exec_without_returning(txn)
            .await
            .map_err(ServiceError::db_error)?;
    }
    Ok(())
}

async fn append_history(
    txn: &DatabaseTransaction,
    rows: Vec<serial_history::ActiveModel>,
) -> Result<(), ServiceError> {
    for chunk in rows.chunks(INSERT_CHUNK) {
        serial_history::Entity::insert_many(chunk.to_vec())
            .exec_without_returning(txn)
            .await
            .map_err(ServiceError::db_error)?;
    }
    Ok(())
}

/// Compare-and-set move of one unit; a concurrent writer makes it a `Conflict`.
async fn move_unit(
    txn: &DatabaseTransaction,
    unit: &serial_unit::Model,
    operation: &operation::Model,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let result = serial_unit::Entity::update_many()
        .col_expr(
            serial_unit::Column::CurrentOperationId,
            Expr::value(operation.id.clone()),
        )
        .col_expr(serial_unit::Column::IsComplete, Expr::value(operation.is_final))
        .col_expr(
            serial_unit::Column::Version,
            Expr::col(serial_unit::Column::Version).add(1),
        )
        .col_expr(serial_unit::Column::UpdatedAt, Expr::value(now))
        .filter(serial_unit::Column::SerialNumber.eq(unit.serial_number.as_str()))
        .filter(serial_unit::Column::Version.eq(unit.version))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "serial {} was modified concurrently",
            unit.serial_number
        )));
    }
    Ok(())
}

async fn reload_units(
    txn: &DatabaseTransaction,
    serials: Vec<String>,
) -> Result<Vec<serial_unit::Model>, ServiceError> {
    let mut units = Vec::with_capacity(serials.len());
    for chunk in serials.chunks(INSERT_CHUNK) {
        units.extend(
            serial_unit::Entity::find()
                .filter(serial_unit::Column::SerialNumber.is_in(chunk.to_vec()))
                .order_by_asc(serial_unit::Column::SerialNumber)
                .all(txn)
                .await
                .map_err(ServiceError::db_error)?,
        );
    }
    Ok(units)
}

/// Runs the completion check when the scan happened at a final station
async fn completion_after_final(
    txn: &DatabaseTransaction,
    ctx: &ScanContext,
) -> Result<Option<CompletionCheck>, ServiceError> {
    if ctx.operation.is_final {
        Ok(Some(close_if_complete(txn, &ctx.order).await?))
    } else {
        Ok(None)
    }
}

fn box_label_job(ctx: &ScanContext) -> PrintJob {
    PrintJob::for_part(
        ctx.order.order_number.clone(),
        Some(ctx.order.order_number.clone()),
        &ctx.part,
        LabelType::BoxLabel,
    )
    .excluding(&BOX_LABEL_EXCLUDES)
}

/// Nameplate per unit then one box label, for trays that reach a final station.
/// Empty anywhere else.
fn pack_out_jobs(ctx: &ScanContext, serials: &[String]) -> Vec<PrintJob> {
    if !ctx.operation.is_final || serials.is_empty() {
        return Vec::new();
    }
    let mut jobs: Vec<PrintJob> = serials
        .iter()
        .map(|sn| {
            PrintJob::for_part(
                sn.clone(),
                Some(ctx.order.order_number.clone()),
                &ctx.part,
                LabelType::Nameplate,
            )
        })
        .collect();
    jobs.push(box_label_job(ctx));
    jobs
}

async fn stage_create_unit(
    txn: &DatabaseTransaction,
    serial_number: &str,
    order_reference: &str,
    operation_id: &str,
    operator: &Operator,
) -> Result<Staged, ServiceError> {
    if serial_number.is_empty() {
        return Err(ServiceError::ValidationError("serial number is required".to_string()));
    }
    let ctx = prepare(txn, order_reference, operation_id, operator).await?;
    ensure_strategy(&ctx.part, GenerationStrategy::PerUnit)?;
    ensure_initial(&ctx.operation)?;
    validate_serial(ctx.part.serial_mask.as_deref(), serial_number)?;

    let existing = serial_unit::Entity::find_by_id(serial_number.to_string())
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?;
    match existing {
        Some(unit) if unit.order_number.is_none() => {
            return stage_reattach_unit(txn, unit, ctx, operator).await;
        }
        Some(_) => {
            return Err(ServiceError::Conflict(format!(
                "serial {} already exists",
                serial_number
            )));
        }
        None => {}
    }

    let now = Utc::now();
    insert_units(
        txn,
        vec![new_unit(serial_number.to_string(), &ctx, None, ctx.operation.is_final, now)],
    )
    .await?;
    append_history(txn, vec![history_row(serial_number, &ctx, operator, now)]).await?;

    let mut prints = vec![PrintJob::for_part(
        serial_number,
        Some(ctx.order.order_number.clone()),
        &ctx.part,
        LabelType::Nameplate,
    )];
    if ctx.operation.is_final {
        prints.extend(carton_job(txn, &ctx, serial_number).await?);
    }
    let completion = completion_after_final(txn, &ctx).await?;
    let units = reload_units(txn, vec![serial_number.to_string()]).await?;

    Ok(Staged {
        order_number: ctx.order.order_number.clone(),
        events: vec![Event::UnitCreated {
            serial_number: serial_number.to_string(),
            order_number: ctx.order.order_number.clone(),
            operation_id: ctx.operation.id.clone(),
        }],
        units,
        tray_id: None,
        prints,
        completion,
    })
}

/// CARTON1 job when the order's running completed count fills a container
async fn carton_job(
    txn: &DatabaseTransaction,
    ctx: &ScanContext,
    serial_number: &str,
) -> Result<Option<PrintJob>, ServiceError> {
    let running = produced_count(txn, &ctx.order.order_number).await?;
    if running > 0 && running % u64::from(ctx.part.pack_size()) == 0 {
        info!(
            order_number = %ctx.order.order_number,
            running,
            "container filled"
        );
        Ok(Some(PrintJob::for_part(
            serial_number,
            Some(ctx.order.order_number.clone()),
            &ctx.part,
            LabelType::Carton1,
        )))
    } else {
        Ok(None)
    }
}

async fn stage_advance_unit(
    txn: &DatabaseTransaction,
    serial_number: &str,
    order_reference: &str,
    operation_id: &str,
    operator: &Operator,
) -> Result<Staged, ServiceError> {
    let ctx = prepare(txn, order_reference, operation_id, operator).await?;
    ensure_strategy(&ctx.part, GenerationStrategy::PerUnit)?;

    let unit = serial_unit::Entity::find_by_id(serial_number.to_string())
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Serial {} not found", serial_number)))?;
    if unit.order_number.is_none() {
        if ctx.operation.is_initial {
            return stage_reattach_unit(txn, unit, ctx, operator).await;
        }
        return Err(ServiceError::WrongLot(format!(
            "serial {} has no order; scan it at an initial station to assign it to {}",
            serial_number, ctx.order.order_number
        )));
    }
    if !unit.belongs_to_order(&ctx.order.order_number) {
        return Err(ServiceError::WrongLot(format!(
            "serial {} belongs to {} not {}",
            serial_number,
            unit.order_number.as_deref().unwrap_or("no order"),
            ctx.order.order_number
        )));
    }
    if unit.is_complete {
        return Err(ServiceError::Conflict(format!(
            "serial {} is already complete",
            serial_number
        )));
    }

    let now = Utc::now();
    move_unit(txn, &unit, &ctx.operation, now).await?;
    append_history(txn, vec![history_row(serial_number, &ctx, operator, now)]).await?;

    let mut prints = Vec::new();
    if ctx.operation.is_final {
        prints.push(PrintJob::for_part(
            serial_number,
            Some(ctx.order.order_number.clone()),
            &ctx.part,
            LabelType::Nameplate,
        ));
        prints.extend(carton_job(txn, &ctx, serial_number).await?);
    }
    let completion = completion_after_final(txn, &ctx).await?;
    let units = reload_units(txn, vec![serial_number.to_string()]).await?;

    Ok(Staged {
        order_number: ctx.order.order_number.clone(),
        events: vec![Event::UnitAdvanced {
            serial_number: serial_number.to_string(),
            operation_id: ctx.operation.id.clone(),
            completed: ctx.operation.is_final,
        }],
        units,
        tray_id: None,
        prints,
        completion,
    })
}

/// Attaches an unassigned unit to the scanned order at an initial station.
/// Earlier history rows keep the order they were recorded under.
async fn stage_reattach_unit(
    txn: &DatabaseTransaction,
    unit: serial_unit::Model,
    ctx: ScanContext,
    operator: &Operator,
) -> Result<Staged, ServiceError> {
    ensure_initial(&ctx.operation)?;
    let serial_number = unit.serial_number.as_str();
    validate_serial(ctx.part.serial_mask.as_deref(), serial_number)?;

    let now = Utc::now();
    let result = serial_unit::Entity::update_many()
        .col_expr(
            serial_unit::Column::OrderNumber,
            Expr::value(Some(ctx.order.order_number.clone())),
        )
        .col_expr(serial_unit::Column::PartNumberId, Expr::value(ctx.part.id))
        .col_expr(
            serial_unit::Column::CurrentOperationId,
            Expr::value(ctx.operation.id.clone()),
        )
        .col_expr(serial_unit::Column::IsComplete, Expr::value(ctx.operation.is_final))
        .col_expr(
            serial_unit::Column::Version,
            Expr::col(serial_unit::Column::Version).add(1),
        )
        .col_expr(serial_unit::Column::UpdatedAt, Expr::value(now))
        .filter(serial_unit::Column::SerialNumber.eq(serial_number))
        .filter(serial_unit::Column::OrderNumber.is_null())
        .filter(serial_unit::Column::Version.eq(unit.version))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "serial {} was modified concurrently",
            serial_number
        )));
    }
    append_history(txn, vec![history_row(serial_number, &ctx, operator, now)]).await?;

    let mut prints = vec![PrintJob::for_part(
        serial_number,
        Some(ctx.order.order_number.clone()),
        &ctx.part,
        LabelType::Nameplate,
    )];
    if ctx.operation.is_final {
        prints.extend(carton_job(txn, &ctx, serial_number).await?);
    }
    let completion = completion_after_final(txn, &ctx).await?;
    let units = reload_units(txn, vec![unit.serial_number.clone()]).await?;

    info!(
        serial_number,
        order_number = %ctx.order.order_number,
        "unit reassigned"
    );
    Ok(Staged {
        order_number: ctx.order.order_number.clone(),
        events: vec![Event::UnitReassigned {
            serial_number: unit.serial_number.clone(),
            order_number: ctx.order.order_number.clone(),
            operation_id: ctx.operation.id.clone(),
        }],
        units,
        tray_id: None,
        prints,
        completion,
    })
}

async fn stage_generate_batch(
    txn: &DatabaseTransaction,
    tray_id: &str,
    order_reference: &str,
    operation_id: &str,
    quantity: Option<u32>,
    limits: GenerationLimits,
    operator: &Operator,
) -> Result<Staged, ServiceError> {
    if tray_id.is_empty() {
        return Err(ServiceError::ValidationError("tray id is required".to_string()));
    }
    let ctx = prepare(txn, order_reference, operation_id, operator).await?;
    ensure_strategy(&ctx.part, GenerationStrategy::PerTray)?;
    ensure_initial(&ctx.operation)?;

    let on_tray = serial_unit::Entity::find()
        .filter(serial_unit::Column::TrayId.eq(tray_id))
        .filter(serial_unit::Column::OrderNumber.eq(ctx.order.order_number.as_str()))
        .count(txn)
        .await
        .map_err(ServiceError::db_error)?;
    if on_tray > 0 {
        return Err(ServiceError::Conflict(format!(
            "tray {} already holds units for {}",
            tray_id, ctx.order.order_number
        )));
    }

    let requested = quantity.unwrap_or_else(|| ctx.part.pack_size());
    if requested == 0 {
        return Err(ServiceError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }
    let count = tray_quantity(requested, ctx.order.quantity, limits);

    let now = Utc::now();
    let serials: Vec<String> = (0..count).map(|_| generate_serial()).collect();
    let units = serials
        .iter()
        .map(|sn| new_unit(sn.clone(), &ctx, Some(tray_id.to_string()), ctx.operation.is_final, now))
        .collect();
    insert_units(txn, units).await?;
    append_history(
        txn,
        serials
            .iter()
            .map(|sn| history_row(sn, &ctx, operator, now))
            .collect(),
    )
    .await?;

    let prints = pack_out_jobs(&ctx, &serials);
    let completion = completion_after_final(txn, &ctx).await?;
    let units = reload_units(txn, serials).await?;

    Ok(Staged {
        order_number: ctx.order.order_number.clone(),
        events: vec![Event::TrayGenerated {
            tray_id: tray_id.to_string(),
            order_number: ctx.order.order_number.clone(),
            units: units.len(),
        }],
        units,
        tray_id: Some(tray_id.to_string()),
        prints,
        completion,
    })
}

/// Units for a new tray: never above the order quantity or the tray ceiling
fn tray_quantity(requested: u32, order_quantity: i32, limits: GenerationLimits) -> u32 {
    let order_quantity = order_quantity.max(1) as u32;
    requested.min(order_quantity).min(limits.max_tray_quantity).max(1)
}

async fn stage_advance_batch(
    txn: &DatabaseTransaction,
    tray_id: &str,
    order_reference: &str,
    operation_id: &str,
    operator: &Operator,
) -> Result<Staged, ServiceError> {
    if tray_id.is_empty() {
        return Err(ServiceError::ValidationError("tray id is required".to_string()));
    }
    let ctx = prepare(txn, order_reference, operation_id, operator).await?;
    ensure_strategy(&ctx.part, GenerationStrategy::PerTray)?;

    let units = serial_unit::Entity::find()
        .filter(serial_unit::Column::TrayId.eq(tray_id))
        .filter(serial_unit::Column::OrderNumber.eq(ctx.order.order_number.as_str()))
        .order_by_asc(serial_unit::Column::SerialNumber)
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?;
    if units.is_empty() {
        let elsewhere = serial_unit::Entity::find()
            .filter(serial_unit::Column::TrayId.eq(tray_id))
            .count(txn)
            .await
            .map_err(ServiceError::db_error)?;
        return Err(if elsewhere > 0 {
            ServiceError::WrongLot(format!(
                "tray {} holds no units for {}",
                tray_id, ctx.order.order_number
            ))
        } else {
            ServiceError::NotFound(format!("Tray {} not found", tray_id))
        });
    }
    if let Some(done) = units.iter().find(|u| u.is_complete) {
        return Err(ServiceError::Conflict(format!(
            "tray {} contains completed serial {}",
            tray_id, done.serial_number
        )));
    }

    let now = Utc::now();
    for unit in &units {
        move_unit(txn, unit, &ctx.operation, now).await?;
    }
    append_history(
        txn,
        units
            .iter()
            .map(|u| history_row(&u.serial_number, &ctx, operator, now))
            .collect(),
    )
    .await?;

    let serials: Vec<String> = units.into_iter().map(|u| u.serial_number).collect();
    let prints = pack_out_jobs(&ctx, &serials);
    let completion = completion_after_final(txn, &ctx).await?;
    let units = reload_units(txn, serials).await?;

    Ok(Staged {
        order_number: ctx.order.order_number.clone(),
        events: vec![Event::TrayAdvanced {
            tray_id: tray_id.to_string(),
            order_number: ctx.order.order_number.clone(),
            operation_id: ctx.operation.id.clone(),
            units: units.len(),
        }],
        units,
        tray_id: Some(tray_id.to_string()),
        prints,
        completion,
    })
}

async fn stage_complete_lot(
    txn: &DatabaseTransaction,
    order_reference: &str,
    operation_id: &str,
    limits: GenerationLimits,
    operator: &Operator,
) -> Result<Staged, ServiceError> {
    let ctx = prepare(txn, order_reference, operation_id, operator).await?;
    ensure_strategy(&ctx.part, GenerationStrategy::WholeLot)?;
    if !ctx.operation.is_final {
        return Err(ServiceError::WrongContext(format!(
            "lots are completed at a final station, not {}",
            ctx.operation.id
        )));
    }

    let produced = produced_count(txn, &ctx.order.order_number).await?;
    let remaining = (ctx.order.quantity.max(0) as u64).saturating_sub(produced);
    let count = remaining.min(u64::from(limits.max_lot_quantity)) as usize;

    let now = Utc::now();
    let serials: Vec<String> = (0..count).map(|_| generate_serial()).collect();
    insert_units(
        txn,
        serials
            .iter()
            .map(|sn| new_unit(sn.clone(), &ctx, None, true, now))
            .collect(),
    )
    .await?;
    append_history(
        txn,
        serials
            .iter()
            .map(|sn| history_row(sn, &ctx, operator, now))
            .collect(),
    )
    .await?;

    let completion = completion_after_final(txn, &ctx).await?;
    let units = reload_units(txn, serials).await?;

    Ok(Staged {
        order_number: ctx.order.order_number.clone(),
        events: vec![Event::LotCompleted {
            order_number: ctx.order.order_number.clone(),
            units: units.len(),
        }],
        prints: if units.is_empty() {
            Vec::new()
        } else {
            vec![box_label_job(&ctx)]
        },
        units,
        tray_id: None,
        completion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SerialGenType::PcbSerial, GenerationStrategy::PerUnit)]
    #[case(SerialGenType::LotBased, GenerationStrategy::PerTray)]
    #[case(SerialGenType::Accessories, GenerationStrategy::WholeLot)]
    fn strategy_follows_serial_gen_type(
        #[case] kind: SerialGenType,
        #[case] expected: GenerationStrategy,
    ) {
        assert_eq!(GenerationStrategy::from(kind), expected);
    }

    #[test]
    fn whole_lot_needs_no_scan_code() {
        assert_eq!(GenerationStrategy::WholeLot.code_label(), None);
        assert_eq!(GenerationStrategy::PerTray.code_label(), Some("tray id"));
    }

    #[rstest]
    #[case(5, 40, 5)]
    #[case(500, 1000, 100)]
    #[case(50, 12, 12)]
    #[case(5, 0, 1)]
    fn tray_quantity_is_bounded(#[case] requested: u32, #[case] order_qty: i32, #[case] expected: u32) {
        assert_eq!(
            tray_quantity(requested, order_qty, GenerationLimits::default()),
            expected
        );
    }

    #[test]
    fn generated_serials_are_unique() {
        let serials: std::collections::HashSet<_> = (0..1000).map(|_| generate_serial()).collect();
        assert_eq!(serials.len(), 1000);
        assert!(serials.iter().all(|s| s.starts_with("SN-")));
    }
}
