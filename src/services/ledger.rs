use crate::{
    db::DbPool,
    entities::{operation, part_number, print_event, serial_history, serial_unit},
    errors::ServiceError,
    services::{
        catalog::load_route,
        work_orders::find_by_reference,
    },
};
use chrono::{DateTime, Duration, Timelike, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

/// Shift hours always present in the hourly series
const SHIFT_HOURS: std::ops::RangeInclusive<u32> = 6..=22;

/// Cycle times at or beyond this are treated as abandoned units
const CYCLE_PLAUSIBILITY_HOURS: i64 = 48;

/// A unit with its full trace, oldest entry first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UnitTrace {
    pub unit: serial_unit::Model,
    pub history: Vec<serial_history::Model>,
    pub prints: Vec<print_event::Model>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct HourlyBucket {
    pub hour: u32,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProductionStats {
    pub target_operation_id: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub produced: u64,
    pub hourly: Vec<HourlyBucket>,
    pub avg_cycle_minutes: u64,
    pub wip: u64,
    pub fpy: f64,
}

#[derive(Debug, Clone, Default)]
pub struct StatsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub route_id: Option<Uuid>,
    pub operation_id: Option<String>,
}

/// Row of the supervisor's station board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StationStatus {
    pub operation_id: String,
    pub name: String,
    pub order_index: i32,
    pub is_initial: bool,
    pub is_final: bool,
    pub holder_id: Option<String>,
    pub holder_name: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Incomplete units currently sitting at this station
    pub units_waiting: u64,
}

/// Read side of the traceability ledger. History and print rows are only
/// ever inserted; nothing here or elsewhere updates or deletes them.
#[derive(Clone)]
pub struct LedgerService {
    db: Arc<DbPool>,
}

impl LedgerService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn unit_trace(&self, serial_number: &str) -> Result<UnitTrace, ServiceError> {
        let db = &*self.db;
        let unit = serial_unit::Entity::find_by_id(serial_number.to_string())
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Serial {} not found", serial_number)))?;
        let history = history_for_units(db, vec![serial_number.to_string()]).await?;
        let prints = print_event::Entity::find()
            .filter(print_event::Column::Reference.eq(serial_number))
            .order_by_asc(print_event::Column::PrintedAt)
            .order_by_asc(print_event::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(UnitTrace {
            unit,
            history,
            prints,
        })
    }

    /// History recorded under the order, including units unassigned since.
    #[instrument(skip(self))]
    pub async fn history_for_order(
        &self,
        order_reference: &str,
    ) -> Result<Vec<serial_history::Model>, ServiceError> {
        let db = &*self.db;
        let order = find_by_reference(db, order_reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Work order {} not found", order_reference)))?;
        serial_history::Entity::find()
            .filter(serial_history::Column::OrderNumber.eq(order.order_number.as_str()))
            .order_by_asc(serial_history::Column::RecordedAt)
            .order_by_asc(serial_history::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn units_for_order(
        &self,
        order_reference: &str,
    ) -> Result<Vec<serial_unit::Model>, ServiceError> {
        let db = &*self.db;
        let order = find_by_reference(db, order_reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Work order {} not found", order_reference)))?;
        serial_unit::Entity::find()
            .filter(serial_unit::Column::OrderNumber.eq(order.order_number.as_str()))
            .order_by_asc(serial_unit::Column::CreatedAt)
            .order_by_asc(serial_unit::Column::SerialNumber)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Units sharing a tray id, optionally narrowed to one order
    #[instrument(skip(self))]
    pub async fn units_on_tray(
        &self,
        tray_id: &str,
        order_number: Option<&str>,
    ) -> Result<Vec<serial_unit::Model>, ServiceError> {
        let mut query = serial_unit::Entity::find().filter(serial_unit::Column::TrayId.eq(tray_id));
        if let Some(order_number) = order_number {
            query = query.filter(serial_unit::Column::OrderNumber.eq(order_number));
        }
        query
            .order_by_asc(serial_unit::Column::SerialNumber)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Print attempts for a serial, or for an order when given its number
    pub async fn print_history(&self, reference: &str) -> Result<Vec<print_event::Model>, ServiceError> {
        print_event::Entity::find()
            .filter(
                sea_orm::Condition::any()
                    .add(print_event::Column::Reference.eq(reference))
                    .add(print_event::Column::OrderNumber.eq(reference)),
            )
            .order_by_asc(print_event::Column::PrintedAt)
            .order_by_asc(print_event::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn station_board(&self) -> Result<Vec<StationStatus>, ServiceError> {
        let db = &*self.db;
        let operations = operation::Entity::find()
            .order_by_asc(operation::Column::OrderIndex)
            .order_by_asc(operation::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut board = Vec::with_capacity(operations.len());
        for op in operations {
            let units_waiting = serial_unit::Entity::find()
                .filter(serial_unit::Column::CurrentOperationId.eq(op.id.as_str()))
                .filter(serial_unit::Column::IsComplete.eq(false))
                .count(db)
                .await
                .map_err(ServiceError::db_error)?;
            board.push(StationStatus {
                operation_id: op.id,
                name: op.name,
                order_index: op.order_index,
                is_initial: op.is_initial,
                is_final: op.is_final,
                holder_id: op.active_operator_id,
                holder_name: op.active_operator_name,
                locked_at: op.locked_at,
                units_waiting,
            });
        }
        Ok(board)
    }

    /// Throughput figures for the dashboard. Defaults to the last 24 hours.
    #[instrument(skip(self))]
    pub async fn production_stats(&self, query: StatsQuery) -> Result<ProductionStats, ServiceError> {
        let db = &*self.db;
        let to = query.to.unwrap_or_else(Utc::now);
        let from = query.from.unwrap_or(to - Duration::hours(24));
        if from > to {
            return Err(ServiceError::ValidationError(
                "`from` must not be after `to`".to_string(),
            ));
        }

        let target = resolve_target(db, query.route_id, query.operation_id).await?;
        let part_ids = match query.route_id {
            Some(route_id) => Some(
                part_number::Entity::find()
                    .filter(part_number::Column::ProcessRouteId.eq(route_id))
                    .all(db)
                    .await
                    .map_err(ServiceError::db_error)?
                    .into_iter()
                    .map(|p| p.id)
                    .collect::<Vec<_>>(),
            ),
            None => None,
        };

        let mut wip_query = serial_unit::Entity::find().filter(serial_unit::Column::IsComplete.eq(false));
        if let Some(ids) = &part_ids {
            wip_query = wip_query.filter(serial_unit::Column::PartNumberId.is_in(ids.clone()));
        }
        let wip = wip_query.count(db).await.map_err(ServiceError::db_error)?;

        let Some(target) = target else {
            return Ok(compute_stats(None, from, to, &[], &HashMap::new(), wip));
        };

        let mut produced_query = serial_history::Entity::find()
            .filter(serial_history::Column::OperationId.eq(target.as_str()))
            .filter(serial_history::Column::RecordedAt.gte(from))
            .filter(serial_history::Column::RecordedAt.lte(to));
        if let Some(ids) = &part_ids {
            let serials: Vec<String> = serial_unit::Entity::find()
                .filter(serial_unit::Column::PartNumberId.is_in(ids.clone()))
                .all(db)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|u| u.serial_number)
                .collect();
            produced_query = produced_query.filter(serial_history::Column::SerialNumber.is_in(serials));
        }
        let target_entries = produced_query
            .order_by_asc(serial_history::Column::RecordedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let serials: Vec<String> = target_entries
            .iter()
            .map(|e| e.serial_number.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut histories: HashMap<String, Vec<serial_history::Model>> = HashMap::new();
        for entry in history_for_units(db, serials).await? {
            histories.entry(entry.serial_number.clone()).or_default().push(entry);
        }

        Ok(compute_stats(Some(target), from, to, &target_entries, &histories, wip))
    }
}

async fn history_for_units<C: ConnectionTrait>(
    db: &C,
    serials: Vec<String>,
) -> Result<Vec<serial_history::Model>, ServiceError> {
    let mut rows = Vec::new();
    for chunk in serials.chunks(500) {
        rows.extend(
            serial_history::Entity::find()
                .filter(serial_history::Column::SerialNumber.is_in(chunk.to_vec()))
                .order_by_asc(serial_history::Column::RecordedAt)
                .order_by_asc(serial_history::Column::Id)
                .all(db)
                .await
                .map_err(ServiceError::db_error)?,
        );
    }
    Ok(rows)
}

/// Explicit operation, else the route's last step, else the first final station.
async fn resolve_target<C: ConnectionTrait>(
    db: &C,
    route_id: Option<Uuid>,
    operation_id: Option<String>,
) -> Result<Option<String>, ServiceError> {
    if let Some(op) = operation_id.filter(|o| !o.trim().is_empty()) {
        return Ok(Some(op));
    }
    if let Some(route_id) = route_id {
        let route = load_route(db, route_id).await?;
        if let Some(step) = route.last_step() {
            return Ok(Some(step.operation_id.clone()));
        }
    }
    Ok(operation::Entity::find()
        .filter(operation::Column::IsFinal.eq(true))
        .order_by_asc(operation::Column::OrderIndex)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .map(|op| op.id))
}

/// Pure aggregation over ledger rows.
///
/// A unit counts once, in the hour of its latest target entry. Cycle time
/// runs from its first history entry to that target entry. FPY is the share
/// of produced units that never visited a station twice.
fn compute_stats(
    target: Option<String>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    target_entries: &[serial_history::Model],
    histories: &HashMap<String, Vec<serial_history::Model>>,
    wip: u64,
) -> ProductionStats {
    let mut last_hit: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for entry in target_entries {
        let slot = last_hit.entry(entry.serial_number.as_str()).or_insert(entry.recorded_at);
        if entry.recorded_at > *slot {
            *slot = entry.recorded_at;
        }
    }

    let mut hourly: BTreeMap<u32, u64> = SHIFT_HOURS.map(|h| (h, 0)).collect();
    let mut cycle_total = Duration::zero();
    let mut cycle_count = 0i32;
    let mut first_pass = 0u64;

    for (serial, hit) in &last_hit {
        *hourly.entry(hit.hour()).or_insert(0) += 1;

        let Some(history) = histories.get(*serial) else {
            continue;
        };
        if let Some(first) = history.iter().map(|h| h.recorded_at).min() {
            let cycle = *hit - first;
            if cycle > Duration::zero() && cycle < Duration::hours(CYCLE_PLAUSIBILITY_HOURS) {
                cycle_total = cycle_total + cycle;
                cycle_count += 1;
            }
        }
        let mut visited = HashSet::new();
        if history.iter().all(|h| visited.insert(h.operation_id.as_str())) {
            first_pass += 1;
        }
    }

    let produced = last_hit.len() as u64;
    let avg_cycle_minutes = if cycle_count > 0 {
        ((cycle_total.num_seconds() as f64 / f64::from(cycle_count)) / 60.0).round() as u64
    } else {
        0
    };
    let fpy = if produced == 0 {
        100.0
    } else {
        ((first_pass as f64 / produced as f64) * 1000.0).round() / 10.0
    };

    ProductionStats {
        target_operation_id: target,
        from,
        to,
        produced,
        hourly: hourly
            .into_iter()
            .map(|(hour, count)| HourlyBucket { hour, count })
            .collect(),
        avg_cycle_minutes,
        wip,
        fpy,
    }
}
