use crate::{
    auth::Operator,
    db::DbPool,
    entities::operation,
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::find_operation,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    UpdateMany,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// Result of an `enter` call. `acquired == false` means someone else holds
/// the station and the caller must not submit scans there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LockOutcome {
    pub acquired: bool,
    pub operation_id: String,
    pub holder_id: Option<String>,
    pub holder_name: Option<String>,
}

impl LockOutcome {
    fn from_model(op: &operation::Model, operator_id: &str) -> Self {
        Self {
            acquired: op.is_held_by(operator_id),
            operation_id: op.id.clone(),
            holder_id: op.active_operator_id.clone(),
            holder_name: op.active_operator_name.clone(),
        }
    }
}

/// Per-station mutual exclusion, FREE or LOCKED(operator).
///
/// Locks live on the operation row and are taken with a conditional update:
/// the row only matches when it is free or already held by the caller. There
/// is no lease; a crashed client keeps the station until a supervisor calls
/// [`StationLockService::force_unlock`].
#[derive(Clone)]
pub struct StationLockService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl StationLockService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, operator), fields(operator_id = %operator.id))]
    pub async fn enter(
        &self,
        operation_id: &str,
        operator: &Operator,
    ) -> Result<LockOutcome, ServiceError> {
        let db = &*self.db;
        let current = find_operation(db, operation_id).await?;
        if current.is_held_by(&operator.id) {
            // re-entry by the holder keeps the original lock time
            return Ok(LockOutcome::from_model(&current, &operator.id));
        }

        let result = operation::Entity::update_many()
            .col_expr(
                operation::Column::ActiveOperatorId,
                Expr::value(Some(operator.id.clone())),
            )
            .col_expr(
                operation::Column::ActiveOperatorName,
                Expr::value(operator.name.clone()),
            )
            .col_expr(operation::Column::LockedAt, Expr::value(Some(Utc::now())))
            .col_expr(operation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(operation::Column::Id.eq(operation_id))
            .filter(
                Condition::any()
                    .add(operation::Column::ActiveOperatorId.is_null())
                    .add(operation::Column::ActiveOperatorId.eq(operator.id.as_str())),
            )
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        let after = find_operation(db, operation_id).await?;
        let outcome = LockOutcome::from_model(&after, &operator.id);

        if result.rows_affected > 0 && outcome.acquired {
            counter!("battery_mes.station.lock_acquired", 1, "operation" => operation_id.to_string());
            info!(operation_id, "station locked");
            self.event_sender.send_or_log(Event::StationEntered {
                operation_id: operation_id.to_string(),
                operator_id: operator.id.clone(),
            });
        } else {
            counter!("battery_mes.station.lock_denied", 1, "operation" => operation_id.to_string());
            warn!(
                operation_id,
                holder = ?outcome.holder_id,
                "station held by another operator"
            );
        }

        Ok(outcome)
    }

    /// Releases the station if `operator` holds it; otherwise a no-op.
    /// Returns whether a lock was released.
    #[instrument(skip(self, operator), fields(operator_id = %operator.id))]
    pub async fn exit(&self, operation_id: &str, operator: &Operator) -> Result<bool, ServiceError> {
        let db = &*self.db;
        find_operation(db, operation_id).await?;

        let result = release(operation_id)
            .filter(operation::Column::ActiveOperatorId.eq(operator.id.as_str()))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        let released = result.rows_affected > 0;
        if released {
            info!(operation_id, "station released");
            self.event_sender.send_or_log(Event::StationExited {
                operation_id: operation_id.to_string(),
                operator_id: operator.id.clone(),
            });
        }
        Ok(released)
    }

    /// Frees the station whoever holds it. Supervisor or admin only.
    #[instrument(skip(self, operator), fields(operator_id = %operator.id))]
    pub async fn force_unlock(
        &self,
        operation_id: &str,
        operator: &Operator,
    ) -> Result<operation::Model, ServiceError> {
        operator.require_supervisor("force unlock")?;

        let db = &*self.db;
        let before = find_operation(db, operation_id).await?;

        release(operation_id)
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        counter!("battery_mes.station.force_unlocked", 1);
        warn!(
            operation_id,
            previous_holder = ?before.active_operator_id,
            "station force unlocked"
        );
        self.event_sender.send_or_log(Event::StationForceUnlocked {
            operation_id: operation_id.to_string(),
            previous_holder: before.active_operator_id,
            by: operator.id.clone(),
        });

        find_operation(db, operation_id).await
    }

    /// Fails with `LockDenied` unless `operator_id` currently holds the station.
    pub async fn ensure_holder(
        &self,
        operation_id: &str,
        operator_id: &str,
    ) -> Result<operation::Model, ServiceError> {
        ensure_holder(&*self.db, operation_id, operator_id).await
    }
}

fn release(operation_id: &str) -> UpdateMany<operation::Entity> {
    operation::Entity::update_many()
        .col_expr(
            operation::Column::ActiveOperatorId,
            Expr::value(Option::<String>::None),
        )
        .col_expr(
            operation::Column::ActiveOperatorName,
            Expr::value(Option::<String>::None),
        )
        .col_expr(
            operation::Column::LockedAt,
            Expr::value(Option::<chrono::DateTime<Utc>>::None),
        )
        .col_expr(operation::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(operation::Column::Id.eq(operation_id))
}

pub(crate) async fn ensure_holder<C: ConnectionTrait>(
    db: &C,
    operation_id: &str,
    operator_id: &str,
) -> Result<operation::Model, ServiceError> {
    let op = find_operation(db, operation_id).await?;
    if op.is_held_by(operator_id) {
        return Ok(op);
    }

    counter!("battery_mes.scan.rejected", 1, "reason" => "lock_denied");
    let message = match &op.active_operator_id {
        Some(holder) => format!("{} is held by operator {}", op.id, holder),
        None => format!("{} has not been entered by operator {}", op.id, operator_id),
    };
    Err(ServiceError::LockDenied(message))
}
