use crate::{
    db::DbPool,
    entities::{operation, part_number, process_route, route_step, serial_unit, SerialGenType},
    errors::ServiceError,
    services::serial_mask::SerialMask,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Gap between consecutive step orders when a route is saved
pub const STEP_ORDER_SPACING: i32 = 10;

/// Route step joined with its operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RouteStepView {
    pub id: Uuid,
    pub operation_id: String,
    pub operation_name: String,
    pub step_order: i32,
    pub is_initial: bool,
    pub is_final: bool,
}

/// Route with its steps in traversal order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RouteView {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<RouteStepView>,
}

impl RouteView {
    pub fn contains_operation(&self, operation_id: &str) -> bool {
        self.steps.iter().any(|s| s.operation_id == operation_id)
    }

    /// Last step by order, the default measurement point for dashboards
    pub fn last_step(&self) -> Option<&RouteStepView> {
        self.steps.last()
    }
}

#[derive(Debug, Clone)]
pub struct CreateOperationInput {
    pub id: Option<String>,
    pub name: String,
    pub order_index: i32,
    pub is_initial: bool,
    pub is_final: bool,
}

#[derive(Debug, Clone)]
pub struct CreateRouteInput {
    pub name: String,
    pub description: Option<String>,
    /// Operations in traversal order
    pub operation_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePartInput {
    pub part_number: String,
    pub revision: Option<String>,
    pub description: Option<String>,
    pub product_code: String,
    pub serial_mask: Option<String>,
    pub serial_gen_type: SerialGenType,
    pub process_route_id: Option<Uuid>,
    pub std_qty: i32,
}

/// Station edit; `None` leaves a field as it is. The lock columns are never touched here.
#[derive(Debug, Clone, Default)]
pub struct UpdateOperationInput {
    pub name: Option<String>,
    pub order_index: Option<i32>,
    pub is_initial: Option<bool>,
    pub is_final: Option<bool>,
}

/// Route edit. New `operation_ids` replace every step and are renumbered.
#[derive(Debug, Clone, Default)]
pub struct UpdateRouteInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub operation_ids: Option<Vec<String>>,
}

/// Part edit. An empty `serial_mask` clears the mask.
#[derive(Debug, Clone, Default)]
pub struct UpdatePartInput {
    pub part_number: Option<String>,
    pub revision: Option<String>,
    pub description: Option<String>,
    pub product_code: Option<String>,
    pub serial_mask: Option<String>,
    pub serial_gen_type: Option<SerialGenType>,
    pub process_route_id: Option<Uuid>,
    pub std_qty: Option<i32>,
}

/// Read-mostly reference data: stations, routes and part numbers
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list_operations(&self) -> Result<Vec<operation::Model>, ServiceError> {
        operation::Entity::find()
            .order_by_asc(operation::Column::OrderIndex)
            .order_by_asc(operation::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn get_operation(&self, id: &str) -> Result<operation::Model, ServiceError> {
        find_operation(&*self.db, id).await
    }

    #[instrument(skip(self))]
    pub async fn list_parts(&self) -> Result<Vec<part_number::Model>, ServiceError> {
        part_number::Entity::find()
            .order_by_asc(part_number::Column::PartNumber)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn get_part(&self, id: Uuid) -> Result<part_number::Model, ServiceError> {
        find_part(&*self.db, id).await
    }

    #[instrument(skip(self))]
    pub async fn list_routes(&self) -> Result<Vec<RouteView>, ServiceError> {
        let db = &*self.db;
        let routes = process_route::Entity::find()
            .order_by_asc(process_route::Column::Name)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let steps = route_step::Entity::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let operations = operations_by_id(db).await?;

        let mut by_route: HashMap<Uuid, Vec<route_step::Model>> = HashMap::new();
        for step in steps {
            by_route.entry(step.process_route_id).or_default().push(step);
        }

        Ok(routes
            .into_iter()
            .map(|route| {
                let steps = by_route.remove(&route.id).unwrap_or_default();
                assemble_route(route, steps, &operations)
            })
            .collect())
    }

    pub async fn get_route(&self, id: Uuid) -> Result<RouteView, ServiceError> {
        load_route(&*self.db, id).await
    }

    /// Creates a station. The id doubles as the station code printed on the line.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_operation(
        &self,
        input: CreateOperationInput,
    ) -> Result<operation::Model, ServiceError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ServiceError::ValidationError(
                "operation name is required".to_string(),
            ));
        }
        let id = input
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("op_{}", Uuid::new_v4().simple()));

        if operation::Entity::find_by_id(id.clone())
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!("Operation {} already exists", id)));
        }

        let model = operation::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            order_index: Set(input.order_index),
            is_initial: Set(input.is_initial),
            is_final: Set(input.is_final),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(operation_id = %model.id, "operation created");
        Ok(model)
    }

    /// Saves a route; step orders are renumbered 10, 20, 30... in submitted order.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_route(&self, input: CreateRouteInput) -> Result<RouteView, ServiceError> {
        if input.name.trim().is_empty() {
            return Err(ServiceError::ValidationError("route name is required".to_string()));
        }
        if input.operation_ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "a route needs at least one step".to_string(),
            ));
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        check_route_operations(&txn, &input.operation_ids).await?;

        let route = process_route::ActiveModel {
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        insert_steps(&txn, route.id, &input.operation_ids).await?;

        let view = load_route(&txn, route.id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(route_id = %view.id, steps = view.steps.len(), "route created");
        Ok(view)
    }

    /// Renames a station or changes its flags. Fails when clearing `is_initial`
    /// would leave a route without any initial station.
    #[instrument(skip(self, input))]
    pub async fn update_operation(
        &self,
        id: &str,
        input: UpdateOperationInput,
    ) -> Result<operation::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let current = find_operation(&txn, id).await?;

        if current.is_initial && input.is_initial == Some(false) {
            let route_ids: Vec<Uuid> = route_step::Entity::find()
                .filter(route_step::Column::OperationId.eq(id))
                .all(&txn)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|step| step.process_route_id)
                .collect();
            for route_id in route_ids {
                let route = load_route(&txn, route_id).await?;
                let other_initial = route
                    .steps
                    .iter()
                    .any(|step| step.is_initial && step.operation_id != id);
                if !other_initial {
                    return Err(ServiceError::ValidationError(format!(
                        "route {} would have no initial operation",
                        route.name
                    )));
                }
            }
        }

        let mut active: operation::ActiveModel = current.into();
        if let Some(name) = input.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(ServiceError::ValidationError(
                    "operation name is required".to_string(),
                ));
            }
            active.name = Set(name.to_string());
        }
        if let Some(order_index) = input.order_index {
            active.order_index = Set(order_index);
        }
        if let Some(is_initial) = input.is_initial {
            active.is_initial = Set(is_initial);
        }
        if let Some(is_final) = input.is_final {
            active.is_final = Set(is_final);
        }
        let model = active.update(&txn).await.map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(operation_id = %model.id, "operation updated");
        Ok(model)
    }

    /// Edits a route. Replacing the steps renumbers them like a new route.
    #[instrument(skip(self, input))]
    pub async fn update_route(
        &self,
        id: Uuid,
        input: UpdateRouteInput,
    ) -> Result<RouteView, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let route = process_route::Entity::find_by_id(id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Route {} not found", id)))?;

        let mut active: process_route::ActiveModel = route.into();
        if let Some(name) = input.name {
            if name.trim().is_empty() {
                return Err(ServiceError::ValidationError("route name is required".to_string()));
            }
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description).filter(|d| !d.trim().is_empty()));
        }
        active.update(&txn).await.map_err(ServiceError::db_error)?;

        if let Some(operation_ids) = input.operation_ids {
            if operation_ids.is_empty() {
                return Err(ServiceError::ValidationError(
                    "a route needs at least one step".to_string(),
                ));
            }
            check_route_operations(&txn, &operation_ids).await?;
            route_step::Entity::delete_many()
                .filter(route_step::Column::ProcessRouteId.eq(id))
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            insert_steps(&txn, id, &operation_ids).await?;
        }

        let view = load_route(&txn, id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(route_id = %view.id, steps = view.steps.len(), "route updated");
        Ok(view)
    }

    #[instrument(skip(self, input), fields(product_code = %input.product_code))]
    pub async fn create_part(
        &self,
        input: CreatePartInput,
    ) -> Result<part_number::Model, ServiceError> {
        let product_code = input.product_code.trim().to_string();
        if product_code.is_empty() || input.part_number.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "part number and product code are required".to_string(),
            ));
        }
        if input.std_qty < 1 {
            return Err(ServiceError::ValidationError(
                "std_qty must be at least 1".to_string(),
            ));
        }

        let serial_mask = input
            .serial_mask
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        if let Some(mask) = &serial_mask {
            if input.serial_gen_type != SerialGenType::PcbSerial {
                return Err(ServiceError::ValidationError(format!(
                    "serial masks only apply to PCB_SERIAL parts, not {}",
                    input.serial_gen_type.as_str()
                )));
            }
            SerialMask::compile(mask)?;
        }

        let db = &*self.db;
        if let Some(route_id) = input.process_route_id {
            process_route::Entity::find_by_id(route_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::NotFound(format!("Route {} not found", route_id)))?;
        }

        let existing = part_number::Entity::find()
            .filter(part_number::Column::ProductCode.eq(product_code.as_str()))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        if existing > 0 {
            return Err(ServiceError::Conflict(format!(
                "Product code {} already exists",
                product_code
            )));
        }

        let part = part_number::ActiveModel {
            part_number: Set(input.part_number.trim().to_string()),
            revision: Set(input.revision),
            description: Set(input.description),
            product_code: Set(product_code),
            serial_mask: Set(serial_mask),
            serial_gen_type: Set(input.serial_gen_type),
            process_route_id: Set(input.process_route_id),
            std_qty: Set(input.std_qty),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(part_id = %part.id, gen_type = part.serial_gen_type.as_str(), "part created");
        Ok(part)
    }

    /// Edits a part. The generation type is fixed once units exist for the part,
    /// and a mask still applies only to PCB_SERIAL parts.
    #[instrument(skip(self, input))]
    pub async fn update_part(
        &self,
        id: Uuid,
        input: UpdatePartInput,
    ) -> Result<part_number::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let current = find_part(&txn, id).await?;

        let gen_type = input.serial_gen_type.unwrap_or(current.serial_gen_type);
        if gen_type != current.serial_gen_type {
            let units = serial_unit::Entity::find()
                .filter(serial_unit::Column::PartNumberId.eq(id))
                .count(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            if units > 0 {
                return Err(ServiceError::Conflict(format!(
                    "part {} already has {} units; its generation type cannot change",
                    current.part_number, units
                )));
            }
        }

        let serial_mask = match input.serial_mask {
            Some(mask) => Some(mask.trim().to_string()).filter(|m| !m.is_empty()),
            None => current.serial_mask.clone(),
        };
        if let Some(mask) = &serial_mask {
            if gen_type != SerialGenType::PcbSerial {
                return Err(ServiceError::ValidationError(format!(
                    "serial masks only apply to PCB_SERIAL parts, not {}",
                    gen_type.as_str()
                )));
            }
            SerialMask::compile(mask)?;
        }

        if let Some(std_qty) = input.std_qty {
            if std_qty < 1 {
                return Err(ServiceError::ValidationError(
                    "std_qty must be at least 1".to_string(),
                ));
            }
        }
        if let Some(route_id) = input.process_route_id {
            process_route::Entity::find_by_id(route_id)
                .one(&txn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::NotFound(format!("Route {} not found", route_id)))?;
        }

        let product_code = match input.product_code {
            Some(code) => {
                let code = code.trim().to_string();
                if code.is_empty() {
                    return Err(ServiceError::ValidationError(
                        "product code is required".to_string(),
                    ));
                }
                let taken = part_number::Entity::find()
                    .filter(part_number::Column::ProductCode.eq(code.as_str()))
                    .filter(part_number::Column::Id.ne(id))
                    .count(&txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                if taken > 0 {
                    return Err(ServiceError::Conflict(format!(
                        "Product code {} already exists",
                        code
                    )));
                }
                Some(code)
            }
            None => None,
        };

        let mut active: part_number::ActiveModel = current.into();
        if let Some(part_number) = input.part_number {
            if part_number.trim().is_empty() {
                return Err(ServiceError::ValidationError(
                    "part number is required".to_string(),
                ));
            }
            active.part_number = Set(part_number.trim().to_string());
        }
        if let Some(revision) = input.revision {
            active.revision = Set(Some(revision));
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(code) = product_code {
            active.product_code = Set(code);
        }
        if let Some(route_id) = input.process_route_id {
            active.process_route_id = Set(Some(route_id));
        }
        if let Some(std_qty) = input.std_qty {
            active.std_qty = Set(std_qty);
        }
        active.serial_mask = Set(serial_mask);
        active.serial_gen_type = Set(gen_type);
        let part = active.update(&txn).await.map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(part_id = %part.id, gen_type = part.serial_gen_type.as_str(), "part updated");
        Ok(part)
    }

    /// Seeds the stock entry and packing stations on an empty catalog.
    /// Returns whether anything was written.
    #[instrument(skip(self))]
    pub async fn seed_default_operations(&self) -> Result<bool, ServiceError> {
        let count = operation::Entity::find()
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if count > 0 {
            return Ok(false);
        }

        for (id, name, order_index, is_initial, is_final) in [
            ("op_10", "ESTACION INICIAL", 10, true, false),
            ("op_40", "EMPAQUE FINAL", 40, false, true),
        ] {
            self.create_operation(CreateOperationInput {
                id: Some(id.to_string()),
                name: name.to_string(),
                order_index,
                is_initial,
                is_final,
            })
            .await?;
        }

        info!("seeded default stations");
        Ok(true)
    }
}

pub(crate) async fn find_operation<C: ConnectionTrait>(
    db: &C,
    id: &str,
) -> Result<operation::Model, ServiceError> {
    operation::Entity::find_by_id(id.to_string())
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Operation {} not found", id)))
}

pub(crate) async fn find_part<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
) -> Result<part_number::Model, ServiceError> {
    part_number::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Part number {} not found", id)))
}

/// Every id must name an operation and at least one must be initial.
async fn check_route_operations<C: ConnectionTrait>(
    db: &C,
    operation_ids: &[String],
) -> Result<(), ServiceError> {
    let mut has_initial = false;
    for op_id in operation_ids {
        let op = find_operation(db, op_id).await?;
        has_initial |= op.is_initial;
    }
    if !has_initial {
        return Err(ServiceError::ValidationError(
            "a route must contain at least one initial operation".to_string(),
        ));
    }
    Ok(())
}

/// Step orders are 10, 20, 30... in the order given
async fn insert_steps<C: ConnectionTrait>(
    db: &C,
    route_id: Uuid,
    operation_ids: &[String],
) -> Result<(), ServiceError> {
    for (idx, op_id) in operation_ids.iter().enumerate() {
        route_step::ActiveModel {
            process_route_id: Set(route_id),
            operation_id: Set(op_id.clone()),
            step_order: Set((idx as i32 + 1) * STEP_ORDER_SPACING),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;
    }
    Ok(())
}

/// Resolves a part by the product code (SKU) printed on the order sheet
pub(crate) async fn find_part_by_product_code<C: ConnectionTrait>(
    db: &C,
    product_code: &str,
) -> Result<part_number::Model, ServiceError> {
    part_number::Entity::find()
        .filter(part_number::Column::ProductCode.eq(product_code.trim()))
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_code)))
}

/// Ids of operations flagged `is_final`; completion is decided by this flag.
pub(crate) async fn final_operation_ids<C: ConnectionTrait>(
    db: &C,
) -> Result<Vec<String>, ServiceError> {
    Ok(operation::Entity::find()
        .filter(operation::Column::IsFinal.eq(true))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|op| op.id)
        .collect())
}

/// Fails with `WrongContext` when the part is routed and the route lacks the station.
pub(crate) async fn ensure_station_on_route<C: ConnectionTrait>(
    db: &C,
    part: &part_number::Model,
    operation_id: &str,
) -> Result<(), ServiceError> {
    let Some(route_id) = part.process_route_id else {
        return Ok(());
    };
    let on_route = route_step::Entity::find()
        .filter(route_step::Column::ProcessRouteId.eq(route_id))
        .filter(route_step::Column::OperationId.eq(operation_id))
        .count(db)
        .await
        .map_err(ServiceError::db_error)?;
    if on_route == 0 {
        return Err(ServiceError::WrongContext(format!(
            "station {} is not on the route of part {}",
            operation_id, part.part_number
        )));
    }
    Ok(())
}

pub(crate) async fn load_route<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
) -> Result<RouteView, ServiceError> {
    let route = process_route::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Route {} not found", id)))?;
    let steps = route_step::Entity::find()
        .filter(route_step::Column::ProcessRouteId.eq(id))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;
    let operations = operations_by_id(db).await?;
    Ok(assemble_route(route, steps, &operations))
}

async fn operations_by_id<C: ConnectionTrait>(
    db: &C,
) -> Result<HashMap<String, operation::Model>, ServiceError> {
    Ok(operation::Entity::find()
        .all(db)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|op| (op.id.clone(), op))
        .collect())
}

/// Orders steps by `step_order`, then by step id so equal orders are stable.
fn assemble_route(
    route: process_route::Model,
    mut steps: Vec<route_step::Model>,
    operations: &HashMap<String, operation::Model>,
) -> RouteView {
    steps.sort_by(|a, b| a.step_order.cmp(&b.step_order).then(a.id.cmp(&b.id)));
    let steps = steps
        .into_iter()
        .map(|step| {
            let op = operations.get(&step.operation_id);
            RouteStepView {
                id: step.id,
                operation_name: op
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| step.operation_id.clone()),
                is_initial: op.map(|o| o.is_initial).unwrap_or(false),
                is_final: op.map(|o| o.is_final).unwrap_or(false),
                operation_id: step.operation_id,
                step_order: step.step_order,
            }
        })
        .collect();

    RouteView {
        id: route.id,
        name: route.name,
        description: route.description,
        steps,
    }
}
