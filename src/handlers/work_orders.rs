use crate::{
    auth::Operator,
    entities::{serial_history, serial_unit, work_order, WorkOrderStatus},
    errors::ServiceError,
    handlers::common::{validate_input, LimitParams},
    services::work_orders::{CompletionCheck, OpenOrGetInput, UpdateWorkOrderInput, WorkOrderSummary},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Work order routes, keyed by internal or SAP order number
pub fn work_order_routes() -> Router<AppState> {
    Router::new()
        .route("/work-orders", get(list_work_orders).post(open_or_get_work_order))
        .route(
            "/work-orders/:reference",
            get(get_work_order).put(update_work_order),
        )
        .route("/work-orders/:reference/close", post(close_order_if_complete))
        .route("/work-orders/:reference/history", get(order_history))
        .route("/work-orders/:reference/units", get(order_units))
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct OpenOrGetWorkOrderRequest {
    /// Internal or SAP order number to resume; stored as SAP number on a new order
    #[validate(length(min = 1, max = 64))]
    pub reference: Option<String>,
    /// Product code (SKU) for a new order
    #[validate(length(min = 1, max = 64))]
    pub product_code: Option<String>,
    #[validate(range(min = 1))]
    pub quantity: Option<i32>,
    /// Route active at the requesting station
    pub route_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateWorkOrderRequest {
    #[validate(range(min = 1))]
    pub quantity: Option<i32>,
    /// ADMIN only; bypasses the completion rule
    pub status: Option<WorkOrderStatus>,
}

/// OpenOrGetWorkOrder: resume an order by reference or open a new one
#[utoipa::path(
    post,
    path = "/api/v1/work-orders",
    request_body = OpenOrGetWorkOrderRequest,
    responses(
        (status = 200, description = "Order with production figures", body = ApiResponse<WorkOrderSummary>),
        (status = 404, description = "Unknown order or product", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order belongs to another route", body = crate::errors::ErrorResponse)
    ),
    tag = "Work Orders"
)]
pub async fn open_or_get_work_order(
    State(state): State<AppState>,
    _operator: Operator,
    Json(payload): Json<OpenOrGetWorkOrderRequest>,
) -> ApiResult<WorkOrderSummary> {
    validate_input(&payload)?;
    let summary = state
        .services
        .work_orders
        .open_or_get(OpenOrGetInput {
            reference: payload.reference,
            product_code: payload.product_code,
            quantity: payload.quantity,
            route_id: payload.route_id,
        })
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// Orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/work-orders",
    params(LimitParams),
    responses((status = 200, description = "Work orders", body = ApiResponse<Vec<work_order::Model>>)),
    tag = "Work Orders"
)]
pub async fn list_work_orders(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<work_order::Model>> {
    let orders = state.services.work_orders.list(params.resolved()).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/work-orders/{reference}",
    params(("reference" = String, Path, description = "Internal or SAP order number")),
    responses(
        (status = 200, description = "Order with production figures", body = ApiResponse<WorkOrderSummary>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Work Orders"
)]
pub async fn get_work_order(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<WorkOrderSummary> {
    let summary = state.services.work_orders.summary(&reference).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// Supervisor quantity edit or admin-forced status change
#[utoipa::path(
    put,
    path = "/api/v1/work-orders/{reference}",
    params(("reference" = String, Path, description = "Internal or SAP order number")),
    request_body = UpdateWorkOrderRequest,
    responses(
        (status = 200, description = "Updated order", body = ApiResponse<work_order::Model>),
        (status = 403, description = "Role does not allow this change", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse)
    ),
    tag = "Work Orders"
)]
pub async fn update_work_order(
    State(state): State<AppState>,
    operator: Operator,
    Path(reference): Path<String>,
    Json(payload): Json<UpdateWorkOrderRequest>,
) -> Result<Json<ApiResponse<work_order::Model>>, ServiceError> {
    validate_input(&payload)?;
    let orders = &state.services.work_orders;
    let order = orders.get_by_reference(&reference).await?;
    let updated = orders
        .update_order(
            order.id,
            UpdateWorkOrderInput {
                quantity: payload.quantity,
                status: payload.status,
            },
            &operator,
        )
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

/// CloseOrderIfComplete: run the completion rule now
#[utoipa::path(
    post,
    path = "/api/v1/work-orders/{reference}/close",
    params(("reference" = String, Path, description = "Internal or SAP order number")),
    responses(
        (status = 200, description = "Completion figures; `lot_finished` when this call closed it", body = ApiResponse<CompletionCheck>),
        (status = 409, description = "Order already closed", body = crate::errors::ErrorResponse)
    ),
    tag = "Work Orders"
)]
pub async fn close_order_if_complete(
    State(state): State<AppState>,
    _operator: Operator,
    Path(reference): Path<String>,
) -> ApiResult<CompletionCheck> {
    let check = state.services.work_orders.close_if_complete(&reference).await?;
    Ok(Json(ApiResponse::success(check)))
}

/// Every history entry recorded under the order, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/work-orders/{reference}/history",
    params(("reference" = String, Path, description = "Internal or SAP order number")),
    responses((status = 200, description = "Order history", body = ApiResponse<Vec<serial_history::Model>>)),
    tag = "Work Orders"
)]
pub async fn order_history(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<Vec<serial_history::Model>> {
    let history = state.services.ledger.history_for_order(&reference).await?;
    Ok(Json(ApiResponse::success(history)))
}

#[utoipa::path(
    get,
    path = "/api/v1/work-orders/{reference}/units",
    params(("reference" = String, Path, description = "Internal or SAP order number")),
    responses((status = 200, description = "Units currently assigned to the order", body = ApiResponse<Vec<serial_unit::Model>>)),
    tag = "Work Orders"
)]
pub async fn order_units(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<Vec<serial_unit::Model>> {
    let units = state.services.ledger.units_for_order(&reference).await?;
    Ok(Json(ApiResponse::success(units)))
}
