use crate::{
    auth::Operator,
    entities::serial_unit,
    handlers::common::validate_input,
    services::{
        ledger::UnitTrace,
        lifecycle::{ScanOutcome, ScanRequest},
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Scan routes for units, trays and accessory lots
pub fn serial_routes() -> Router<AppState> {
    Router::new()
        .route("/scans", post(scan))
        .route("/serials", post(create_unit))
        .route("/serials/:serial_number", get(unit_trace))
        .route("/serials/:serial_number/advance", post(advance_unit))
        .route("/serials/:serial_number/unassign", post(unassign_unit))
        .route("/trays", post(generate_batch))
        .route("/trays/:tray_id", get(tray_units))
        .route("/trays/:tray_id/advance", post(advance_batch))
        .route("/lots/complete", post(complete_lot))
}

/// Order and station a scan is submitted against
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct StationContext {
    #[validate(length(min = 1, max = 64))]
    pub order_reference: String,
    #[validate(length(min = 1, max = 64))]
    pub operation_id: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ScanRequestBody {
    #[validate(length(min = 1, max = 64))]
    pub order_reference: String,
    #[validate(length(min = 1, max = 64))]
    pub operation_id: String,
    /// Serial number or tray id, depending on the part
    #[validate(length(min = 1, max = 128))]
    pub code: Option<String>,
    #[validate(range(min = 1))]
    pub quantity: Option<u32>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUnitRequest {
    #[validate(length(min = 1, max = 128))]
    pub serial_number: String,
    #[validate(length(min = 1, max = 64))]
    pub order_reference: String,
    #[validate(length(min = 1, max = 64))]
    pub operation_id: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GenerateBatchRequest {
    #[validate(length(min = 1, max = 128))]
    pub tray_id: String,
    #[validate(length(min = 1, max = 64))]
    pub order_reference: String,
    #[validate(length(min = 1, max = 64))]
    pub operation_id: String,
    /// Defaults to the part's standard pack quantity
    #[validate(range(min = 1))]
    pub quantity: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TrayQuery {
    /// Only units of this order
    pub order_number: Option<String>,
}

/// Scan dispatched on the part's serial generation type
#[utoipa::path(
    post,
    path = "/api/v1/scans",
    request_body = ScanRequestBody,
    responses(
        (status = 200, description = "Units created or advanced", body = ApiResponse<ScanOutcome>),
        (status = 423, description = "Station held by another operator", body = crate::errors::ErrorResponse)
    ),
    tag = "Scanning"
)]
pub async fn scan(
    State(state): State<AppState>,
    operator: Operator,
    Json(payload): Json<ScanRequestBody>,
) -> ApiResult<ScanOutcome> {
    validate_input(&payload)?;
    let outcome = state
        .services
        .lifecycle
        .create_or_advance(
            ScanRequest {
                order_reference: payload.order_reference,
                operation_id: payload.operation_id,
                code: payload.code,
                quantity: payload.quantity,
            },
            &operator,
        )
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// CreateUnit: register a PCB serial at an initial station
#[utoipa::path(
    post,
    path = "/api/v1/serials",
    request_body = CreateUnitRequest,
    responses(
        (status = 200, description = "Unit created, nameplate printed", body = ApiResponse<ScanOutcome>),
        (status = 400, description = "Serial does not match the part mask", body = crate::errors::ErrorResponse),
        (status = 409, description = "Serial already exists", body = crate::errors::ErrorResponse),
        (status = 423, description = "Station held by another operator", body = crate::errors::ErrorResponse)
    ),
    tag = "Scanning"
)]
pub async fn create_unit(
    State(state): State<AppState>,
    operator: Operator,
    Json(payload): Json<CreateUnitRequest>,
) -> ApiResult<ScanOutcome> {
    validate_input(&payload)?;
    let outcome = state
        .services
        .lifecycle
        .create_unit(
            &payload.serial_number,
            &payload.order_reference,
            &payload.operation_id,
            &operator,
        )
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// AdvanceUnit: move a PCB unit to this station
#[utoipa::path(
    post,
    path = "/api/v1/serials/{serial_number}/advance",
    params(("serial_number" = String, Path, description = "Unit serial number")),
    request_body = StationContext,
    responses(
        (status = 200, description = "Unit advanced", body = ApiResponse<ScanOutcome>),
        (status = 404, description = "Unknown serial", body = crate::errors::ErrorResponse),
        (status = 422, description = "Serial belongs to another order", body = crate::errors::ErrorResponse),
        (status = 423, description = "Station held by another operator", body = crate::errors::ErrorResponse)
    ),
    tag = "Scanning"
)]
pub async fn advance_unit(
    State(state): State<AppState>,
    operator: Operator,
    Path(serial_number): Path<String>,
    Json(payload): Json<StationContext>,
) -> ApiResult<ScanOutcome> {
    validate_input(&payload)?;
    let outcome = state
        .services
        .lifecycle
        .advance_unit(
            &serial_number,
            &payload.order_reference,
            &payload.operation_id,
            &operator,
        )
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// UnassignUnit: detach a unit from its order, keeping its history
#[utoipa::path(
    post,
    path = "/api/v1/serials/{serial_number}/unassign",
    params(("serial_number" = String, Path, description = "Unit serial number")),
    responses(
        (status = 200, description = "Unit without order", body = ApiResponse<serial_unit::Model>),
        (status = 404, description = "Unknown serial", body = crate::errors::ErrorResponse)
    ),
    tag = "Scanning"
)]
pub async fn unassign_unit(
    State(state): State<AppState>,
    operator: Operator,
    Path(serial_number): Path<String>,
) -> ApiResult<serial_unit::Model> {
    let unit = state
        .services
        .work_orders
        .unassign_serial(&serial_number, &operator)
        .await?;
    Ok(Json(ApiResponse::success(unit)))
}

/// Unit with its full history and print record
#[utoipa::path(
    get,
    path = "/api/v1/serials/{serial_number}",
    params(("serial_number" = String, Path, description = "Unit serial number")),
    responses(
        (status = 200, description = "Unit trace", body = ApiResponse<UnitTrace>),
        (status = 404, description = "Unknown serial", body = crate::errors::ErrorResponse)
    ),
    tag = "Traceability"
)]
pub async fn unit_trace(
    State(state): State<AppState>,
    Path(serial_number): Path<String>,
) -> ApiResult<UnitTrace> {
    let trace = state.services.ledger.unit_trace(&serial_number).await?;
    Ok(Json(ApiResponse::success(trace)))
}

/// GenerateBatch: synthesize the units of a new tray
#[utoipa::path(
    post,
    path = "/api/v1/trays",
    request_body = GenerateBatchRequest,
    responses(
        (status = 200, description = "Tray generated", body = ApiResponse<ScanOutcome>),
        (status = 409, description = "Tray already generated for this order", body = crate::errors::ErrorResponse),
        (status = 423, description = "Station held by another operator", body = crate::errors::ErrorResponse)
    ),
    tag = "Scanning"
)]
pub async fn generate_batch(
    State(state): State<AppState>,
    operator: Operator,
    Json(payload): Json<GenerateBatchRequest>,
) -> ApiResult<ScanOutcome> {
    validate_input(&payload)?;
    let outcome = state
        .services
        .lifecycle
        .generate_batch(
            &payload.tray_id,
            &payload.order_reference,
            &payload.operation_id,
            payload.quantity,
            &operator,
        )
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// AdvanceBatch: move every unit on the tray to this station
#[utoipa::path(
    post,
    path = "/api/v1/trays/{tray_id}/advance",
    params(("tray_id" = String, Path, description = "Tray id")),
    request_body = StationContext,
    responses(
        (status = 200, description = "Tray advanced", body = ApiResponse<ScanOutcome>),
        (status = 404, description = "Unknown tray", body = crate::errors::ErrorResponse),
        (status = 423, description = "Station held by another operator", body = crate::errors::ErrorResponse)
    ),
    tag = "Scanning"
)]
pub async fn advance_batch(
    State(state): State<AppState>,
    operator: Operator,
    Path(tray_id): Path<String>,
    Json(payload): Json<StationContext>,
) -> ApiResult<ScanOutcome> {
    validate_input(&payload)?;
    let outcome = state
        .services
        .lifecycle
        .advance_batch(
            &tray_id,
            &payload.order_reference,
            &payload.operation_id,
            &operator,
        )
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

#[utoipa::path(
    get,
    path = "/api/v1/trays/{tray_id}",
    params(("tray_id" = String, Path, description = "Tray id"), TrayQuery),
    responses((status = 200, description = "Units on the tray", body = ApiResponse<Vec<serial_unit::Model>>)),
    tag = "Traceability"
)]
pub async fn tray_units(
    State(state): State<AppState>,
    Path(tray_id): Path<String>,
    Query(query): Query<TrayQuery>,
) -> ApiResult<Vec<serial_unit::Model>> {
    let units = state
        .services
        .ledger
        .units_on_tray(&tray_id, query.order_number.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(units)))
}

/// Complete the remaining quantity of an accessories order
#[utoipa::path(
    post,
    path = "/api/v1/lots/complete",
    request_body = StationContext,
    responses(
        (status = 200, description = "Lot completed", body = ApiResponse<ScanOutcome>),
        (status = 422, description = "Not a final station", body = crate::errors::ErrorResponse)
    ),
    tag = "Scanning"
)]
pub async fn complete_lot(
    State(state): State<AppState>,
    operator: Operator,
    Json(payload): Json<StationContext>,
) -> ApiResult<ScanOutcome> {
    validate_input(&payload)?;
    let outcome = state
        .services
        .lifecycle
        .complete_lot(&payload.order_reference, &payload.operation_id, &operator)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
