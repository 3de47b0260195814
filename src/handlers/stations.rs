use crate::{
    auth::Operator,
    entities::operation,
    errors::ServiceError,
    services::{ledger::StationStatus, station_lock::LockOutcome},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;

/// Station routes: lock lifecycle and the supervisor board
pub fn station_routes() -> Router<AppState> {
    Router::new()
        .route("/operations", get(list_operations))
        .route("/operations/:operation_id/enter", post(enter_station))
        .route("/operations/:operation_id/exit", post(exit_station))
        .route("/operations/:operation_id/force-unlock", post(force_unlock_station))
        .route("/stations/board", get(station_board))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExitResponse {
    pub operation_id: String,
    /// False when the caller did not hold the station
    pub released: bool,
}

/// List stations with their current lock holder
#[utoipa::path(
    get,
    path = "/api/v1/operations",
    responses(
        (status = 200, description = "Stations in line order", body = ApiResponse<Vec<operation::Model>>)
    ),
    tag = "Stations"
)]
pub async fn list_operations(State(state): State<AppState>) -> ApiResult<Vec<operation::Model>> {
    let ops = state.services.catalog.list_operations().await?;
    Ok(Json(ApiResponse::success(ops)))
}

/// EnterStation: take the station lock
#[utoipa::path(
    post,
    path = "/api/v1/operations/{operation_id}/enter",
    params(("operation_id" = String, Path, description = "Station id")),
    responses(
        (status = 200, description = "Lock result; `acquired` is false when another operator holds it", body = ApiResponse<LockOutcome>),
        (status = 404, description = "Unknown station", body = crate::errors::ErrorResponse)
    ),
    tag = "Stations"
)]
pub async fn enter_station(
    State(state): State<AppState>,
    operator: Operator,
    Path(operation_id): Path<String>,
) -> ApiResult<LockOutcome> {
    let outcome = state
        .services
        .station_locks
        .enter(&operation_id, &operator)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// ExitStation: release the lock if held by the caller
#[utoipa::path(
    post,
    path = "/api/v1/operations/{operation_id}/exit",
    params(("operation_id" = String, Path, description = "Station id")),
    responses(
        (status = 200, description = "Release result", body = ApiResponse<ExitResponse>)
    ),
    tag = "Stations"
)]
pub async fn exit_station(
    State(state): State<AppState>,
    operator: Operator,
    Path(operation_id): Path<String>,
) -> ApiResult<ExitResponse> {
    let released = state
        .services
        .station_locks
        .exit(&operation_id, &operator)
        .await?;
    Ok(Json(ApiResponse::success(ExitResponse {
        operation_id,
        released,
    })))
}

/// ForceUnlockStation: supervisor release of an orphaned lock
#[utoipa::path(
    post,
    path = "/api/v1/operations/{operation_id}/force-unlock",
    params(("operation_id" = String, Path, description = "Station id")),
    responses(
        (status = 200, description = "Station is free", body = ApiResponse<operation::Model>),
        (status = 403, description = "Caller is not a supervisor", body = crate::errors::ErrorResponse)
    ),
    tag = "Stations"
)]
pub async fn force_unlock_station(
    State(state): State<AppState>,
    operator: Operator,
    Path(operation_id): Path<String>,
) -> Result<Json<ApiResponse<operation::Model>>, ServiceError> {
    let op = state
        .services
        .station_locks
        .force_unlock(&operation_id, &operator)
        .await?;
    Ok(Json(ApiResponse::success(op)))
}

/// Station board for the supervisor screen
#[utoipa::path(
    get,
    path = "/api/v1/stations/board",
    responses(
        (status = 200, description = "Lock holders and queue sizes", body = ApiResponse<Vec<StationStatus>>)
    ),
    tag = "Stations"
)]
pub async fn station_board(State(state): State<AppState>) -> ApiResult<Vec<StationStatus>> {
    let board = state.services.ledger.station_board().await?;
    Ok(Json(ApiResponse::success(board)))
}
