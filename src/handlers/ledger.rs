use crate::{
    entities::print_event,
    services::ledger::{ProductionStats, StatsQuery},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

/// Dashboard and print reconciliation routes
pub fn ledger_routes() -> Router<AppState> {
    Router::new()
        .route("/stats/production", get(production_stats))
        .route("/prints/:reference", get(print_history))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ProductionStatsParams {
    /// Range start, RFC 3339 (default: 24 hours before `to`)
    pub from: Option<DateTime<Utc>>,
    /// Range end, RFC 3339 (default: now)
    pub to: Option<DateTime<Utc>>,
    pub route_id: Option<Uuid>,
    /// Station whose output is counted; defaults to the route's last step
    pub operation_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/stats/production",
    params(ProductionStatsParams),
    responses(
        (status = 200, description = "Output, hourly throughput, cycle time, WIP and FPY", body = ApiResponse<ProductionStats>),
        (status = 400, description = "Invalid range", body = crate::errors::ErrorResponse)
    ),
    tag = "Traceability"
)]
pub async fn production_stats(
    State(state): State<AppState>,
    Query(params): Query<ProductionStatsParams>,
) -> ApiResult<ProductionStats> {
    let stats = state
        .services
        .ledger
        .production_stats(StatsQuery {
            from: params.from,
            to: params.to,
            route_id: params.route_id,
            operation_id: params.operation_id,
        })
        .await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// Print attempts for a serial number or an order number
#[utoipa::path(
    get,
    path = "/api/v1/prints/{reference}",
    params(("reference" = String, Path, description = "Serial or order number")),
    responses((status = 200, description = "Print ledger entries, oldest first", body = ApiResponse<Vec<print_event::Model>>)),
    tag = "Traceability"
)]
pub async fn print_history(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<Vec<print_event::Model>> {
    let prints = state.services.ledger.print_history(&reference).await?;
    Ok(Json(ApiResponse::success(prints)))
}
