use crate::{
    auth::Operator,
    entities::{operation, part_number, SerialGenType},
    handlers::common::{created_response, validate_input},
    services::catalog::{
        CreateOperationInput, CreatePartInput, CreateRouteInput, RouteView, UpdateOperationInput,
        UpdatePartInput, UpdateRouteInput,
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Catalog routes: parts, routes and station definitions
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/parts", get(list_parts).post(create_part))
        .route("/parts/:part_id", get(get_part).put(update_part))
        .route("/routes", get(list_routes).post(create_route))
        .route("/routes/:route_id", get(get_route).put(update_route))
        .route("/catalog/operations", axum::routing::post(create_operation))
        .route("/catalog/operations/:operation_id", axum::routing::put(update_operation))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOperationRequest {
    /// Station code; generated when omitted
    #[validate(length(min = 1, max = 64))]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[serde(default)]
    pub order_index: i32,
    #[serde(default)]
    pub is_initial: bool,
    #[serde(default)]
    pub is_final: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRouteRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub description: Option<String>,
    /// Station ids in the order units visit them
    #[validate(length(min = 1))]
    pub operation_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePartRequest {
    #[validate(length(min = 1, max = 64))]
    pub part_number: String,
    pub revision: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub product_code: String,
    /// `#` is any digit; PCB_SERIAL parts only
    pub serial_mask: Option<String>,
    pub serial_gen_type: SerialGenType,
    pub process_route_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub std_qty: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateOperationRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    pub order_index: Option<i32>,
    pub is_initial: Option<bool>,
    pub is_final: Option<bool>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateRouteRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    pub description: Option<String>,
    /// Replaces every step when present
    #[validate(length(min = 1))]
    pub operation_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdatePartRequest {
    #[validate(length(min = 1, max = 64))]
    pub part_number: Option<String>,
    pub revision: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub product_code: Option<String>,
    /// Empty string clears the mask
    pub serial_mask: Option<String>,
    pub serial_gen_type: Option<SerialGenType>,
    pub process_route_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub std_qty: Option<i32>,
}

#[utoipa::path(
    get,
    path = "/api/v1/parts",
    responses((status = 200, description = "Part numbers", body = ApiResponse<Vec<part_number::Model>>)),
    tag = "Catalog"
)]
pub async fn list_parts(State(state): State<AppState>) -> ApiResult<Vec<part_number::Model>> {
    Ok(Json(ApiResponse::success(
        state.services.catalog.list_parts().await?,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/parts/{part_id}",
    params(("part_id" = Uuid, Path, description = "Part number id")),
    responses(
        (status = 200, description = "Part number", body = ApiResponse<part_number::Model>),
        (status = 404, description = "Unknown part", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn get_part(
    State(state): State<AppState>,
    Path(part_id): Path<Uuid>,
) -> ApiResult<part_number::Model> {
    Ok(Json(ApiResponse::success(
        state.services.catalog.get_part(part_id).await?,
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/parts",
    request_body = CreatePartRequest,
    responses(
        (status = 201, description = "Part created", body = ApiResponse<part_number::Model>),
        (status = 400, description = "Invalid part definition", body = crate::errors::ErrorResponse),
        (status = 409, description = "Product code already used", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn create_part(
    State(state): State<AppState>,
    operator: Operator,
    Json(payload): Json<CreatePartRequest>,
) -> Result<Response, crate::errors::ServiceError> {
    operator.require_admin("editing the catalog")?;
    validate_input(&payload)?;
    let part = state
        .services
        .catalog
        .create_part(CreatePartInput {
            part_number: payload.part_number,
            revision: payload.revision,
            description: payload.description,
            product_code: payload.product_code,
            serial_mask: payload.serial_mask,
            serial_gen_type: payload.serial_gen_type,
            process_route_id: payload.process_route_id,
            std_qty: payload.std_qty,
        })
        .await?;
    Ok(created_response(part))
}

#[utoipa::path(
    get,
    path = "/api/v1/routes",
    responses((status = 200, description = "Routes with ordered steps", body = ApiResponse<Vec<RouteView>>)),
    tag = "Catalog"
)]
pub async fn list_routes(State(state): State<AppState>) -> ApiResult<Vec<RouteView>> {
    Ok(Json(ApiResponse::success(
        state.services.catalog.list_routes().await?,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/routes/{route_id}",
    params(("route_id" = Uuid, Path, description = "Route id")),
    responses(
        (status = 200, description = "Route with ordered steps", body = ApiResponse<RouteView>),
        (status = 404, description = "Unknown route", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn get_route(
    State(state): State<AppState>,
    Path(route_id): Path<Uuid>,
) -> ApiResult<RouteView> {
    Ok(Json(ApiResponse::success(
        state.services.catalog.get_route(route_id).await?,
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/routes",
    request_body = CreateRouteRequest,
    responses(
        (status = 201, description = "Route created", body = ApiResponse<RouteView>),
        (status = 400, description = "Route has no initial station", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn create_route(
    State(state): State<AppState>,
    operator: Operator,
    Json(payload): Json<CreateRouteRequest>,
) -> Result<Response, crate::errors::ServiceError> {
    operator.require_admin("editing the catalog")?;
    validate_input(&payload)?;
    let route = state
        .services
        .catalog
        .create_route(CreateRouteInput {
            name: payload.name,
            description: payload.description,
            operation_ids: payload.operation_ids,
        })
        .await?;
    Ok(created_response(route))
}

#[utoipa::path(
    post,
    path = "/api/v1/catalog/operations",
    request_body = CreateOperationRequest,
    responses(
        (status = 201, description = "Station created", body = ApiResponse<operation::Model>),
        (status = 409, description = "Station id already used", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn create_operation(
    State(state): State<AppState>,
    operator: Operator,
    Json(payload): Json<CreateOperationRequest>,
) -> Result<Response, crate::errors::ServiceError> {
    operator.require_admin("editing the catalog")?;
    validate_input(&payload)?;
    let op = state
        .services
        .catalog
        .create_operation(CreateOperationInput {
            id: payload.id,
            name: payload.name,
            order_index: payload.order_index,
            is_initial: payload.is_initial,
            is_final: payload.is_final,
        })
        .await?;
    Ok(created_response(op))
}

#[utoipa::path(
    put,
    path = "/api/v1/catalog/operations/{operation_id}",
    params(("operation_id" = String, Path, description = "Station code")),
    request_body = UpdateOperationRequest,
    responses(
        (status = 200, description = "Station updated", body = ApiResponse<operation::Model>),
        (status = 400, description = "Change would leave a route without an initial station", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not an admin", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown station", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn update_operation(
    State(state): State<AppState>,
    operator: Operator,
    Path(operation_id): Path<String>,
    Json(payload): Json<UpdateOperationRequest>,
) -> ApiResult<operation::Model> {
    operator.require_admin("editing the catalog")?;
    validate_input(&payload)?;
    let op = state
        .services
        .catalog
        .update_operation(
            &operation_id,
            UpdateOperationInput {
                name: payload.name,
                order_index: payload.order_index,
                is_initial: payload.is_initial,
                is_final: payload.is_final,
            },
        )
        .await?;
    Ok(Json(ApiResponse::success(op)))
}

#[utoipa::path(
    put,
    path = "/api/v1/routes/{route_id}",
    params(("route_id" = Uuid, Path, description = "Route id")),
    request_body = UpdateRouteRequest,
    responses(
        (status = 200, description = "Route with renumbered steps", body = ApiResponse<RouteView>),
        (status = 400, description = "Route has no initial station", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not an admin", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown route or station", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn update_route(
    State(state): State<AppState>,
    operator: Operator,
    Path(route_id): Path<Uuid>,
    Json(payload): Json<UpdateRouteRequest>,
) -> ApiResult<RouteView> {
    operator.require_admin("editing the catalog")?;
    validate_input(&payload)?;
    let route = state
        .services
        .catalog
        .update_route(
            route_id,
            UpdateRouteInput {
                name: payload.name,
                description: payload.description,
                operation_ids: payload.operation_ids,
            },
        )
        .await?;
    Ok(Json(ApiResponse::success(route)))
}

#[utoipa::path(
    put,
    path = "/api/v1/parts/{part_id}",
    params(("part_id" = Uuid, Path, description = "Part number id")),
    request_body = UpdatePartRequest,
    responses(
        (status = 200, description = "Part updated", body = ApiResponse<part_number::Model>),
        (status = 400, description = "Invalid part definition", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not an admin", body = crate::errors::ErrorResponse),
        (status = 409, description = "Product code taken or units already generated", body = crate::errors::ErrorResponse)
    ),
    tag = "Catalog"
)]
pub async fn update_part(
    State(state): State<AppState>,
    operator: Operator,
    Path(part_id): Path<Uuid>,
    Json(payload): Json<UpdatePartRequest>,
) -> ApiResult<part_number::Model> {
    operator.require_admin("editing the catalog")?;
    validate_input(&payload)?;
    let part = state
        .services
        .catalog
        .update_part(
            part_id,
            UpdatePartInput {
                part_number: payload.part_number,
                revision: payload.revision,
                description: payload.description,
                product_code: payload.product_code,
                serial_mask: payload.serial_mask,
                serial_gen_type: payload.serial_gen_type,
                process_route_id: payload.process_route_id,
                std_qty: payload.std_qty,
            },
        )
        .await?;
    Ok(Json(ApiResponse::success(part)))
}
