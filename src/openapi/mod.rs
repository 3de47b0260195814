use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Battery MES API",
        version = "1.0.0",
        description = r#"
# Battery Assembly MES

Shop-floor backend for battery assembly lines.

## Features

- **Station locks**: one operator per station, supervisor release
- **Work orders**: open by SAP reference or product code, auto-close on completion
- **Scanning**: PCB serials, lot trays and accessory lots, dispatched by part type
- **Traceability**: per-unit history, print ledger and production statistics

## Operator identity

Mutating endpoints read the acting operator from request headers set by the
plant login front end:

```
X-Operator-Id: u-17
X-Operator-Name: Ana
X-Operator-Role: OPERATOR | SUPERVISOR | ADMIN
```

## Error Handling

Errors carry a stable `code` the station UI can branch on:

```json
{
  "error": "Locked",
  "code": "lock_denied",
  "message": "Station locked: op_10 is held by operator u-17",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "Stations", description = "Station lock lifecycle"),
        (name = "Catalog", description = "Parts, routes and stations"),
        (name = "Work Orders", description = "Production orders"),
        (name = "Scanning", description = "Unit, tray and lot scans"),
        (name = "Traceability", description = "History, prints and statistics")
    ),
    paths(
        // Stations
        crate::handlers::stations::list_operations,
        crate::handlers::stations::enter_station,
        crate::handlers::stations::exit_station,
        crate::handlers::stations::force_unlock_station,
        crate::handlers::stations::station_board,

        // Catalog
        crate::handlers::catalog::list_parts,
        crate::handlers::catalog::get_part,
        crate::handlers::catalog::create_part,
        crate::handlers::catalog::list_routes,
        crate::handlers::catalog::get_route,
        crate::handlers::catalog::create_route,
        crate::handlers::catalog::create_operation,
        crate::handlers::catalog::update_operation,
        crate::handlers::catalog::update_route,
        crate::handlers::catalog::update_part,

        // Work orders
        crate::handlers::work_orders::open_or_get_work_order,
        crate::handlers::work_orders::list_work_orders,
        crate::handlers::work_orders::get_work_order,
        crate::handlers::work_orders::update_work_order,
        crate::handlers::work_orders::close_order_if_complete,
        crate::handlers::work_orders::order_history,
        crate::handlers::work_orders::order_units,

        // Scanning
        crate::handlers::serials::scan,
        crate::handlers::serials::create_unit,
        crate::handlers::serials::advance_unit,
        crate::handlers::serials::unassign_unit,
        crate::handlers::serials::generate_batch,
        crate::handlers::serials::advance_batch,
        crate::handlers::serials::complete_lot,

        // Traceability
        crate::handlers::serials::unit_trace,
        crate::handlers::serials::tray_units,
        crate::handlers::ledger::production_stats,
        crate::handlers::ledger::print_history,
    ),
    components(
        schemas(
            crate::auth::OperatorRole,
            crate::entities::SerialGenType,
            crate::entities::LabelType,
            crate::entities::PrintStatus,
            crate::entities::WorkOrderStatus,
            crate::services::labels::PrintOutcome,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_scan_and_lock_paths() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Battery MES API"));
        assert!(json.contains("/api/v1/scans"));
        assert!(json.contains("/api/v1/operations/{operation_id}/enter"));
        assert!(json.contains("lock_denied"));
    }
}
