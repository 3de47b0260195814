mod common;

use assert_matches::assert_matches;
use battery_mes::{
    entities::{SerialGenType, WorkOrderStatus},
    errors::ServiceError,
    services::{
        catalog::{CreateOperationInput, CreateRouteInput},
        work_orders::{OpenOrGetInput, UpdateWorkOrderInput},
    },
};
use common::{admin, operator, supervisor, TestApp, FINAL, INITIAL, MIDDLE};
use uuid::Uuid;

#[tokio::test]
async fn order_resumes_by_sap_reference() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, None, 10)
        .await;
    let orders = &app.state.services.work_orders;

    let opened = orders
        .open_or_get(OpenOrGetInput {
            reference: Some("4500012345".to_string()),
            product_code: Some("BAT-48V".to_string()),
            quantity: Some(20),
            route_id: Some(route.id),
        })
        .await
        .unwrap();
    assert!(opened.created);
    assert_eq!(opened.order.sap_order_number.as_deref(), Some("4500012345"));
    assert_eq!(opened.order.status, WorkOrderStatus::Open);
    assert!(opened.order.order_number.starts_with("WO-"));

    // Next shift only knows the SAP number
    let resumed = orders
        .open_or_get(OpenOrGetInput {
            reference: Some(" 4500012345 ".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!resumed.created);
    assert_eq!(resumed.order.id, opened.order.id);

    let by_internal = orders
        .get_by_reference(&opened.order.order_number)
        .await
        .unwrap();
    assert_eq!(by_internal.id, opened.order.id);
}

#[tokio::test]
async fn opening_needs_a_known_product_and_matching_route() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, None, 10)
        .await;
    let orders = &app.state.services.work_orders;

    let err = orders
        .generate_auto_order(None, "NOPE", 5)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let err = orders
        .generate_auto_order(None, "BAT-48V", 0)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = orders
        .open_or_get(OpenOrGetInput {
            reference: Some("MISSING".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let err = orders
        .open_or_get(OpenOrGetInput {
            product_code: Some("BAT-48V".to_string()),
            quantity: Some(5),
            route_id: Some(Uuid::new_v4()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::WrongContext(_));
}

#[tokio::test]
async fn station_outside_the_part_route_is_wrong_context() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, None, 10)
        .await;
    let order = app.open_order("BAT-48V", 5).await;

    let catalog = &app.state.services.catalog;
    catalog
        .create_operation(CreateOperationInput {
            id: Some("op_90".to_string()),
            name: "REPARACION".to_string(),
            order_index: 90,
            is_initial: true,
            is_final: false,
        })
        .await
        .unwrap();

    let ana = operator("ana");
    app.state
        .services
        .station_locks
        .enter("op_90", &ana)
        .await
        .unwrap();
    let err = app
        .state
        .services
        .lifecycle
        .create_unit("S-1", &order.order_number, "op_90", &ana)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::WrongContext(_));
}

#[tokio::test]
async fn quantity_and_status_edits_follow_roles() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, None, 10)
        .await;
    let order = app.open_order("BAT-48V", 5).await;
    let orders = &app.state.services.work_orders;

    let qty = |quantity| UpdateWorkOrderInput {
        quantity: Some(quantity),
        status: None,
    };

    let err = orders
        .update_order(order.id, qty(8), &operator("ana"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let updated = orders
        .update_order(order.id, qty(8), &supervisor("jefe"))
        .await
        .unwrap();
    assert_eq!(updated.quantity, 8);
    assert_eq!(updated.version, order.version + 1);

    let close = UpdateWorkOrderInput {
        quantity: None,
        status: Some(WorkOrderStatus::Closed),
    };
    let err = orders
        .update_order(order.id, close.clone(), &supervisor("jefe"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let closed = orders
        .update_order(order.id, close, &admin("boss"))
        .await
        .unwrap();
    assert_eq!(closed.status, WorkOrderStatus::Closed);
    assert!(closed.closed_at.is_some());

    // The normal completion path refuses an already closed order
    let err = orders
        .close_if_complete(&order.order_number)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn completion_check_leaves_short_orders_open() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, None, 10)
        .await;
    let order = app.open_order("BAT-48V", 2).await;
    let ana = operator("ana");
    app.enter_all(&ana).await;

    let lifecycle = &app.state.services.lifecycle;
    lifecycle
        .create_unit("S-1", &order.order_number, INITIAL, &ana)
        .await
        .unwrap();
    let outcome = lifecycle
        .advance_unit("S-1", &order.order_number, FINAL, &ana)
        .await
        .unwrap();
    assert!(!outcome.lot_finished);

    let check = app
        .state
        .services
        .work_orders
        .close_if_complete(&order.order_number)
        .await
        .unwrap();
    assert_eq!(check.produced, 1);
    assert_eq!(check.quantity, 2);
    assert!(!check.lot_finished);
}

#[tokio::test]
async fn routes_list_steps_in_order_and_need_an_initial_station() {
    let app = TestApp::new().await;
    app.seed_line().await;
    let catalog = &app.state.services.catalog;

    let reversed = catalog
        .create_route(CreateRouteInput {
            name: "Retrabajo".to_string(),
            description: None,
            operation_ids: vec![FINAL.into(), INITIAL.into(), MIDDLE.into()],
        })
        .await
        .unwrap();
    let steps: Vec<_> = reversed
        .steps
        .iter()
        .map(|s| (s.operation_id.as_str(), s.step_order))
        .collect();
    assert_eq!(steps, vec![(FINAL, 10), (INITIAL, 20), (MIDDLE, 30)]);
    assert_eq!(reversed.steps[0].operation_name, "EMPAQUE FINAL");
    assert!(reversed.steps[0].is_final);

    let err = catalog
        .create_route(CreateRouteInput {
            name: "Sin inicio".to_string(),
            description: None,
            operation_ids: vec![MIDDLE.into(), FINAL.into()],
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = catalog
        .create_route(CreateRouteInput {
            name: "Fantasma".to_string(),
            description: None,
            operation_ids: vec![INITIAL.into(), "op_404".into()],
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let routes = catalog.list_routes().await.unwrap();
    assert_eq!(routes.len(), 2);
}
