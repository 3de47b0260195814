mod common;

use assert_matches::assert_matches;
use battery_mes::{
    entities::{LabelType, SerialGenType, WorkOrderStatus},
    errors::ServiceError,
    services::{
        catalog::{CreateOperationInput, CreateRouteInput},
        lifecycle::ScanRequest,
    },
};
use common::{operator, TestApp, FINAL, INITIAL, MIDDLE};
use sea_orm::ConnectionTrait;
use std::collections::HashSet;

fn tray_scan(order: &str, op: &str, tray: &str) -> ScanRequest {
    ScanRequest {
        order_reference: order.to_string(),
        operation_id: op.to_string(),
        code: Some(tray.to_string()),
        quantity: None,
    }
}

#[tokio::test]
async fn tray_scan_generates_and_moves_the_whole_tray() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "CELL-LOT", SerialGenType::LotBased, None, 5)
        .await;
    let order = app.open_order("CELL-LOT", 10).await;
    let op = operator("u-1");
    app.enter_all(&op).await;
    let lifecycle = &app.state.services.lifecycle;

    let generated = lifecycle
        .create_or_advance(tray_scan(&order.order_number, INITIAL, "TRAY01"), &op)
        .await
        .expect("generate tray");
    assert_eq!(generated.tray_id.as_deref(), Some("TRAY01"));
    assert_eq!(generated.units.len(), 5);
    assert!(generated.prints.is_empty());
    let serials: HashSet<_> = generated.units.iter().map(|u| u.serial_number.clone()).collect();
    assert_eq!(serials.len(), 5);
    assert!(generated
        .units
        .iter()
        .all(|u| u.tray_id.as_deref() == Some("TRAY01") && u.current_operation_id == INITIAL));

    let moved = lifecycle
        .create_or_advance(tray_scan(&order.order_number, MIDDLE, "TRAY01"), &op)
        .await
        .expect("advance tray");
    assert_eq!(moved.units.len(), 5);
    assert!(moved.units.iter().all(|u| u.current_operation_id == MIDDLE));
    assert_eq!(moved.completed, 0);

    let packed = lifecycle
        .create_or_advance(tray_scan(&order.order_number, FINAL, "TRAY01"), &op)
        .await
        .expect("pack tray");
    assert_eq!(packed.completed, 5);
    let nameplates = packed
        .prints
        .iter()
        .filter(|p| p.label_type == LabelType::Nameplate)
        .count();
    assert_eq!(nameplates, 5);
    let box_labels: Vec<_> = packed
        .prints
        .iter()
        .filter(|p| p.label_type == LabelType::BoxLabel)
        .collect();
    assert_eq!(box_labels.len(), 1);
    assert_eq!(box_labels[0].reference, order.order_number);

    let box_job = app
        .printer
        .jobs()
        .into_iter()
        .find(|j| j.label_type == Some(LabelType::BoxLabel))
        .expect("box label job sent");
    assert!(box_job.exclude.contains(&LabelType::Nameplate));
    assert!(box_job.exclude.contains(&LabelType::Carton1));

    let completion = packed.completion.expect("final station runs completion");
    assert_eq!(completion.produced, 5);
    assert!(!packed.lot_finished);

    // Every unit carries one entry per station
    let history = app
        .state
        .services
        .ledger
        .history_for_order(&order.order_number)
        .await
        .unwrap();
    assert_eq!(history.len(), 15);
    for station in [INITIAL, MIDDLE, FINAL] {
        assert_eq!(history.iter().filter(|h| h.operation_id == station).count(), 5);
    }

    // Second tray fills the order
    lifecycle
        .create_or_advance(tray_scan(&order.order_number, INITIAL, "TRAY02"), &op)
        .await
        .unwrap();
    let finished = lifecycle
        .create_or_advance(tray_scan(&order.order_number, FINAL, "TRAY02"), &op)
        .await
        .unwrap();
    assert!(finished.lot_finished);
    let order = app
        .state
        .services
        .work_orders
        .get(order.id)
        .await
        .unwrap();
    assert_eq!(order.status, WorkOrderStatus::Closed);
}

#[tokio::test]
async fn tray_size_is_capped_by_order_quantity() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "CELL-LOT", SerialGenType::LotBased, None, 50)
        .await;
    let order = app.open_order("CELL-LOT", 12).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let generated = app
        .state
        .services
        .lifecycle
        .generate_batch("TRAY-BIG", &order.order_number, INITIAL, None, &op)
        .await
        .unwrap();
    assert_eq!(generated.units.len(), 12);

    let explicit = app
        .state
        .services
        .lifecycle
        .generate_batch("TRAY-SMALL", &order.order_number, INITIAL, Some(3), &op)
        .await
        .unwrap();
    assert_eq!(explicit.units.len(), 3);
}

#[tokio::test]
async fn same_tray_cannot_be_generated_twice_for_an_order() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "CELL-LOT", SerialGenType::LotBased, None, 5)
        .await;
    let order = app.open_order("CELL-LOT", 20).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let lifecycle = &app.state.services.lifecycle;
    lifecycle
        .generate_batch("TRAY01", &order.order_number, INITIAL, None, &op)
        .await
        .unwrap();
    let err = lifecycle
        .generate_batch("TRAY01", &order.order_number, INITIAL, None, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let units = app
        .state
        .services
        .ledger
        .units_on_tray("TRAY01", Some(&order.order_number))
        .await
        .unwrap();
    assert_eq!(units.len(), 5);
}

#[tokio::test]
async fn tray_of_another_order_is_wrong_lot_and_unknown_tray_not_found() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "CELL-LOT", SerialGenType::LotBased, None, 5)
        .await;
    let first = app.open_order("CELL-LOT", 20).await;
    let second = app.open_order("CELL-LOT", 20).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let lifecycle = &app.state.services.lifecycle;
    lifecycle
        .generate_batch("TRAY01", &first.order_number, INITIAL, None, &op)
        .await
        .unwrap();

    let err = lifecycle
        .advance_batch("TRAY01", &second.order_number, MIDDLE, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::WrongLot(_));

    let err = lifecycle
        .advance_batch("TRAY99", &first.order_number, MIDDLE, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn rejected_tray_advance_moves_nothing() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "CELL-LOT", SerialGenType::LotBased, None, 5)
        .await;
    let order = app.open_order("CELL-LOT", 20).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let lifecycle = &app.state.services.lifecycle;
    lifecycle
        .generate_batch("TRAY01", &order.order_number, INITIAL, None, &op)
        .await
        .unwrap();

    // Release the welding station; the advance must fail as a whole
    app.state
        .services
        .station_locks
        .exit(MIDDLE, &op)
        .await
        .unwrap();
    let err = lifecycle
        .advance_batch("TRAY01", &order.order_number, MIDDLE, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::LockDenied(_));

    let units = app
        .state
        .services
        .ledger
        .units_on_tray("TRAY01", None)
        .await
        .unwrap();
    assert!(units.iter().all(|u| u.current_operation_id == INITIAL));
    let history = app
        .state
        .services
        .ledger
        .history_for_order(&order.order_number)
        .await
        .unwrap();
    assert_eq!(history.len(), 5);
}

#[tokio::test]
async fn pcb_scan_path_refuses_lot_parts() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "CELL-LOT", SerialGenType::LotBased, None, 5)
        .await;
    let order = app.open_order("CELL-LOT", 20).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let err = app
        .state
        .services
        .lifecycle
        .create_unit("S-1", &order.order_number, INITIAL, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn accessories_lot_completes_only_at_final_station() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "ACC-KIT", SerialGenType::Accessories, None, 10)
        .await;
    let order = app.open_order("ACC-KIT", 30).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let scan = |op_id: &str| ScanRequest {
        order_reference: order.order_number.clone(),
        operation_id: op_id.to_string(),
        code: None,
        quantity: None,
    };
    let lifecycle = &app.state.services.lifecycle;

    let err = lifecycle.create_or_advance(scan(INITIAL), &op).await.unwrap_err();
    assert_matches!(err, ServiceError::WrongContext(_));

    let done = lifecycle.create_or_advance(scan(FINAL), &op).await.unwrap();
    assert_eq!(done.units.len(), 30);
    assert_eq!(done.completed, 30);
    assert!(done.lot_finished);
    assert_eq!(done.prints.len(), 1);
    assert_eq!(done.prints[0].label_type, LabelType::BoxLabel);

    let summary = app
        .state
        .services
        .work_orders
        .summary(&order.order_number)
        .await
        .unwrap();
    assert_eq!(summary.produced, 30);
    assert_eq!(summary.order.status, WorkOrderStatus::Closed);

    // A closed lot takes no further completion
    let err = lifecycle.create_or_advance(scan(FINAL), &op).await.unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn single_station_route_packs_the_tray_on_generation() {
    let app = TestApp::new().await;
    let catalog = &app.state.services.catalog;
    catalog
        .create_operation(CreateOperationInput {
            id: Some("op_one".to_string()),
            name: "CELDA UNICA".to_string(),
            order_index: 10,
            is_initial: true,
            is_final: true,
        })
        .await
        .unwrap();
    let route = catalog
        .create_route(CreateRouteInput {
            name: "Celda".to_string(),
            description: None,
            operation_ids: vec!["op_one".into()],
        })
        .await
        .unwrap();
    app.seed_part(&route, "CELL-ONE", SerialGenType::LotBased, None, 5)
        .await;
    let order = app.open_order("CELL-ONE", 5).await;
    let op = operator("u-1");
    app.state
        .services
        .station_locks
        .enter("op_one", &op)
        .await
        .unwrap();

    let packed = app
        .state
        .services
        .lifecycle
        .create_or_advance(tray_scan(&order.order_number, "op_one", "TRAY-ONE"), &op)
        .await
        .expect("generate and pack");
    assert_eq!(packed.completed, 5);
    assert!(packed.lot_finished);

    let nameplates = packed
        .prints
        .iter()
        .filter(|p| p.label_type == LabelType::Nameplate)
        .count();
    assert_eq!(nameplates, 5);
    let box_labels = packed
        .prints
        .iter()
        .filter(|p| p.label_type == LabelType::BoxLabel)
        .count();
    assert_eq!(box_labels, 1);
    assert_eq!(app.printer.jobs().len(), 6);

    let order = app
        .state
        .services
        .work_orders
        .get(order.id)
        .await
        .unwrap();
    assert_eq!(order.status, WorkOrderStatus::Closed);
}

#[tokio::test]
async fn storage_failure_mid_generation_leaves_no_units() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "CELL-LOT", SerialGenType::LotBased, None, 5)
        .await;
    let order = app.open_order("CELL-LOT", 20).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    // Units land, then the history write fails
    app.state
        .db
        .execute_unprepared(
            "CREATE TRIGGER fail_tray_history BEFORE INSERT ON serial_history \
             WHEN (SELECT count(*) FROM serial_units WHERE tray_id = 'TRAY-X') > 0 \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .await
        .unwrap();

    let err = app
        .state
        .services
        .lifecycle
        .generate_batch("TRAY-X", &order.order_number, INITIAL, None, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::DatabaseError(_));

    let ledger = &app.state.services.ledger;
    assert!(ledger.units_on_tray("TRAY-X", None).await.unwrap().is_empty());
    assert!(ledger
        .history_for_order(&order.order_number)
        .await
        .unwrap()
        .is_empty());
    assert!(app.printer.jobs().is_empty());
}

#[tokio::test]
async fn storage_failure_mid_advance_moves_nothing() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "CELL-LOT", SerialGenType::LotBased, None, 5)
        .await;
    let order = app.open_order("CELL-LOT", 20).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let lifecycle = &app.state.services.lifecycle;
    lifecycle
        .generate_batch("TRAY01", &order.order_number, INITIAL, None, &op)
        .await
        .unwrap();

    // Third unit of the tray fails to move
    app.state
        .db
        .execute_unprepared(
            "CREATE TRIGGER fail_third_move BEFORE UPDATE ON serial_units \
             WHEN (SELECT count(*) FROM serial_units WHERE current_operation_id = 'op_20') >= 2 \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .await
        .unwrap();

    let err = lifecycle
        .advance_batch("TRAY01", &order.order_number, MIDDLE, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::DatabaseError(_));

    let ledger = &app.state.services.ledger;
    let units = ledger.units_on_tray("TRAY01", None).await.unwrap();
    assert_eq!(units.len(), 5);
    assert!(units
        .iter()
        .all(|u| u.current_operation_id == INITIAL && u.version == 1));
    assert_eq!(
        ledger
            .history_for_order(&order.order_number)
            .await
            .unwrap()
            .len(),
        5
    );
}
