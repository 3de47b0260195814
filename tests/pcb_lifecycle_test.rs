mod common;

use assert_matches::assert_matches;
use battery_mes::{
    entities::{LabelType, SerialGenType, WorkOrderStatus},
    errors::ServiceError,
    services::{ledger::StatsQuery, lifecycle::ScanRequest},
};
use common::{operator, TestApp, FINAL, INITIAL, MIDDLE};
use std::time::Duration;

const MASK: &str = "31########";

fn serial(n: u32) -> String {
    format!("31{:08}", n)
}

#[tokio::test]
async fn pcb_units_flow_to_completion_and_close_the_order() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, Some(MASK), 2)
        .await;
    let order = app.open_order("BAT-48V", 4).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let lifecycle = &app.state.services.lifecycle;
    for n in 1..=4 {
        let created = lifecycle
            .create_unit(&serial(n), &order.order_number, INITIAL, &op)
            .await
            .expect("create unit");
        assert_eq!(created.units.len(), 1);
        assert_eq!(created.prints.len(), 1);
        assert_eq!(created.prints[0].label_type, LabelType::Nameplate);
        assert!(created.prints[0].success);
    }

    let mut carton_after = Vec::new();
    let mut last = None;
    for n in 1..=4 {
        lifecycle
            .advance_unit(&serial(n), &order.order_number, MIDDLE, &op)
            .await
            .expect("advance to welding");
        let done = lifecycle
            .advance_unit(&serial(n), &order.order_number, FINAL, &op)
            .await
            .expect("advance to final");
        assert_eq!(done.completed, 1);
        if done
            .prints
            .iter()
            .any(|p| p.label_type == LabelType::Carton1)
        {
            carton_after.push(n);
        }
        last = Some(done);
    }

    // Pack size 2: a container fills after the 2nd and 4th unit
    assert_eq!(carton_after, vec![2, 4]);

    let last = last.unwrap();
    assert!(last.lot_finished);
    let completion = last.completion.unwrap();
    assert_eq!(completion.produced, 4);
    assert_eq!(completion.quantity, 4);

    let summary = app
        .state
        .services
        .work_orders
        .summary(&order.order_number)
        .await
        .unwrap();
    assert_eq!(summary.order.status, WorkOrderStatus::Closed);
    assert!(summary.order.closed_at.is_some());
    assert_eq!(summary.remaining, 0);

    let trace = app
        .state
        .services
        .ledger
        .unit_trace(&serial(3))
        .await
        .unwrap();
    assert!(trace.unit.is_complete);
    assert_eq!(trace.unit.current_operation_id, FINAL);
    let visited: Vec<_> = trace.history.iter().map(|h| h.operation_id.as_str()).collect();
    assert_eq!(visited, vec![INITIAL, MIDDLE, FINAL]);
    assert!(trace.history.iter().all(|h| h.operator_id == "u-1"));

    // Closed orders take no more scans
    let err = lifecycle
        .create_unit(&serial(5), &order.order_number, INITIAL, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let stats = app
        .state
        .services
        .ledger
        .production_stats(StatsQuery {
            route_id: Some(route.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(stats.target_operation_id.as_deref(), Some(FINAL));
    assert_eq!(stats.produced, 4);
    assert_eq!(stats.wip, 0);
    assert_eq!(stats.fpy, 100.0);
    assert_eq!(stats.hourly.iter().map(|b| b.count).sum::<u64>(), 4);
}

#[tokio::test]
async fn serial_must_match_part_mask() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, Some(MASK), 2)
        .await;
    let order = app.open_order("BAT-48V", 4).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    for bad in ["3100001", "41000000001", "31ABCDEFGH", "3100000000123"] {
        let err = app
            .state
            .services
            .lifecycle
            .create_unit(bad, &order.order_number, INITIAL, &op)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_), "{} should be rejected", bad);
    }

    let units = app
        .state
        .services
        .ledger
        .units_for_order(&order.order_number)
        .await
        .unwrap();
    assert!(units.is_empty());
    assert!(app.printer.jobs().is_empty());
}

#[tokio::test]
async fn duplicate_serial_is_a_conflict() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, Some(MASK), 2)
        .await;
    let order = app.open_order("BAT-48V", 4).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let lifecycle = &app.state.services.lifecycle;
    lifecycle
        .create_unit(&serial(1), &order.order_number, INITIAL, &op)
        .await
        .unwrap();
    let err = lifecycle
        .create_unit(&serial(1), &order.order_number, INITIAL, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let trace = app.state.services.ledger.unit_trace(&serial(1)).await.unwrap();
    assert_eq!(trace.history.len(), 1);
}

#[tokio::test]
async fn unit_from_another_order_is_wrong_lot() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, Some(MASK), 2)
        .await;
    let first = app.open_order("BAT-48V", 4).await;
    let second = app.open_order("BAT-48V", 4).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let lifecycle = &app.state.services.lifecycle;
    lifecycle
        .create_unit(&serial(1), &first.order_number, INITIAL, &op)
        .await
        .unwrap();

    let err = lifecycle
        .advance_unit(&serial(1), &second.order_number, MIDDLE, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::WrongLot(_));

    let trace = app.state.services.ledger.unit_trace(&serial(1)).await.unwrap();
    assert_eq!(trace.unit.current_operation_id, INITIAL);
    assert_eq!(trace.history.len(), 1);
}

#[tokio::test]
async fn new_units_only_start_at_an_initial_station() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, None, 2)
        .await;
    let order = app.open_order("BAT-48V", 4).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let err = app
        .state
        .services
        .lifecycle
        .create_unit("S-100", &order.order_number, MIDDLE, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::WrongContext(_));

    let err = app
        .state
        .services
        .lifecycle
        .advance_unit("S-404", &order.order_number, MIDDLE, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn completed_unit_cannot_be_advanced_again() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, None, 10)
        .await;
    let order = app.open_order("BAT-48V", 10).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let lifecycle = &app.state.services.lifecycle;
    lifecycle
        .create_unit("S-1", &order.order_number, INITIAL, &op)
        .await
        .unwrap();
    lifecycle
        .advance_unit("S-1", &order.order_number, FINAL, &op)
        .await
        .unwrap();
    let err = lifecycle
        .advance_unit("S-1", &order.order_number, MIDDLE, &op)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn scan_dispatch_creates_then_advances() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, Some(MASK), 2)
        .await;
    let order = app.open_order("BAT-48V", 4).await;
    let op = operator("u-1");
    app.enter_all(&op).await;

    let scan = |op_id: &str| ScanRequest {
        order_reference: order.order_number.clone(),
        operation_id: op_id.to_string(),
        code: Some(format!(" {} ", serial(7))),
        quantity: None,
    };

    let lifecycle = &app.state.services.lifecycle;
    let created = lifecycle.create_or_advance(scan(INITIAL), &op).await.unwrap();
    assert_eq!(created.units[0].serial_number, serial(7));
    assert_eq!(created.units[0].current_operation_id, INITIAL);

    let moved = lifecycle.create_or_advance(scan(MIDDLE), &op).await.unwrap();
    assert_eq!(moved.units[0].current_operation_id, MIDDLE);

    let missing_code = lifecycle
        .create_or_advance(
            ScanRequest {
                code: None,
                ..scan(MIDDLE)
            },
            &op,
        )
        .await
        .unwrap_err();
    assert_matches!(missing_code, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn failed_print_is_recorded_but_scan_succeeds() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, Some(MASK), 2)
        .await;
    let order = app.open_order("BAT-48V", 4).await;
    let op = operator("u-1");
    app.enter_all(&op).await;
    app.printer.set_failing(true);

    let outcome = app
        .state
        .services
        .lifecycle
        .create_unit(&serial(1), &order.order_number, INITIAL, &op)
        .await
        .expect("scan survives printer failure");
    assert_eq!(outcome.units.len(), 1);
    assert!(!outcome.prints[0].success);

    let prints = app
        .state
        .services
        .ledger
        .print_history(&serial(1))
        .await
        .unwrap();
    assert_eq!(prints.len(), 1);
    assert_eq!(
        prints[0].status,
        battery_mes::entities::PrintStatus::Failed
    );
    assert_eq!(prints[0].operator_id.as_deref(), Some("u-1"));
}

#[tokio::test]
async fn abandoned_scan_still_records_its_label() {
    let app = TestApp::new().await;
    let route = app.seed_line().await;
    app.seed_part(&route, "BAT-48V", SerialGenType::PcbSerial, Some(MASK), 2)
        .await;
    let order = app.open_order("BAT-48V", 4).await;
    let op = operator("u-1");
    app.enter_all(&op).await;
    app.printer.set_delay(Duration::from_millis(100));

    let lifecycle = &app.state.services.lifecycle;
    {
        let scan_serial = serial(7);
        let scan = lifecycle.create_unit(&scan_serial, &order.order_number, INITIAL, &op);
        tokio::pin!(scan);
        // Give up on the scan once it has committed and reached the printer
        loop {
            tokio::select! {
                _ = &mut scan => panic!("printer should still be busy"),
                _ = tokio::time::sleep(Duration::from_millis(5)) => {
                    if !app.printer.jobs().is_empty() {
                        break;
                    }
                }
            }
        }
    }

    let ledger = &app.state.services.ledger;
    let mut recorded = Vec::new();
    for _ in 0..100 {
        recorded = ledger.print_history(&serial(7)).await.unwrap();
        if !recorded.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].label_type, LabelType::Nameplate);

    let trace = ledger.unit_trace(&serial(7)).await.unwrap();
    assert_eq!(trace.unit.current_operation_id, INITIAL);
    assert_eq!(trace.history.len(), 1);
}
