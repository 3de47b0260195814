#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use battery_mes::{
    auth::{Operator, OperatorRole, OPERATOR_ID_HEADER, OPERATOR_ROLE_HEADER},
    config::AppConfig,
    db,
    entities::{part_number, work_order, SerialGenType},
    events::{self, EventSender},
    services::{
        catalog::{CreateOperationInput, CreatePartInput, CreateRouteInput, RouteView},
        labels::{LabelPrinter, PrintJob},
    },
    AppState,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const INITIAL: &str = "op_10";
pub const MIDDLE: &str = "op_20";
pub const FINAL: &str = "op_40";

/// Printer double that remembers every job and can be switched to fail or to stall.
#[derive(Default)]
pub struct RecordingPrinter {
    jobs: Mutex<Vec<PrintJob>>,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingPrinter {
    pub fn jobs(&self) -> Vec<PrintJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl LabelPrinter for RecordingPrinter {
    async fn print(&self, job: &PrintJob) -> Result<(), String> {
        self.jobs.lock().unwrap().push(job.clone());
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            Err("printer offline".to_string())
        } else {
            Ok(())
        }
    }
}

/// Application over a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub printer: Arc<RecordingPrinter>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps the in-memory database alive and shared
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let printer = Arc::new(RecordingPrinter::default());
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            EventSender::new(event_tx),
            printer.clone(),
        );
        let router = battery_mes::build_router(state.clone(), battery_mes::logging::discard_logger());

        Self {
            router,
            state,
            printer,
            _event_task: event_task,
        }
    }

    /// Stations op_10 (initial), op_20, op_40 (final) and a route through them.
    pub async fn seed_line(&self) -> RouteView {
        let catalog = &self.state.services.catalog;
        for (id, name, order_index, is_initial, is_final) in [
            (INITIAL, "ESTACION INICIAL", 10, true, false),
            (MIDDLE, "SOLDADURA", 20, false, false),
            (FINAL, "EMPAQUE FINAL", 40, false, true),
        ] {
            catalog
                .create_operation(CreateOperationInput {
                    id: Some(id.to_string()),
                    name: name.to_string(),
                    order_index,
                    is_initial,
                    is_final,
                })
                .await
                .expect("seed station");
        }
        catalog
            .create_route(CreateRouteInput {
                name: "Linea 1".to_string(),
                description: None,
                operation_ids: vec![INITIAL.into(), MIDDLE.into(), FINAL.into()],
            })
            .await
            .expect("seed route")
    }

    pub async fn seed_part(
        &self,
        route: &RouteView,
        product_code: &str,
        gen_type: SerialGenType,
        serial_mask: Option<&str>,
        std_qty: i32,
    ) -> part_number::Model {
        self.state
            .services
            .catalog
            .create_part(CreatePartInput {
                part_number: format!("PN-{}", product_code),
                revision: Some("A".to_string()),
                description: None,
                product_code: product_code.to_string(),
                serial_mask: serial_mask.map(str::to_string),
                serial_gen_type: gen_type,
                process_route_id: Some(route.id),
                std_qty,
            })
            .await
            .expect("seed part")
    }

    pub async fn open_order(&self, product_code: &str, quantity: i32) -> work_order::Model {
        self.state
            .services
            .work_orders
            .generate_auto_order(None, product_code, quantity)
            .await
            .expect("open work order")
    }

    /// Takes every station of the test line for `operator`.
    pub async fn enter_all(&self, operator: &Operator) {
        for op in [INITIAL, MIDDLE, FINAL] {
            let outcome = self
                .state
                .services
                .station_locks
                .enter(op, operator)
                .await
                .expect("enter station");
            assert!(outcome.acquired, "{} should be free", op);
        }
    }

    /// Sends a request as `operator` and returns status plus JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        operator: Option<&Operator>,
    ) -> (StatusCode, Value) {
        let response = self.raw_request(method, uri, body, operator).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn raw_request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        operator: Option<&Operator>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(op) = operator {
            builder = builder
                .header(OPERATOR_ID_HEADER, op.id.as_str())
                .header(OPERATOR_ROLE_HEADER, op.role.to_string());
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn operator(id: &str) -> Operator {
    Operator::new(id, Some(format!("Operator {}", id)), OperatorRole::Operator)
}

pub fn supervisor(id: &str) -> Operator {
    Operator::new(id, None, OperatorRole::Supervisor)
}

pub fn admin(id: &str) -> Operator {
    Operator::new(id, None, OperatorRole::Admin)
}
