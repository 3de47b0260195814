//! Seed data script - populates the database with a demo assembly line
//!
//! Run with: cargo run --bin seed-data
//!
//! This creates:
//! - 4 stations (initial, welding, test, final pack)
//! - 1 route through all of them
//! - 3 parts, one per serial generation type
//! - 1 open work order per part

use std::sync::Arc;

use anyhow::{Context, Result};
use battery_mes::{
    config, db,
    entities::SerialGenType,
    errors::ServiceError,
    events::EventSender,
    services::{
        catalog::{CatalogService, CreateOperationInput, CreatePartInput, CreateRouteInput},
        work_orders::WorkOrderService,
    },
};
use tokio::sync::mpsc;
use tracing::info;

const ROUTE_NAME: &str = "Linea baterias 48V";

const STATIONS: [(&str, &str, i32, bool, bool); 4] = [
    ("op_10", "ESTACION INICIAL", 10, true, false),
    ("op_20", "SOLDADURA", 20, false, false),
    ("op_30", "PRUEBA FUNCIONAL", 30, false, false),
    ("op_40", "EMPAQUE FINAL", 40, false, true),
];

#[tokio::main]
async fn main() -> Result<()> {
    config::init_tracing("info", false);

    info!("=== Battery MES Seed Data ===");

    let cfg = config::load_config().context("failed to load configuration")?;
    let pool = Arc::new(db::establish_connection_from_app_config(&cfg).await?);
    db::run_migrations(&pool).await?;

    let (event_tx, mut event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = EventSender::new(event_tx);
    // Nothing consumes events in a one-shot script
    tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

    let catalog = CatalogService::new(pool.clone());
    let work_orders = WorkOrderService::new(pool.clone(), event_sender);

    info!("Creating stations...");
    for (id, name, order_index, is_initial, is_final) in STATIONS {
        let created = catalog
            .create_operation(CreateOperationInput {
                id: Some(id.to_string()),
                name: name.to_string(),
                order_index,
                is_initial,
                is_final,
            })
            .await;
        match created {
            Ok(_) => info!("  {} {}", id, name),
            Err(ServiceError::Conflict(_)) => info!("  {} already present", id),
            Err(e) => return Err(e.into()),
        }
    }

    info!("Creating route...");
    let existing = catalog
        .list_routes()
        .await?
        .into_iter()
        .find(|r| r.name == ROUTE_NAME);
    let route = match existing {
        Some(route) => route,
        None => {
            catalog
                .create_route(CreateRouteInput {
                    name: ROUTE_NAME.to_string(),
                    description: Some("Demo pack line".to_string()),
                    operation_ids: STATIONS.iter().map(|s| s.0.to_string()).collect(),
                })
                .await?
        }
    };
    info!("  {} with {} steps", route.name, route.steps.len());

    let parts = [
        ("BMS-4800", "BAT-48V-PCB", Some("31########"), SerialGenType::PcbSerial, 2),
        ("CELL-18650", "BAT-CELL-LOT", None, SerialGenType::LotBased, 20),
        ("KIT-CABLES", "BAT-ACC-KIT", None, SerialGenType::Accessories, 50),
    ];

    info!("Creating parts and work orders...");
    for (part_number, product_code, mask, gen_type, std_qty) in parts {
        let part = match catalog
            .create_part(CreatePartInput {
                part_number: part_number.to_string(),
                revision: Some("A".to_string()),
                description: None,
                product_code: product_code.to_string(),
                serial_mask: mask.map(str::to_string),
                serial_gen_type: gen_type,
                process_route_id: Some(route.id),
                std_qty,
            })
            .await
        {
            Ok(part) => part,
            Err(ServiceError::Conflict(_)) => {
                info!("  {} already present", product_code);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let order = work_orders
            .generate_auto_order(None, &part.product_code, std_qty * 5)
            .await?;
        info!(
            "  {} ({}) -> order {} x{}",
            part.part_number,
            gen_type.as_str(),
            order.order_number,
            order.quantity
        );
    }

    info!("Seed complete");
    Ok(())
}
