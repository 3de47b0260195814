use crate::{
    db::DbPool,
    entities::{part_number, print_event, LabelType, PrintStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, Set};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// What the printing collaborator needs to resolve and print a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    /// Serial number, or the order number for box labels
    pub reference: String,
    pub order_number: Option<String>,
    pub product_code: String,
    pub part_number: String,
    /// Explicit label selector; `None` lets the printer pick the part's default
    pub label_type: Option<LabelType>,
    pub exclude: Vec<LabelType>,
}

impl PrintJob {
    pub fn for_part(
        reference: impl Into<String>,
        order_number: Option<String>,
        part: &part_number::Model,
        label_type: LabelType,
    ) -> Self {
        Self {
            reference: reference.into(),
            order_number,
            product_code: part.product_code.clone(),
            part_number: part.part_number.clone(),
            label_type: Some(label_type),
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, exclude: &[LabelType]) -> Self {
        self.exclude = exclude.to_vec();
        self
    }

    fn recorded_type(&self) -> LabelType {
        self.label_type.unwrap_or(LabelType::Nameplate)
    }
}

/// Printing collaborator. Format resolution and the device live behind it;
/// callers only learn success or failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelPrinter: Send + Sync {
    async fn print(&self, job: &PrintJob) -> Result<(), String>;
}

/// Printer used when no device integration is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingLabelPrinter;

#[async_trait]
impl LabelPrinter for LoggingLabelPrinter {
    async fn print(&self, job: &PrintJob) -> Result<(), String> {
        info!(
            reference = %job.reference,
            product_code = %job.product_code,
            label_type = ?job.label_type,
            exclude = ?job.exclude,
            "label sent to printer"
        );
        Ok(())
    }
}

/// Print attempt as reported back to scanning clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PrintOutcome {
    pub reference: String,
    pub label_type: LabelType,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Sends print jobs and appends every attempt to the print ledger.
///
/// Printing happens after production state is committed. A failed print is
/// recorded as FAILED and reported, never propagated as an error.
#[derive(Clone)]
pub struct LabelService {
    db: Arc<DbPool>,
    printer: Arc<dyn LabelPrinter>,
    event_sender: EventSender,
}

impl LabelService {
    pub fn new(db: Arc<DbPool>, printer: Arc<dyn LabelPrinter>, event_sender: EventSender) -> Self {
        Self {
            db,
            printer,
            event_sender,
        }
    }

    #[instrument(skip(self, job), fields(reference = %job.reference))]
    pub async fn print(&self, job: PrintJob, operator_id: Option<&str>) -> PrintOutcome {
        let label_type = job.recorded_type();
        let (status, message) = match self.printer.print(&job).await {
            Ok(()) => {
                counter!("battery_mes.labels.printed", 1, "label" => label_type.as_str());
                self.event_sender.send_or_log(Event::LabelPrinted {
                    reference: job.reference.clone(),
                    label_type,
                });
                (PrintStatus::Success, None)
            }
            Err(reason) => {
                counter!("battery_mes.labels.failed", 1, "label" => label_type.as_str());
                warn!(label_type = label_type.as_str(), %reason, "label print failed");
                self.event_sender.send_or_log(Event::LabelPrintFailed {
                    reference: job.reference.clone(),
                    label_type,
                    reason: reason.clone(),
                });
                (PrintStatus::Failed, Some(reason))
            }
        };

        if let Err(e) = self
            .record(&job, label_type, status, message.clone(), operator_id)
            .await
        {
            warn!(error = %e, "could not append print ledger entry");
        }

        PrintOutcome {
            reference: job.reference,
            label_type,
            success: status == PrintStatus::Success,
            message,
        }
    }

    /// Prints jobs in order, continuing past failures
    pub async fn print_all(&self, jobs: Vec<PrintJob>, operator_id: Option<&str>) -> Vec<PrintOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(self.print(job, operator_id).await);
        }
        outcomes
    }

    async fn record(
        &self,
        job: &PrintJob,
        label_type: LabelType,
        status: PrintStatus,
        message: Option<String>,
        operator_id: Option<&str>,
    ) -> Result<print_event::Model, ServiceError> {
        print_event::ActiveModel {
            reference: Set(job.reference.clone()),
            order_number: Set(job.order_number.clone()),
            label_type: Set(label_type),
            status: Set(status),
            message: Set(message),
            operator_id: Set(operator_id.map(str::to_string)),
            printed_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SerialGenType;
    use sea_orm::{EntityTrait, QueryOrder};
    use uuid::Uuid;

    fn part() -> part_number::Model {
        part_number::Model {
            id: Uuid::new_v4(),
            part_number: "BAT-48V".into(),
            revision: None,
            description: None,
            product_code: "SKU-48".into(),
            serial_mask: None,
            serial_gen_type: SerialGenType::LotBased,
            process_route_id: None,
            std_qty: 5,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn box_label_job_carries_exclusions() {
        let job = PrintJob::for_part("WO-1", Some("WO-1".into()), &part(), LabelType::BoxLabel)
            .excluding(&[LabelType::Carton1, LabelType::Carton2, LabelType::Nameplate]);
        assert_eq!(job.recorded_type(), LabelType::BoxLabel);
        assert_eq!(job.exclude.len(), 3);
        assert_eq!(job.product_code, "SKU-48");
    }

    async fn ledger_db() -> Arc<DbPool> {
        let pool = crate::db::establish_connection_with_config(&crate::db::DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .expect("in-memory database");
        crate::db::run_migrations(&pool).await.expect("migrations");
        Arc::new(pool)
    }

    fn service(db: Arc<DbPool>, printer: MockLabelPrinter) -> LabelService {
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        LabelService::new(db, Arc::new(printer), EventSender::new(tx))
    }

    #[tokio::test]
    async fn printer_failure_is_reported_and_recorded() {
        let mut printer = MockLabelPrinter::new();
        printer
            .expect_print()
            .withf(|job| job.reference == "3112345678")
            .times(1)
            .returning(|_| Err("offline".to_string()));
        let db = ledger_db().await;
        let labels = service(db.clone(), printer);

        let job = PrintJob::for_part("3112345678", Some("WO-1".into()), &part(), LabelType::Nameplate);
        let outcome = labels.print(job, Some("u-1")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("offline"));
        assert_eq!(outcome.label_type, LabelType::Nameplate);

        let rows = print_event::Entity::find().all(&*db).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PrintStatus::Failed);
        assert_eq!(rows[0].message.as_deref(), Some("offline"));
        assert_eq!(rows[0].operator_id.as_deref(), Some("u-1"));
        assert_eq!(rows[0].order_number.as_deref(), Some("WO-1"));
    }

    #[tokio::test]
    async fn print_all_keeps_going_after_a_failure() {
        let mut printer = MockLabelPrinter::new();
        let mut seq = mockall::Sequence::new();
        printer
            .expect_print()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err("jammed".to_string()));
        printer
            .expect_print()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let db = ledger_db().await;
        let labels = service(db.clone(), printer);

        let jobs = vec![
            PrintJob::for_part("SN-1", None, &part(), LabelType::Nameplate),
            PrintJob::for_part("WO-1", None, &part(), LabelType::BoxLabel),
        ];
        let outcomes = labels.print_all(jobs, None).await;
        assert_eq!(
            outcomes.iter().map(|o| o.success).collect::<Vec<_>>(),
            vec![false, true]
        );

        let statuses: Vec<_> = print_event::Entity::find()
            .order_by_asc(print_event::Column::Id)
            .all(&*db)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.reference, r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("SN-1".to_string(), PrintStatus::Failed),
                ("WO-1".to_string(), PrintStatus::Success),
            ]
        );
    }
}
