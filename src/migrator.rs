use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_tables::Migration),
            Box::new(m20240601_000002_create_work_orders_table::Migration),
            Box::new(m20240601_000003_create_traceability_tables::Migration),
        ]
    }
}

mod m20240601_000001_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Operations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Operations::Id)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Operations::Name).string().not_null())
                        .col(
                            ColumnDef::new(Operations::OrderIndex)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Operations::IsInitial)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Operations::IsFinal)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Operations::ActiveOperatorId).string().null())
                        .col(ColumnDef::new(Operations::ActiveOperatorName).string().null())
                        .col(
                            ColumnDef::new(Operations::LockedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Operations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Operations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProcessRoutes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProcessRoutes::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProcessRoutes::Name).string().not_null())
                        .col(ColumnDef::new(ProcessRoutes::Description).string().null())
                        .col(
                            ColumnDef::new(ProcessRoutes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProcessRoutes::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RouteSteps::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RouteSteps::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RouteSteps::ProcessRouteId).uuid().not_null())
                        .col(ColumnDef::new(RouteSteps::OperationId).string().not_null())
                        .col(ColumnDef::new(RouteSteps::StepOrder).integer().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_route_steps_route_id")
                                .from(RouteSteps::Table, RouteSteps::ProcessRouteId)
                                .to(ProcessRoutes::Table, ProcessRoutes::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_route_steps_operation_id")
                                .from(RouteSteps::Table, RouteSteps::OperationId)
                                .to(Operations::Table, Operations::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_route_steps_route_order")
                        .table(RouteSteps::Table)
                        .col(RouteSteps::ProcessRouteId)
                        .col(RouteSteps::StepOrder)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PartNumbers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PartNumbers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PartNumbers::PartNumber).string().not_null())
                        .col(ColumnDef::new(PartNumbers::Revision).string().null())
                        .col(ColumnDef::new(PartNumbers::Description).string().null())
                        .col(
                            ColumnDef::new(PartNumbers::ProductCode)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PartNumbers::SerialMask).string().null())
                        .col(
                            ColumnDef::new(PartNumbers::SerialGenType)
                                .string()
                                .not_null()
                                .default("PCB_SERIAL"),
                        )
                        .col(ColumnDef::new(PartNumbers::ProcessRouteId).uuid().null())
                        .col(
                            ColumnDef::new(PartNumbers::StdQty)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(PartNumbers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PartNumbers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_part_numbers_route_id")
                                .from(PartNumbers::Table, PartNumbers::ProcessRouteId)
                                .to(ProcessRoutes::Table, ProcessRoutes::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PartNumbers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RouteSteps::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ProcessRoutes::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Operations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Operations {
        Table,
        Id,
        Name,
        OrderIndex,
        IsInitial,
        IsFinal,
        ActiveOperatorId,
        ActiveOperatorName,
        LockedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ProcessRoutes {
        Table,
        Id,
        Name,
        Description,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum RouteSteps {
        Table,
        Id,
        ProcessRouteId,
        OperationId,
        StepOrder,
    }

    #[derive(DeriveIden)]
    enum PartNumbers {
        Table,
        Id,
        PartNumber,
        Revision,
        Description,
        ProductCode,
        SerialMask,
        SerialGenType,
        ProcessRouteId,
        StdQty,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_work_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_work_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WorkOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WorkOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WorkOrders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(WorkOrders::SapOrderNumber).string().null())
                        .col(ColumnDef::new(WorkOrders::PartNumberId).uuid().not_null())
                        .col(ColumnDef::new(WorkOrders::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(WorkOrders::Status)
                                .string()
                                .not_null()
                                .default("OPEN"),
                        )
                        .col(
                            ColumnDef::new(WorkOrders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(WorkOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WorkOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WorkOrders::ClosedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_work_orders_part_number_id")
                                .from(WorkOrders::Table, WorkOrders::PartNumberId)
                                .to(PartNumbers::Table, PartNumbers::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_work_orders_sap_order_number")
                        .table(WorkOrders::Table)
                        .col(WorkOrders::SapOrderNumber)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_work_orders_created_at")
                        .table(WorkOrders::Table)
                        .col(WorkOrders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WorkOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WorkOrders {
        Table,
        Id,
        OrderNumber,
        SapOrderNumber,
        PartNumberId,
        Quantity,
        Status,
        Version,
        CreatedAt,
        UpdatedAt,
        ClosedAt,
    }

    #[derive(DeriveIden)]
    enum PartNumbers {
        Table,
        Id,
    }
}

mod m20240601_000003_create_traceability_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_traceability_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Units reference orders by number only so history outlives the order.
            manager
                .create_table(
                    Table::create()
                        .table(SerialUnits::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SerialUnits::SerialNumber)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SerialUnits::OrderNumber).string().null())
                        .col(ColumnDef::new(SerialUnits::PartNumberId).uuid().not_null())
                        .col(
                            ColumnDef::new(SerialUnits::CurrentOperationId)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerialUnits::IsComplete)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(SerialUnits::TrayId).string().null())
                        .col(
                            ColumnDef::new(SerialUnits::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(SerialUnits::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerialUnits::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            for (name, column) in [
                ("idx_serial_units_order_number", SerialUnits::OrderNumber),
                ("idx_serial_units_tray_id", SerialUnits::TrayId),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(SerialUnits::Table)
                            .col(column)
                            .to_owned(),
                    )
                    .await?;
            }

            manager
                .create_table(
                    Table::create()
                        .table(SerialHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SerialHistory::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(SerialHistory::SerialNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerialHistory::OperationId)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerialHistory::OperationName)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SerialHistory::OperatorId).string().not_null())
                        .col(ColumnDef::new(SerialHistory::OperatorName).string().null())
                        .col(ColumnDef::new(SerialHistory::OrderNumber).string().null())
                        .col(
                            ColumnDef::new(SerialHistory::RecordedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_serial_history_serial_number")
                                .from(SerialHistory::Table, SerialHistory::SerialNumber)
                                .to(SerialUnits::Table, SerialUnits::SerialNumber),
                        )
                        .to_owned(),
                )
                .await?;

            for (name, column) in [
                ("idx_serial_history_serial_number", SerialHistory::SerialNumber),
                ("idx_serial_history_operation_id", SerialHistory::OperationId),
                ("idx_serial_history_recorded_at", SerialHistory::RecordedAt),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(SerialHistory::Table)
                            .col(column)
                            .to_owned(),
                    )
                    .await?;
            }

            manager
                .create_table(
                    Table::create()
                        .table(PrintEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PrintEvents::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PrintEvents::Reference).string().not_null())
                        .col(ColumnDef::new(PrintEvents::OrderNumber).string().null())
                        .col(ColumnDef::new(PrintEvents::LabelType).string().not_null())
                        .col(ColumnDef::new(PrintEvents::Status).string().not_null())
                        .col(ColumnDef::new(PrintEvents::Message).string().null())
                        .col(ColumnDef::new(PrintEvents::OperatorId).string().null())
                        .col(
                            ColumnDef::new(PrintEvents::PrintedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_print_events_reference")
                        .table(PrintEvents::Table)
                        .col(PrintEvents::Reference)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PrintEvents::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SerialHistory::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SerialUnits::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SerialUnits {
        Table,
        SerialNumber,
        OrderNumber,
        PartNumberId,
        CurrentOperationId,
        IsComplete,
        TrayId,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum SerialHistory {
        Table,
        Id,
        SerialNumber,
        OperationId,
        OperationName,
        OperatorId,
        OperatorName,
        OrderNumber,
        RecordedAt,
    }

    #[derive(DeriveIden)]
    enum PrintEvents {
        Table,
        Id,
        Reference,
        OrderNumber,
        LabelType,
        Status,
        Message,
        OperatorId,
        PrintedAt,
    }
}
