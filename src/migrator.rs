use sea_orm::DatabaseConnection;
use sea_orm_migration::prelude::*;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_merchants_table::Migration),
            Box::new(m20250101_000002_create_payments_table::Migration),
            Box::new(m20250101_000003_create_refunds_table::Migration),
            Box::new(m20250101_000004_create_idempotency_keys_table::Migration),
            Box::new(m20250101_000005_create_webhook_logs_table::Migration),
        ]
    }
}

pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    info!("Running database migrations");
    match Migrator::up(db, None).await {
        Ok(_) => {
            info!("Migrations completed");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Migration failed");
            Err(e)
        }
    }
}

mod m20250101_000001_create_merchants_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_merchants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Merchants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Merchants::Id)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Merchants::Name).string().not_null())
                        .col(
                            ColumnDef::new(Merchants::ApiKey)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Merchants::ApiSecret).string().not_null())
                        .col(ColumnDef::new(Merchants::WebhookUrl).string().null())
                        .col(ColumnDef::new(Merchants::WebhookSecret).string().null())
                        .col(
                            ColumnDef::new(Merchants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Merchants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Merchants {
        Table,
        Id,
        Name,
        ApiKey,
        ApiSecret,
        WebhookUrl,
        WebhookSecret,
        CreatedAt,
    }
}

mod m20250101_000002_create_payments_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Payments::Id)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::MerchantId).string().not_null())
                        .col(ColumnDef::new(Payments::OrderId).string().not_null())
                        .col(ColumnDef::new(Payments::Amount).big_integer().not_null())
                        .col(ColumnDef::new(Payments::Currency).string().not_null())
                        .col(ColumnDef::new(Payments::Method).string().not_null())
                        .col(ColumnDef::new(Payments::Vpa).string().null())
                        .col(ColumnDef::new(Payments::Status).string().not_null())
                        .col(
                            ColumnDef::new(Payments::Captured)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Payments::ErrorCode).string().null())
                        .col(ColumnDef::new(Payments::ErrorDescription).string().null())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::UpdatedAt)
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
                        .name("idx_payments_merchant_id")
                        .table(Payments::Table)
                        .col(Payments::MerchantId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Payments {
        Table,
        Id,
        MerchantId,
        OrderId,
        Amount,
        Currency,
        Method,
        Vpa,
        Status,
        Captured,
        ErrorCode,
        ErrorDescription,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000003_create_refunds_table {

    use sea_orm_migration::prelude::*;

    use super::m20250101_000002_create_payments_table::Payments;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000003_create_refunds_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Refunds::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Refunds::Id)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Refunds::PaymentId).string().not_null())
                        .col(ColumnDef::new(Refunds::MerchantId).string().not_null())
                        .col(ColumnDef::new(Refunds::Amount).big_integer().not_null())
                        .col(ColumnDef::new(Refunds::Reason).string().null())
                        .col(ColumnDef::new(Refunds::Status).string().not_null())
                        .col(
                            ColumnDef::new(Refunds::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Refunds::ProcessedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_refunds_payment_id")
                                .from(Refunds::Table, Refunds::PaymentId)
                                .to(Payments::Table, Payments::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_refunds_payment_id")
                        .table(Refunds::Table)
                        .col(Refunds::PaymentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Refunds::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Refunds {
        Table,
        Id,
        PaymentId,
        MerchantId,
        Amount,
        Reason,
        Status,
        CreatedAt,
        ProcessedAt,
    }
}

mod m20250101_000004_create_idempotency_keys_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000004_create_idempotency_keys_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(IdempotencyKeys::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(IdempotencyKeys::MerchantId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(IdempotencyKeys::Key).string().not_null())
                        .col(
                            ColumnDef::new(IdempotencyKeys::ResponseBody)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IdempotencyKeys::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(IdempotencyKeys::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(IdempotencyKeys::MerchantId)
                                .col(IdempotencyKeys::Key),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(IdempotencyKeys::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum IdempotencyKeys {
        Table,
        MerchantId,
        Key,
        ResponseBody,
        CreatedAt,
        ExpiresAt,
    }
}

mod m20250101_000005_create_webhook_logs_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000005_create_webhook_logs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WebhookLogs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WebhookLogs::Id)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WebhookLogs::MerchantId).string().not_null())
                        .col(ColumnDef::new(WebhookLogs::Event).string().not_null())
                        .col(ColumnDef::new(WebhookLogs::Payload).text().not_null())
                        .col(ColumnDef::new(WebhookLogs::Status).string().not_null())
                        .col(
                            ColumnDef::new(WebhookLogs::Attempts)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(WebhookLogs::ResponseCode).integer().null())
                        .col(ColumnDef::new(WebhookLogs::ResponseBody).text().null())
                        .col(
                            ColumnDef::new(WebhookLogs::LastAttemptAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WebhookLogs::NextRetryAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WebhookLogs::CreatedAt)
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
                        .name("idx_webhook_logs_merchant_id_created_at")
                        .table(WebhookLogs::Table)
                        .col(WebhookLogs::MerchantId)
                        .col(WebhookLogs::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WebhookLogs::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum WebhookLogs {
        Table,
        Id,
        MerchantId,
        Event,
        Payload,
        Status,
        Attempts,
        ResponseCode,
        ResponseBody,
        LastAttemptAt,
        NextRetryAt,
        CreatedAt,
    }
}
