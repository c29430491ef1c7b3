//! Offline submission queue.
//!
//! Terminals keep taking orders when the link to the server is down.
//! Each submission is enqueued locally with a pre-assigned idempotency
//! key and drained to the server in the background; the key makes every
//! delivery attempt safe to repeat.

use sea_orm::DbErr;
use sea_orm_migration::prelude::*;
use sea_orm_migration::{MigrationName, MigrationTrait, MigratorTrait};

pub mod drain;
pub mod entity;
pub mod queue;

pub use drain::{DrainReport, Drainer, DrainerConfig, SubmitTransport, TransportError};
pub use queue::OfflineQueue;

/// Migrations for the terminal-local queue database.
pub struct OfflineMigrator;

#[async_trait::async_trait]
impl MigratorTrait for OfflineMigrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20240301_000001_create_queued_submissions::Migration)]
    }
}

mod m20240301_000001_create_queued_submissions {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_queued_submissions"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(QueuedSubmissions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(QueuedSubmissions::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(QueuedSubmissions::IdempotencyKey)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(QueuedSubmissions::Payload).text().not_null())
                        .col(ColumnDef::new(QueuedSubmissions::Status).string().not_null())
                        .col(
                            ColumnDef::new(QueuedSubmissions::Retries)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(QueuedSubmissions::NextRetryAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(QueuedSubmissions::LastError).text())
                        .col(
                            ColumnDef::new(QueuedSubmissions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(QueuedSubmissions::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_queued_submissions_key")
                        .table(QueuedSubmissions::Table)
                        .col(QueuedSubmissions::IdempotencyKey)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_queued_submissions_status")
                        .table(QueuedSubmissions::Table)
                        .col(QueuedSubmissions::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(QueuedSubmissions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum QueuedSubmissions {
        Table,
        Id,
        IdempotencyKey,
        Payload,
        Status,
        Retries,
        NextRetryAt,
        LastError,
        CreatedAt,
        UpdatedAt,
    }
}
