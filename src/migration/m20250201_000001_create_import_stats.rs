//! Migration: Create import_stats table.
//!
//! Append-only log of completed imports, one row per fileset.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE IF NOT EXISTS import_stats (
                    id BIGSERIAL PRIMARY KEY,
                    time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    username VARCHAR(255) NOT NULL,
                    groupname VARCHAR(255) NOT NULL,
                    scope VARCHAR(255) NOT NULL,
                    file_count INTEGER NOT NULL CHECK (file_count >= 0),
                    total_file_size_mb DOUBLE PRECISION NOT NULL,
                    import_time_s DOUBLE PRECISION NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_import_stats_time
                    ON import_stats(time DESC);

                CREATE INDEX IF NOT EXISTS idx_import_stats_username
                    ON import_stats(username);
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS import_stats;")
            .await?;

        Ok(())
    }
}
