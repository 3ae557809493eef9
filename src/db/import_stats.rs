//! Database operations for import statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::Serialize;

use super::DbPool;
use crate::entity::import_stat;
use crate::error::AppResult;
use crate::models::ImportStatsRecord;
use crate::services::stats::{StatsError, StatsRecorder};

/// Stored statistics row as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct ImportStatRow {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub user: String,
    pub group: String,
    pub scope: String,
    pub file_count: i32,
    pub total_file_size_mb: f64,
    pub import_time_s: f64,
}

impl From<import_stat::Model> for ImportStatRow {
    fn from(m: import_stat::Model) -> Self {
        Self {
            id: m.id,
            time: m.time,
            user: m.username,
            group: m.groupname,
            scope: m.scope,
            file_count: m.file_count,
            total_file_size_mb: m.total_file_size_mb,
            import_time_s: m.import_time_s,
        }
    }
}

/// Insert one statistics row.
pub async fn insert_import_stat(
    db: &DatabaseConnection,
    record: &ImportStatsRecord,
) -> Result<i64, DbErr> {
    let model = import_stat::ActiveModel {
        id: NotSet,
        time: Set(record.time),
        username: Set(record.user.clone()),
        groupname: Set(record.group.clone()),
        scope: Set(record.label.clone()),
        file_count: Set(record.file_count),
        total_file_size_mb: Set(record.total_file_size_mb),
        import_time_s: Set(record.import_time_s),
    };

    let result = import_stat::Entity::insert(model).exec(db).await?;
    Ok(result.last_insert_id)
}

/// Most recent rows first.
pub async fn list_import_stats(db: &DatabaseConnection, limit: u64) -> AppResult<Vec<ImportStatRow>> {
    let rows = import_stat::Entity::find()
        .order_by_desc(import_stat::Column::Time)
        .order_by_desc(import_stat::Column::Id)
        .limit(limit)
        .all(db)
        .await?;

    Ok(rows.into_iter().map(ImportStatRow::from).collect())
}

#[async_trait]
impl StatsRecorder for DbPool {
    async fn insert(&self, record: &ImportStatsRecord) -> Result<(), StatsError> {
        insert_import_stat(self.connection(), record).await?;
        Ok(())
    }
}
