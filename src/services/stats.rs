//! Import statistics sink.

use async_trait::async_trait;

use crate::models::ImportStatsRecord;

#[derive(Debug, thiserror::Error)]
#[error("Failed to record import statistics: {0}")]
pub struct StatsError(pub String);

impl From<sea_orm::DbErr> for StatsError {
    fn from(err: sea_orm::DbErr) -> Self {
        StatsError(err.to_string())
    }
}

/// Persists one row per completed import batch.
#[async_trait]
pub trait StatsRecorder: Send + Sync {
    async fn insert(&self, record: &ImportStatsRecord) -> Result<(), StatsError>;
}
