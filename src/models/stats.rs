//! Import statistics row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1_000_000.0;

/// One row per completed import batch. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStatsRecord {
    pub time: DateTime<Utc>,
    pub user: String,
    pub group: String,
    /// Instrument (project) label
    pub label: String,
    pub file_count: i32,
    pub total_file_size_mb: f64,
    pub import_time_s: f64,
}

impl ImportStatsRecord {
    pub fn new(
        user: &str,
        group: &str,
        label: &str,
        file_count: usize,
        total_bytes: u64,
        elapsed: std::time::Duration,
    ) -> Self {
        Self {
            time: Utc::now(),
            user: or_unknown(user, "Unknown user"),
            group: or_unknown(group, "Unknown group"),
            label: or_unknown(label, "Unknown scope"),
            file_count: i32::try_from(file_count).unwrap_or(i32::MAX),
            total_file_size_mb: total_bytes as f64 / BYTES_PER_MB,
            import_time_s: elapsed.as_secs_f64(),
        }
    }
}

fn or_unknown(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
