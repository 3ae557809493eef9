//! Cleanup service for stale staging files.
//!
//! Jobs remove their own files; this sweep catches what a crash or a killed
//! request left behind.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::interval;
use tracing::{error, info, warn};

/// Configuration for the cleanup service.
#[derive(Clone)]
pub struct CleanupConfig {
    /// Root of the per-user staging tree
    pub upload_dir: PathBuf,
    /// Staged files older than this many hours are removed
    pub retention_hours: u64,
    /// How often to run cleanup (in seconds)
    pub interval_secs: u64,
}

/// Outcome of one sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub errors: usize,
}

/// Start the cleanup background task.
pub fn start_cleanup_task(config: CleanupConfig) {
    tokio::spawn(async move {
        info!(
            "Starting staging cleanup (retention: {} hours, interval: {} seconds)",
            config.retention_hours, config.interval_secs
        );

        let mut ticker = interval(Duration::from_secs(config.interval_secs));

        loop {
            ticker.tick().await;

            let cutoff = SystemTime::now()
                .checked_sub(Duration::from_secs(config.retention_hours * 3600))
                .unwrap_or(SystemTime::UNIX_EPOCH);

            match sweep_stale_uploads(&config.upload_dir, cutoff).await {
                Ok(report) if report.files_removed > 0 || report.errors > 0 => {
                    info!(
                        "Cleanup completed: {} files and {} directories removed, {} errors",
                        report.files_removed, report.dirs_removed, report.errors
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Cleanup task error: {}", e),
            }
        }
    });
}

/// Remove staged files last modified before `cutoff`, then empty user directories.
pub async fn sweep_stale_uploads(
    upload_dir: &Path,
    cutoff: SystemTime,
) -> std::io::Result<CleanupReport> {
    let mut report = CleanupReport::default();

    let mut users = match tokio::fs::read_dir(upload_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e),
    };

    while let Some(user_dir) = users.next_entry().await? {
        if !user_dir.file_type().await?.is_dir() {
            continue;
        }
        let user_path = user_dir.path();

        let mut remaining = 0usize;
        let mut files = tokio::fs::read_dir(&user_path).await?;
        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Cannot read {}: {}", path.display(), e);
                    report.errors += 1;
                    remaining += 1;
                    continue;
                }
            };

            if modified >= cutoff {
                remaining += 1;
                continue;
            }

            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => report.files_removed += 1,
                Err(e) => {
                    warn!("Failed to remove stale upload {}: {}", path.display(), e);
                    report.errors += 1;
                    remaining += 1;
                }
            }
        }

        if remaining == 0 {
            match tokio::fs::remove_dir(&user_path).await {
                Ok(()) => report.dirs_removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove {}: {}", user_path.display(), e);
                    report.errors += 1;
                }
            }
        }
    }

    Ok(report)
}
