//! Progress reporting capability passed into staging and upload.

use super::event_bus::EventBus;
use crate::models::EventDraft;

/// Receives progress notifications for one file. All methods default to no-ops.
pub trait ProgressSink: Send + Sync {
    /// Staging percentage after a block was written to disk.
    fn staging(&self, _percent: u8) {}

    /// The upload to the repository is starting.
    fn uploading(&self) {}

    /// Upload percentage of the current attempt.
    fn progress(&self, _percent: u8) {}

    /// Attempt `attempt` of `max_attempts` is starting.
    fn retry(&self, _attempt: u32, _max_attempts: u32) {}

    /// All bytes are written, verification is pending.
    fn importing(&self) {}
}

/// Discards everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Publishes progress for one file on the event bus.
pub struct BusProgress {
    bus: EventBus,
    file_name: String,
}

impl BusProgress {
    pub fn new(bus: EventBus, file_name: impl Into<String>) -> Self {
        Self {
            bus,
            file_name: file_name.into(),
        }
    }
}

impl ProgressSink for BusProgress {
    fn staging(&self, percent: u8) {
        self.bus.publish(EventDraft::staging(&self.file_name, percent));
    }

    fn uploading(&self) {
        self.bus.publish(EventDraft::uploading(&self.file_name));
    }

    fn progress(&self, percent: u8) {
        self.bus.publish(EventDraft::progress(&self.file_name, percent));
    }

    fn retry(&self, attempt: u32, max_attempts: u32) {
        tracing::info!(file = %self.file_name, attempt, max_attempts, "Retrying upload");
        self.bus
            .publish(EventDraft::retry(&self.file_name, attempt, max_attempts));
    }

    fn importing(&self) {
        self.bus.publish(EventDraft::importing(&self.file_name));
    }
}

/// `floor(100 * done / total)` clamped to 100. An empty total counts as complete.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (u128::from(done) * 100 / u128::from(total)).min(100);
    pct as u8
}
