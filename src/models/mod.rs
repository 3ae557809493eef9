//! Domain models for the import pipeline.

pub mod event;
pub mod fileset;
pub mod job;
pub mod metadata;
pub mod stats;

// Re-export commonly used types
pub use event::{EventDraft, EventStatus, EventType, ProgressEvent};
pub use fileset::{FileRole, StagedFile, TempCleanup, TempPaths, UploadBatch, group_filesets};
pub use job::{ImportJob, ImportSuccess, InvalidTransition, JobState};
pub use metadata::Metadata;
pub use stats::ImportStatsRecord;
