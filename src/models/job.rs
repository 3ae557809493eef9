//! Import job lifecycle.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use super::fileset::UploadBatch;
use super::metadata::Metadata;

/// Job lifecycle. Exactly one of the terminal states is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Staging,
    Converting,
    DuplicateCheck,
    Uploading,
    Verifying,
    Succeeded,
    Duplicate,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Duplicate | Self::Failed)
    }

    /// Whether the orchestrator may move from `self` to `next`.
    ///
    /// `Verifying -> Uploading` is the retry edge.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Staging)
                | (Staging, Converting)
                | (Converting, DuplicateCheck)
                | (DuplicateCheck, Uploading)
                | (DuplicateCheck, Duplicate)
                | (Uploading, Verifying)
                | (Verifying, Uploading)
                | (Verifying, Succeeded)
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// One fileset bound to the caller's identity and tags.
#[derive(Debug)]
pub struct ImportJob {
    pub id: Uuid,
    pub batch: UploadBatch,
    pub tags: Metadata,
    pub user: String,
    pub group: String,
    pub submitted_at: Instant,
    state: JobState,
}

impl ImportJob {
    pub fn new(
        batch: UploadBatch,
        tags: Metadata,
        user: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            batch,
            tags,
            user: user.into(),
            group: group.into(),
            submitted_at: Instant::now(),
            state: JobState::Pending,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn file_name(&self) -> &str {
        self.batch.display_name()
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(job = %self.id, from = ?self.state, to = ?next, "Job state changed");
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` unless a terminal state was already reached.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
        }
    }
}

/// Result of a verified import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSuccess {
    pub image_ids: Vec<i64>,
    /// `{user}/{project}/{dataset}`
    pub destination: String,
    /// Project (container) the images were filed under.
    pub label: String,
}
