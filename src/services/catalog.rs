//! Container catalog seam and the per-name creation locks it relies on.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::OwnedMutexGuard;

use crate::error::ImportError;

/// Repository object id.
pub type ObjectId = i64;

/// Project/dataset lookups against the repository.
///
/// `get_or_create_container` must be idempotent under concurrency: two jobs
/// resolving the same name end up with the same container. Implementations
/// serialize check-then-create per container name, see [`ContainerLocks`].
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Resolve or create a container. `parent: None` addresses a project,
    /// `Some(project)` a dataset inside it.
    async fn get_or_create_container(
        &self,
        name: &str,
        parent: Option<ObjectId>,
    ) -> Result<ObjectId, ImportError>;

    /// First artifact in `container` whose name starts with `name`.
    async fn find_by_name_prefix(
        &self,
        name: &str,
        container: ObjectId,
    ) -> Result<Option<ObjectId>, ImportError>;

    /// Whether the artifact's acquisition time equals `acquired_at` to the second.
    async fn compare_timestamp(
        &self,
        object: ObjectId,
        acquired_at: &NaiveDateTime,
    ) -> Result<bool, ImportError>;

    /// Display name of a container, if it exists.
    async fn container_name(&self, container: ObjectId) -> Result<Option<String>, ImportError>;

    /// Attach a local file to an imported image.
    async fn attach_file(&self, image: ObjectId, path: &Path) -> Result<(), ImportError>;
}

/// Process-wide registry of per-name async locks.
#[derive(Clone, Default)]
pub struct ContainerLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ContainerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key under which a container's creation is serialized.
    pub fn key(name: &str, parent: Option<ObjectId>) -> String {
        match parent {
            Some(parent) => format!("{}/{}", parent, name),
            None => name.to_string(),
        }
    }

    /// Hold the returned guard across check-then-create.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(key.to_string()).or_default().clone()
        };
        entry.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Truncate to whole seconds before comparing acquisition times.
pub fn same_second(a: &NaiveDateTime, b: &NaiveDateTime) -> bool {
    a.and_utc().timestamp() == b.and_utc().timestamp()
}
