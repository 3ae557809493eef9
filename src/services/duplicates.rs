//! Duplicate detection against the target dataset.
//!
//! An existing artifact matches when its name starts with the candidate name.
//! The match is deliberately loose so names the repository decorated (series
//! suffixes and the like) still count. A match with the same acquisition second
//! is a duplicate; any other match forces a rename.
//!
//! A renamed upload no longer starts with the original name, so the renamed
//! form is looked up too before deciding on a rename.

use chrono::NaiveDateTime;
use tracing::info;

use super::catalog::{CatalogClient, ObjectId};
use crate::error::ImportError;
use crate::models::metadata::collision_free_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing with this name yet.
    Unique,
    /// Same name, different acquisition time: upload under this name instead.
    Rename(String),
    /// Same name and acquisition time: skip the upload.
    Duplicate { existing: ObjectId },
}

pub async fn resolve(
    catalog: &dyn CatalogClient,
    dataset: ObjectId,
    name: &str,
    acquired_at: &NaiveDateTime,
) -> Result<Resolution, ImportError> {
    let Some(existing) = catalog.find_by_name_prefix(name, dataset).await? else {
        return Ok(Resolution::Unique);
    };

    if catalog.compare_timestamp(existing, acquired_at).await? {
        info!(file = %name, existing, "Artifact already imported");
        return Ok(Resolution::Duplicate { existing });
    }

    let renamed = collision_free_name(name, acquired_at);
    if let Some(previous) = catalog.find_by_name_prefix(&renamed, dataset).await?
        && catalog.compare_timestamp(previous, acquired_at).await?
    {
        info!(file = %name, renamed = %renamed, existing = previous, "Artifact already imported under its renamed form");
        return Ok(Resolution::Duplicate { existing: previous });
    }

    info!(file = %name, renamed = %renamed, existing, "Name taken by another acquisition, renaming");
    Ok(Resolution::Rename(renamed))
}
