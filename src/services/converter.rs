//! Format conversion seam.
//!
//! Vendor decoders live outside this crate. A converter turns a staged fileset
//! into the file(s) that are uploaded plus the metadata read from them.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ImportError;
use crate::models::UploadBatch;
use crate::models::metadata::{ACQUISITION_DATE_KEY, DATE_TIME_FMT, INSTRUMENT_KEY, Metadata};

/// Converter output. `paths` is never empty on success.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub paths: Vec<PathBuf>,
    pub metadata: Metadata,
}

#[async_trait]
pub trait FormatConverter: Send + Sync {
    /// Convert a staged fileset. Raises `UnsupportedFormat` or `Conversion` errors.
    async fn convert(&self, batch: &UploadBatch) -> Result<Conversion, ImportError>;
}

/// Uploads files unchanged.
///
/// Nothing is read from the file itself. The instrument is the configured
/// default and the acquisition time is the staged copy's modification time,
/// i.e. when it was uploaded. Re-uploads therefore never look like duplicates
/// unless the caller sends an `AcquisitionDate` tag, which takes precedence
/// over this value when tags are merged.
#[derive(Debug, Clone)]
pub struct PassthroughConverter {
    default_instrument: String,
}

impl PassthroughConverter {
    pub fn new(default_instrument: impl Into<String>) -> Self {
        Self {
            default_instrument: default_instrument.into(),
        }
    }
}

#[async_trait]
impl FormatConverter for PassthroughConverter {
    async fn convert(&self, batch: &UploadBatch) -> Result<Conversion, ImportError> {
        let primary = batch.primary();
        let modified = tokio::fs::metadata(&primary.staged_path)
            .await?
            .modified()?;
        let acquired: DateTime<Utc> = modified.into();

        let mut metadata = Metadata::new();
        metadata.insert(INSTRUMENT_KEY, self.default_instrument.clone());
        metadata.insert(
            ACQUISITION_DATE_KEY,
            acquired.format(DATE_TIME_FMT).to_string(),
        );

        Ok(Conversion {
            paths: vec![primary.staged_path.clone()],
            metadata,
        })
    }
}
