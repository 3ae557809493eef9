//! Remote ingestion seam: open a fileset upload, write blocks, verify digests.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::annotations::Annotation;
use super::catalog::{CatalogClient, ObjectId};
use super::checksum::ChecksumAlgorithm;
use crate::error::ImportError;

/// One file of a fileset as announced to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesetSpec {
    pub name: String,
    pub files: Vec<RemoteFile>,
    pub checksum: ChecksumAlgorithm,
}

/// Where the imported images go and how they are annotated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub dataset: ObjectId,
    /// Acquisition time the created images are stamped with, second precision.
    pub acquisition_date: String,
    pub description: String,
    pub annotations: Vec<Annotation>,
}

/// An object created by a verified import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub kind: String,
    pub id: ObjectId,
}

impl RemoteObject {
    pub fn image(id: ObjectId) -> Self {
        Self {
            kind: "Image".to_string(),
            id,
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind.eq_ignore_ascii_case("image")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The repository rejected the digests. Retried.
    #[error("verification failed: {0}")]
    Verification(String),
    /// Transport or protocol failure. Not retried.
    #[error("connection failed: {0}")]
    Connection(String),
}

impl From<RemoteError> for ImportError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Verification(msg) => ImportError::Verification(msg),
            RemoteError::Connection(msg) => ImportError::RemoteConnection(msg),
        }
    }
}

/// Open handle on one upload attempt.
#[async_trait]
pub trait UploadTarget: Send {
    async fn write_block(
        &mut self,
        file_index: usize,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), RemoteError>;

    /// Ask the repository to check the digests, in file order.
    async fn verify(&mut self, digests: &[String]) -> Result<Vec<RemoteObject>, RemoteError>;

    /// Discard a failed attempt.
    async fn abort(&mut self) {}
}

#[async_trait]
pub trait RemoteRepository: Send + Sync {
    async fn open_upload_target(
        &self,
        fileset: &FilesetSpec,
        destination: &Destination,
    ) -> Result<Box<dyn UploadTarget>, RemoteError>;
}

/// Everything a job needs from the repository.
pub trait Repository: CatalogClient + RemoteRepository {}

impl<T: CatalogClient + RemoteRepository> Repository for T {}

/// Opens a repository session for the importing user.
#[async_trait]
pub trait RepositoryConnector: Send + Sync {
    async fn connect(&self, session: &SecretString) -> Result<Arc<dyn Repository>, ImportError>;
}
