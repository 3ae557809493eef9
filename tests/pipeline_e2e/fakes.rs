//! In-process fakes for the pipeline's outbound collaborators.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use image_import_lib::error::ImportError;
use image_import_lib::models::metadata::{ACQUISITION_DATE_KEY, INSTRUMENT_KEY, Metadata, parse_acquisition_date};
use image_import_lib::models::{ImportStatsRecord, UploadBatch};
use image_import_lib::services::catalog::{CatalogClient, ObjectId, same_second};
use image_import_lib::services::converter::{Conversion, FormatConverter};
use image_import_lib::services::remote::{
    Destination, FilesetSpec, RemoteError, RemoteObject, RemoteRepository, Repository,
    RepositoryConnector, UploadTarget,
};
use image_import_lib::services::stats::{StatsError, StatsRecorder};
use secrecy::{ExposeSecret, SecretString};

#[derive(Debug, Clone)]
pub struct Container {
    pub id: ObjectId,
    pub name: String,
    pub parent: Option<ObjectId>,
}

#[derive(Debug, Clone)]
pub struct Image {
    pub id: ObjectId,
    pub dataset: ObjectId,
    pub name: String,
    pub acquired: NaiveDateTime,
    pub annotations: usize,
}

#[derive(Default)]
struct RepoState {
    next_id: ObjectId,
    containers: Vec<Container>,
    images: Vec<Image>,
    attachments: Vec<(ObjectId, String)>,
    opened: usize,
    aborted: usize,
    blocks: usize,
    bytes: u64,
    verify_calls: usize,
    verification_failures: u32,
}

impl RepoState {
    fn allocate(&mut self) -> ObjectId {
        self.next_id += 1;
        self.next_id
    }
}

/// Catalog plus ingestion endpoint kept in memory.
///
/// Verified imports create one image named after the fileset, stamped with
/// the acquisition date sent when the upload was opened.
pub struct FakeRepository {
    state: Arc<Mutex<RepoState>>,
}

impl FakeRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(RepoState {
                next_id: 100,
                ..Default::default()
            })),
        })
    }

    /// Reject the next `n` verification requests.
    pub fn fail_verifications(&self, n: u32) {
        self.state.lock().unwrap().verification_failures = n;
    }

    pub fn containers(&self) -> Vec<Container> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn container_path(&self, id: ObjectId) -> Option<String> {
        let state = self.state.lock().unwrap();
        let dataset = state.containers.iter().find(|c| c.id == id)?;
        let project = state.containers.iter().find(|c| Some(c.id) == dataset.parent)?;
        Some(format!("{}/{}", project.name, dataset.name))
    }

    pub fn images(&self) -> Vec<Image> {
        self.state.lock().unwrap().images.clone()
    }

    pub fn attachments(&self) -> Vec<(ObjectId, String)> {
        self.state.lock().unwrap().attachments.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn aborted(&self) -> usize {
        self.state.lock().unwrap().aborted
    }

    pub fn blocks(&self) -> usize {
        self.state.lock().unwrap().blocks
    }

    pub fn bytes(&self) -> u64 {
        self.state.lock().unwrap().bytes
    }

    pub fn verify_calls(&self) -> usize {
        self.state.lock().unwrap().verify_calls
    }
}

#[async_trait]
impl CatalogClient for FakeRepository {
    async fn get_or_create_container(
        &self,
        name: &str,
        parent: Option<ObjectId>,
    ) -> Result<ObjectId, ImportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(found) = state
            .containers
            .iter()
            .find(|c| c.name == name && c.parent == parent)
        {
            return Ok(found.id);
        }
        let id = state.allocate();
        state.containers.push(Container {
            id,
            name: name.to_string(),
            parent,
        });
        Ok(id)
    }

    async fn find_by_name_prefix(
        &self,
        name: &str,
        container: ObjectId,
    ) -> Result<Option<ObjectId>, ImportError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .find(|i| i.dataset == container && i.name.starts_with(name))
            .map(|i| i.id))
    }

    async fn compare_timestamp(
        &self,
        object: ObjectId,
        acquired_at: &NaiveDateTime,
    ) -> Result<bool, ImportError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .find(|i| i.id == object)
            .is_some_and(|i| same_second(&i.acquired, acquired_at)))
    }

    async fn container_name(&self, container: ObjectId) -> Result<Option<String>, ImportError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .find(|c| c.id == container)
            .map(|c| c.name.clone()))
    }

    async fn attach_file(&self, image: ObjectId, path: &Path) -> Result<(), ImportError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        self.state.lock().unwrap().attachments.push((image, name));
        Ok(())
    }
}

#[async_trait]
impl RemoteRepository for FakeRepository {
    async fn open_upload_target(
        &self,
        fileset: &FilesetSpec,
        destination: &Destination,
    ) -> Result<Box<dyn UploadTarget>, RemoteError> {
        self.state.lock().unwrap().opened += 1;
        Ok(Box::new(FakeTarget {
            state: self.state.clone(),
            name: fileset.name.clone(),
            dataset: destination.dataset,
            annotations: destination.annotations.len(),
            acquired: parse_acquisition_date(&destination.acquisition_date)
                .expect("upload opened without a readable acquisition date"),
        }))
    }
}

struct FakeTarget {
    state: Arc<Mutex<RepoState>>,
    name: String,
    dataset: ObjectId,
    annotations: usize,
    acquired: NaiveDateTime,
}

#[async_trait]
impl UploadTarget for FakeTarget {
    async fn write_block(&mut self, _: usize, _: u64, bytes: &[u8]) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.blocks += 1;
        state.bytes += bytes.len() as u64;
        Ok(())
    }

    async fn verify(&mut self, digests: &[String]) -> Result<Vec<RemoteObject>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.verify_calls += 1;
        if state.verification_failures > 0 {
            state.verification_failures -= 1;
            return Err(RemoteError::Verification("checksum mismatch".to_string()));
        }
        assert!(!digests.is_empty());

        let id = state.allocate();
        state.images.push(Image {
            id,
            dataset: self.dataset,
            name: self.name.clone(),
            acquired: self.acquired,
            annotations: self.annotations,
        });
        Ok(vec![RemoteObject::image(id)])
    }

    async fn abort(&mut self) {
        self.state.lock().unwrap().aborted += 1;
    }
}

/// Hands out the same fake repository for every session.
pub struct FakeConnector {
    pub repo: Arc<FakeRepository>,
    pub sessions: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(repo: Arc<FakeRepository>) -> Arc<Self> {
        Arc::new(Self {
            repo,
            sessions: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RepositoryConnector for FakeConnector {
    async fn connect(&self, session: &SecretString) -> Result<Arc<dyn Repository>, ImportError> {
        if session.expose_secret().is_empty() {
            return Err(ImportError::RemoteConnection("no session".to_string()));
        }
        self.sessions
            .lock()
            .unwrap()
            .push(session.expose_secret().to_string());
        let repo: Arc<dyn Repository> = self.repo.clone();
        Ok(repo)
    }
}

/// Uploads the staged primary file and reports fixed metadata.
pub struct FakeConverter {
    metadata: Metadata,
}

impl FakeConverter {
    pub fn new(instrument: &str, acquired: &str) -> Arc<Self> {
        Arc::new(Self {
            metadata: Metadata::from([(INSTRUMENT_KEY, instrument), (ACQUISITION_DATE_KEY, acquired)]),
        })
    }

    pub fn without_date(instrument: &str) -> Arc<Self> {
        Arc::new(Self {
            metadata: Metadata::from([(INSTRUMENT_KEY, instrument)]),
        })
    }
}

#[async_trait]
impl FormatConverter for FakeConverter {
    async fn convert(&self, batch: &UploadBatch) -> Result<Conversion, ImportError> {
        Ok(Conversion {
            paths: vec![batch.primary().staged_path.clone()],
            metadata: self.metadata.clone(),
        })
    }
}

/// Keeps stats rows in memory.
#[derive(Default)]
pub struct RecordingStats {
    rows: Mutex<Vec<ImportStatsRecord>>,
}

impl RecordingStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rows(&self) -> Vec<ImportStatsRecord> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatsRecorder for RecordingStats {
    async fn insert(&self, record: &ImportStatsRecord) -> Result<(), StatsError> {
        self.rows.lock().unwrap().push(record.clone());
        Ok(())
    }
}
