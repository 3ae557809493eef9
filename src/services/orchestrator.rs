//! Runs one import job: convert, resolve containers and duplicates, upload, verify.

use std::sync::Arc;

use tracing::{info, warn};

use super::annotations::{build_annotations, description, project_label};
use super::catalog::ObjectId;
use super::checksum::ChecksumAlgorithm;
use super::converter::FormatConverter;
use super::duplicates::{self, Resolution};
use super::progress::ProgressSink;
use super::remote::{Destination, FilesetSpec, RemoteFile, Repository};
use super::uploader::{AttemptObserver, ChunkedUploader, UploadRequest};
use crate::config::ImportSettings;
use crate::error::ImportError;
use crate::models::metadata::{DATE_TIME_FMT, dataset_name_for};
use crate::models::{ImportJob, ImportSuccess, JobState};

impl AttemptObserver for ImportJob {
    fn writing(&mut self, attempt: u32) {
        if self.state() == JobState::Verifying
            && let Err(e) = self.advance(JobState::Uploading)
        {
            warn!(attempt, error = %e, "Unexpected job state on retry");
        }
    }

    fn verifying(&mut self, attempt: u32) {
        if let Err(e) = self.advance(JobState::Verifying) {
            warn!(attempt, error = %e, "Unexpected job state before verification");
        }
    }
}

pub struct RetryingImportOrchestrator {
    converter: Arc<dyn FormatConverter>,
    uploader: ChunkedUploader,
    checksum: ChecksumAlgorithm,
    default_instrument: String,
}

impl RetryingImportOrchestrator {
    pub fn new(settings: &ImportSettings, converter: Arc<dyn FormatConverter>) -> Self {
        Self {
            converter,
            uploader: ChunkedUploader::from_settings(settings),
            checksum: settings.checksum,
            default_instrument: settings.default_instrument.clone(),
        }
    }

    /// Import one fileset.
    ///
    /// Every temporary path the job owns is gone when this returns, whatever
    /// the outcome. `DuplicateFileExists` leaves the job in `Duplicate`, any
    /// other error in `Failed`.
    pub async fn import_one(
        &self,
        job: &mut ImportJob,
        repo: &dyn Repository,
        sink: &dyn ProgressSink,
    ) -> Result<ImportSuccess, ImportError> {
        let _cleanup = job.batch.cleanup_guard();

        let result = self.run(job, repo, sink).await;
        if let Err(e) = &result {
            job.fail();
            warn!(job = %job.id, file = %job.file_name(), state = ?job.state(), error = %e, "Import ended without success");
        }
        result
    }

    async fn run(
        &self,
        job: &mut ImportJob,
        repo: &dyn Repository,
        sink: &dyn ProgressSink,
    ) -> Result<ImportSuccess, ImportError> {
        job.advance(JobState::Staging)?;
        for file in job.batch.files() {
            if !tokio::fs::try_exists(&file.staged_path).await? {
                return Err(ImportError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("staged file {} is missing", file.original_name),
                )));
            }
        }

        job.advance(JobState::Converting)?;
        let conversion = self.converter.convert(&job.batch).await?;
        if conversion.paths.is_empty() {
            return Err(ImportError::conversion(
                job.file_name(),
                "converter produced no files",
            ));
        }
        job.batch.set_converted(conversion.paths);

        let metadata = conversion.metadata.merged_with_tags(&job.tags);
        let acquired_at = metadata.acquisition_date().ok_or_else(|| {
            ImportError::conversion(job.file_name(), "missing or unreadable AcquisitionDate")
        })?;
        let label = project_label(&metadata, &self.default_instrument).to_string();

        job.advance(JobState::DuplicateCheck)?;
        let project = repo.get_or_create_container(&label, None).await?;
        let dataset = repo
            .get_or_create_container(&dataset_name_for(&acquired_at), Some(project))
            .await?;

        let artifact = job.batch.artifact_name();
        match duplicates::resolve(repo, dataset, &artifact, &acquired_at).await? {
            Resolution::Unique => {}
            Resolution::Rename(new_name) => {
                job.batch.rename_artifact(&new_name).await?;
            }
            Resolution::Duplicate { .. } => {
                job.advance(JobState::Duplicate)?;
                return Err(ImportError::DuplicateFileExists(artifact));
            }
        }

        job.advance(JobState::Uploading)?;
        sink.uploading();

        let paths = job.batch.converted_paths().to_vec();
        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            let size = tokio::fs::metadata(path).await?.len();
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            files.push(RemoteFile { name, size });
        }
        let total_bytes = files.iter().map(|f| f.size).sum();

        let fileset = FilesetSpec {
            name: job.batch.artifact_name(),
            files,
            checksum: self.checksum,
        };
        let destination = Destination {
            dataset,
            acquisition_date: acquired_at.format(DATE_TIME_FMT).to_string(),
            description: description(&metadata),
            annotations: build_annotations(&metadata, &job.tags),
        };
        let request = UploadRequest {
            paths: &paths,
            total_bytes,
            fileset: &fileset,
            destination: &destination,
        };

        let objects = self.uploader.upload(repo, &request, sink, job).await?;
        let image_ids: Vec<ObjectId> = objects
            .iter()
            .filter(|o| o.is_image())
            .map(|o| o.id)
            .collect();
        if image_ids.is_empty() {
            return Err(ImportError::RemoteConnection(
                "verification succeeded but no images were created".to_string(),
            ));
        }

        for path in job.batch.attachment_paths() {
            for image in &image_ids {
                if let Err(e) = repo.attach_file(*image, &path).await {
                    warn!(image, path = %path.display(), error = %e, "Failed to attach side-car file");
                }
            }
        }

        let destination = self.destination_path(repo, &job.user, project, dataset).await;
        job.advance(JobState::Succeeded)?;

        info!(
            job = %job.id,
            file = %job.file_name(),
            images = ?image_ids,
            destination = %destination,
            "Import succeeded"
        );

        Ok(ImportSuccess {
            image_ids,
            destination,
            label,
        })
    }

    /// `{user}/{project}/{dataset}` with placeholders for anything unknown.
    async fn destination_path(
        &self,
        repo: &dyn Repository,
        user: &str,
        project: ObjectId,
        dataset: ObjectId,
    ) -> String {
        let user = if user.trim().is_empty() { "Unknown user" } else { user };
        let project_name = lookup_name(repo, project).await;
        let dataset_name = lookup_name(repo, dataset).await;

        format!(
            "{}/{}/{}",
            user,
            project_name.as_deref().unwrap_or("Unknown project"),
            dataset_name.as_deref().unwrap_or("Unknown dataset"),
        )
    }
}

async fn lookup_name(repo: &dyn Repository, container: ObjectId) -> Option<String> {
    match repo.container_name(container).await {
        Ok(name) => name,
        Err(e) => {
            warn!(container, error = %e, "Container name lookup failed");
            None
        }
    }
}
