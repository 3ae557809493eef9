//! Entry point of the import pipeline: stage, group, queue and report.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{FutureExt, Stream};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{error, info, warn};

use super::converter::FormatConverter;
use super::event_bus::EventBus;
use super::orchestrator::RetryingImportOrchestrator;
use super::progress::BusProgress;
use super::remote::RepositoryConnector;
use super::stager::{Stager, remove_partial};
use super::stats::StatsRecorder;
use super::worker_pool::WorkerPool;
use crate::config::ImportSettings;
use crate::error::ImportError;
use crate::models::{EventDraft, ImportJob, ImportStatsRecord, Metadata, StagedFile, group_filesets};

/// Identity of the importing user, as supplied by the web layer.
#[derive(Debug)]
pub struct Caller {
    pub user: String,
    pub group: String,
    pub session: SecretString,
}

/// One upload stream of a request.
pub struct IncomingFile<S> {
    pub name: String,
    pub declared_size: Option<u64>,
    pub stream: S,
}

/// Synchronous answer to an import request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acceptance {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Names the outcome events will be keyed by.
    pub files: Vec<String>,
}

struct JobRunner {
    orchestrator: RetryingImportOrchestrator,
    connector: Arc<dyn RepositoryConnector>,
    stats: Arc<dyn StatsRecorder>,
    bus: EventBus,
}

impl JobRunner {
    async fn run(&self, mut job: ImportJob, session: SecretString) {
        let name = job.file_name().to_string();
        let sink = BusProgress::new(self.bus.clone(), name.clone());
        self.bus.publish(EventDraft::started(&name));

        let outcome = {
            // Covers the paths even when no session can be opened.
            let _cleanup = job.batch.cleanup_guard();
            match self.connector.connect(&session).await {
                Ok(repo) => {
                    self.orchestrator
                        .import_one(&mut job, repo.as_ref(), &sink)
                        .await
                }
                Err(e) => {
                    job.fail();
                    Err(e)
                }
            }
        };

        match outcome {
            Ok(success) => {
                let record = ImportStatsRecord::new(
                    &job.user,
                    &job.group,
                    &success.label,
                    job.batch.file_count(),
                    job.batch.total_size(),
                    job.submitted_at.elapsed(),
                );
                info!(
                    user = %record.user,
                    group = %record.group,
                    scope = %record.label,
                    files = record.file_count,
                    size_mb = record.total_file_size_mb,
                    seconds = record.import_time_s,
                    "Import statistics"
                );
                if let Err(e) = self.stats.insert(&record).await {
                    error!(file = %name, error = %e, "Failed to store import statistics");
                }

                self.bus.publish(EventDraft::success(
                    &name,
                    &success.destination,
                    &success.image_ids,
                ));
            }
            Err(ImportError::DuplicateFileExists(_)) => {
                self.bus.publish(EventDraft::duplicate(&name));
            }
            Err(e) => {
                self.bus
                    .publish(EventDraft::message(&name, e.terminal_status(), e.to_string()));
            }
        }
    }
}

/// The import pipeline. One instance per process.
pub struct ImportPipeline {
    stager: Stager,
    bus: EventBus,
    runner: Arc<JobRunner>,
    pool: WorkerPool,
}

impl ImportPipeline {
    /// Must be called inside a tokio runtime; the worker pool starts immediately.
    pub fn new(
        settings: &ImportSettings,
        converter: Arc<dyn FormatConverter>,
        connector: Arc<dyn RepositoryConnector>,
        stats: Arc<dyn StatsRecorder>,
        bus: EventBus,
    ) -> Self {
        let runner = JobRunner {
            orchestrator: RetryingImportOrchestrator::new(settings, converter),
            connector,
            stats,
            bus: bus.clone(),
        };

        Self {
            stager: Stager::new(settings),
            bus,
            runner: Arc::new(runner),
            pool: WorkerPool::new(settings.workers),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn stager(&self) -> &Stager {
        &self.stager
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Stage one upload stream, publishing staging progress.
    ///
    /// Failures publish the file's terminal event before returning, so the
    /// caller only needs to decide about the rest of the request.
    pub async fn stage_file<S, B, E>(
        &self,
        owner: &str,
        file: IncomingFile<S>,
    ) -> Result<StagedFile, ImportError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let sink = BusProgress::new(self.bus.clone(), file.name.clone());
        let result = self
            .stager
            .stage(owner, &file.name, file.declared_size, file.stream, &sink)
            .await;

        if let Err(e) = &result {
            if let ImportError::StagingIo { path, .. } = e {
                remove_partial(path).await;
            }
            warn!(file = %file.name, user = %owner, error = %e, "Staging failed");
            let draft = match e {
                ImportError::UnsupportedFormat(_) => {
                    EventDraft::unsupported(&file.name, "File type is not supported")
                }
                other => EventDraft::error(&file.name, other.to_string()),
            };
            self.bus.publish(draft);
        }
        result
    }

    /// Group staged files into filesets and queue one job per fileset.
    ///
    /// Returns the names the jobs report under. A fileset that cannot be queued
    /// gets its error event here and its files removed; the call only fails when
    /// nothing could be queued.
    pub fn submit(
        &self,
        staged: Vec<StagedFile>,
        tags: Metadata,
        caller: &Caller,
    ) -> Result<Vec<String>, ImportError> {
        let base_dir = self.stager.user_dir(&caller.user);
        let batches = group_filesets(&caller.user, &base_dir, staged);

        let mut names = Vec::with_capacity(batches.len());
        let mut refused = None;
        for batch in batches {
            let job = ImportJob::new(batch, tags.clone(), &caller.user, &caller.group);
            let name = job.file_name().to_string();
            let (job_id, file_count) = (job.id, job.batch.file_count());
            let temp = job.batch.temp_paths();
            let session = SecretString::from(caller.session.expose_secret().to_string());

            let runner = self.runner.clone();
            let bus = self.bus.clone();
            let file = name.clone();
            let task = async move {
                // The cleanup guard has already run by the time a panic surfaces here.
                if AssertUnwindSafe(runner.run(job, session))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!(file = %file, "Import job panicked");
                    bus.publish(EventDraft::error(&file, "Import aborted unexpectedly"));
                }
            };

            if let Err(e) = self.pool.submit(Box::pin(task)) {
                temp.remove_all();
                error!(file = %name, user = %caller.user, error = %e, "Import could not be queued");
                self.bus.publish(EventDraft::error(&name, e.to_string()));
                refused = Some(e);
                continue;
            }
            info!(job = %job_id, file = %name, user = %caller.user, files = file_count, "Queued import");
            names.push(name);
        }

        match refused {
            Some(e) if names.is_empty() => Err(ImportError::Io(std::io::Error::other(e.to_string()))),
            _ => Ok(names),
        }
    }

    /// Stage every stream of a request, then queue the resulting filesets.
    ///
    /// Never waits for the imports themselves. `accepted` is false only when
    /// nothing could be staged.
    pub async fn import_files<S, B, E>(
        &self,
        files: Vec<IncomingFile<S>>,
        tags: Metadata,
        caller: &Caller,
    ) -> Acceptance
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let mut staged = Vec::new();
        let mut last_error = None;

        for file in files {
            match self.stage_file(&caller.user, file).await {
                Ok(file) => staged.push(file),
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        if staged.is_empty() {
            return Acceptance {
                accepted: false,
                reason: Some(last_error.unwrap_or_else(|| "No files in request".to_string())),
                files: Vec::new(),
            };
        }

        match self.submit(staged, tags, caller) {
            Ok(names) => {
                info!(user = %caller.user, filesets = names.len(), elapsed_ms = started.elapsed().as_millis() as u64, "Import request accepted");
                Acceptance {
                    accepted: true,
                    reason: None,
                    files: names,
                }
            }
            Err(e) => Acceptance {
                accepted: false,
                reason: Some(e.to_string()),
                files: Vec::new(),
            },
        }
    }

    /// Remove the user's staging directory (logout hook).
    pub async fn remove_user_uploads(&self, owner: &str) -> std::io::Result<usize> {
        self.stager.remove_user_uploads(owner).await
    }
}
