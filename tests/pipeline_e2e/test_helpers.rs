//! Shared test helpers for the pipeline E2E tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use image_import_lib::config::ImportSettings;
use image_import_lib::models::{EventStatus, ProgressEvent};
use image_import_lib::services::converter::FormatConverter;
use image_import_lib::services::{Caller, EventBus, ImportPipeline, IncomingFile, Subscription};
use secrecy::SecretString;
use tempfile::TempDir;

use super::fakes::{FakeConnector, FakeRepository, RecordingStats};

pub const MB: usize = 1_000_000;

/// Acquisition time the concrete scenario's converter reports.
pub const ACQUIRED: &str = "2024-01-01 10:00:00";

pub type ByteStream = stream::Iter<std::vec::IntoIter<Result<Vec<u8>, std::io::Error>>>;

pub fn test_settings(upload_dir: &Path) -> ImportSettings {
    let mut allowed_extensions = ImportSettings::default().allowed_extensions;
    allowed_extensions.push("ext".to_string());

    ImportSettings {
        upload_dir: upload_dir.to_path_buf(),
        workers: 2,
        max_attempts: 3,
        block_size: MB,
        allowed_extensions,
        ..ImportSettings::default()
    }
}

/// A pipeline wired to in-memory collaborators in a fresh staging directory.
pub struct Harness {
    pub dir: TempDir,
    pub pipeline: ImportPipeline,
    pub repo: Arc<FakeRepository>,
    pub connector: Arc<FakeConnector>,
    pub stats: Arc<RecordingStats>,
}

impl Harness {
    pub fn new(converter: Arc<dyn FormatConverter>) -> Self {
        Self::with_repo(converter, FakeRepository::new())
    }

    pub fn with_repo(converter: Arc<dyn FormatConverter>, repo: Arc<FakeRepository>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let connector = FakeConnector::new(repo.clone());
        let stats = RecordingStats::new();
        let pipeline = ImportPipeline::new(
            &settings,
            converter,
            connector.clone(),
            stats.clone(),
            EventBus::new(settings.event_retention),
        );

        Self {
            dir,
            pipeline,
            repo,
            connector,
            stats,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.pipeline.bus().subscribe(None)
    }

    /// Submit `files` as one request and wait for every fileset's terminal event.
    pub async fn import(&self, files: Vec<IncomingFile<ByteStream>>, tags: &[(&str, &str)]) -> Vec<ProgressEvent> {
        let mut sub = self.subscribe();
        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let tags = tags.iter().copied().map(|(k, v)| (k.to_string(), v.to_string())).collect();

        let acceptance = self
            .pipeline
            .import_files(files, tags, &caller("alice"))
            .await;

        let mut expected: Vec<String> = acceptance.files.clone();
        // Files rejected during staging report under their own name.
        for name in names {
            if !acceptance.files.contains(&name) && !is_side_car(&name) {
                expected.push(name);
            }
        }
        collect_until_terminal(&mut sub, &expected).await
    }

    /// Every file still present under the staging root.
    pub fn staged_files(&self) -> Vec<PathBuf> {
        list_files(self.dir.path())
    }
}

fn is_side_car(name: &str) -> bool {
    name.ends_with(".ser") || name.ends_with(".xml")
}

pub fn caller(user: &str) -> Caller {
    Caller {
        user: user.to_string(),
        group: "microscopy".to_string(),
        session: SecretString::from(format!("session-{}", user)),
    }
}

/// An upload stream of `size` bytes delivered in 256 KB chunks.
pub fn incoming(name: &str, size: usize) -> IncomingFile<ByteStream> {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        data.chunks(256 * 1024).map(|c| Ok(c.to_vec())).collect();

    IncomingFile {
        name: name.to_string(),
        declared_size: Some(size as u64),
        stream: stream::iter(chunks),
    }
}

/// Read events until each of `names` has seen a terminal event.
pub async fn collect_until_terminal(sub: &mut Subscription, names: &[String]) -> Vec<ProgressEvent> {
    let mut pending: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut events = Vec::new();

    tokio::time::timeout(Duration::from_secs(10), async {
        while !pending.is_empty() {
            let event = sub.next().await.expect("event bus closed");
            if event.is_terminal() {
                pending.remove(event.file_name.as_str());
            }
            events.push(event);
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for terminal events: {:?}", pending));

    events
}

pub fn events_for<'a>(events: &'a [ProgressEvent], file: &str) -> Vec<&'a ProgressEvent> {
    events.iter().filter(|e| e.file_name == file).collect()
}

pub fn statuses(events: &[&ProgressEvent]) -> Vec<String> {
    events.iter().map(|e| e.status.clone()).collect()
}

pub fn progress_values(events: &[&ProgressEvent]) -> Vec<u8> {
    events
        .iter()
        .filter(|e| e.status() == Some(EventStatus::Progress))
        .map(|e| e.message.parse().unwrap())
        .collect()
}

pub fn terminal<'a>(events: &[&'a ProgressEvent]) -> &'a ProgressEvent {
    let terminals: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminals.len(), 1, "expected exactly one terminal event: {:?}", events);
    terminals[0]
}

fn list_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(list_files(&path));
        } else {
            found.push(path);
        }
    }
    found
}
