//! Writes incoming upload streams to the per-user staging area.

use std::path::{Path, PathBuf};

use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::progress::{ProgressSink, percent_of};
use crate::config::ImportSettings;
use crate::error::ImportError;
use crate::models::StagedFile;
use crate::models::fileset::extension_of;

/// Stages uploads under `<upload_root>/<owner>/<file name>`.
#[derive(Debug, Clone)]
pub struct Stager {
    upload_root: PathBuf,
    threshold: u64,
    chunk: usize,
    allowed_extensions: Vec<String>,
}

impl Stager {
    pub fn new(settings: &ImportSettings) -> Self {
        Self {
            upload_root: settings.upload_dir.clone(),
            threshold: settings.staging_threshold,
            chunk: settings.staging_chunk.max(1),
            allowed_extensions: settings.allowed_extensions.clone(),
        }
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    /// Staging directory of one user.
    pub fn user_dir(&self, owner: &str) -> PathBuf {
        self.upload_root.join(safe_component(owner))
    }

    pub fn is_supported(&self, file_name: &str) -> bool {
        extension_of(file_name).is_some_and(|ext| self.allowed_extensions.iter().any(|a| *a == ext))
    }

    /// Reject names that are unsupported or carry no usable file name.
    pub fn check_supported(&self, file_name: &str) -> Result<String, ImportError> {
        let base = Path::new(&file_name.replace('\\', "/"))
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .filter(|n| n != "..")
            .ok_or_else(|| ImportError::UnsupportedFormat(file_name.to_string()))?;

        if !self.is_supported(&base) {
            return Err(ImportError::UnsupportedFormat(base));
        }
        Ok(base)
    }

    /// Write one upload stream to disk.
    ///
    /// Streams larger than the threshold (declared up front or measured while
    /// buffering) are written block by block with a staging callback after each
    /// block; smaller ones are written in one go. A failed disk write returns
    /// [`ImportError::StagingIo`] carrying the partial path, which the caller
    /// must remove.
    pub async fn stage<S, B, E>(
        &self,
        owner: &str,
        file_name: &str,
        declared_size: Option<u64>,
        mut stream: S,
        sink: &dyn ProgressSink,
    ) -> Result<StagedFile, ImportError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let name = self.check_supported(file_name)?;

        let dir = self.user_dir(owner);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ImportError::StagingIo {
                path: dir.clone(),
                source,
            })?;
        let path = dir.join(&name);

        let mut pending: Vec<u8> = Vec::new();
        let mut file: Option<tokio::fs::File> = None;
        let mut written: u64 = 0;
        let mut received: u64 = 0;
        let mut last_percent: Option<u8> = None;

        if declared_size.is_some_and(|size| size > self.threshold) {
            file = Some(self.create(&path).await?);
        }

        while let Some(chunk) = stream.next().await {
            let data = match chunk {
                Ok(data) => data,
                Err(e) => {
                    drop(file.take());
                    remove_partial(&path).await;
                    return Err(ImportError::Io(std::io::Error::other(format!(
                        "upload of {} interrupted: {}",
                        name, e
                    ))));
                }
            };
            let data = data.as_ref();
            received += data.len() as u64;
            pending.extend_from_slice(data);

            if file.is_none() && received > self.threshold {
                debug!(file = %name, received, "Switching to chunked staging");
                file = Some(self.create(&path).await?);
            }

            if let Some(out) = file.as_mut() {
                while pending.len() >= self.chunk {
                    let block: Vec<u8> = pending.drain(..self.chunk).collect();
                    write_block(out, &path, &block).await?;
                    written += block.len() as u64;
                    if let Some(total) = declared_size {
                        let percent = percent_of(written, total);
                        sink.staging(percent);
                        last_percent = Some(percent);
                    }
                }
            }
        }

        match file {
            Some(mut out) => {
                if !pending.is_empty() {
                    write_block(&mut out, &path, &pending).await?;
                    written += pending.len() as u64;
                }
                out.flush()
                    .await
                    .map_err(|source| ImportError::StagingIo {
                        path: path.clone(),
                        source,
                    })?;
                if last_percent != Some(100) {
                    sink.staging(100);
                }
            }
            None => {
                tokio::fs::write(&path, &pending)
                    .await
                    .map_err(|source| ImportError::StagingIo {
                        path: path.clone(),
                        source,
                    })?;
                written = pending.len() as u64;
            }
        }

        info!(file = %name, user = %owner, bytes = written, "Staged upload");
        Ok(StagedFile::new(name, path, written))
    }

    async fn create(&self, path: &Path) -> Result<tokio::fs::File, ImportError> {
        tokio::fs::File::create(path)
            .await
            .map_err(|source| ImportError::StagingIo {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Delete a user's staging directory. Must not run while that user has a batch in flight.
    pub async fn remove_user_uploads(&self, owner: &str) -> std::io::Result<usize> {
        let dir = self.user_dir(owner);
        let mut count = 0;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                count += 1;
            }
        }

        tokio::fs::remove_dir_all(&dir).await?;
        info!(user = %owner, files = count, "Removed user uploads");
        Ok(count)
    }
}

async fn write_block(
    out: &mut tokio::fs::File,
    path: &Path,
    block: &[u8],
) -> Result<(), ImportError> {
    out.write_all(block)
        .await
        .map_err(|source| ImportError::StagingIo {
            path: path.to_path_buf(),
            source,
        })
}

/// Remove a partially written file.
///
/// Staging can fail before the file exists (e.g. creating the user directory),
/// in which case `path` is not a file and is left alone.
pub async fn remove_partial(path: &Path) {
    let is_file = tokio::fs::symlink_metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file());
    if !is_file {
        return;
    }
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
    }
}

/// Reduce a user name to a single safe path component.
fn safe_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
