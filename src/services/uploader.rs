//! Chunked, checksum-verified upload with whole-attempt retries.

use std::path::PathBuf;

use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::checksum::ChecksumAlgorithm;
use super::progress::{ProgressSink, percent_of};
use super::remote::{Destination, FilesetSpec, RemoteObject, RemoteRepository, UploadTarget};
use crate::config::ImportSettings;
use crate::error::ImportError;

/// Told when an attempt switches between writing and verifying.
pub trait AttemptObserver: Send {
    fn writing(&mut self, _attempt: u32) {}
    fn verifying(&mut self, _attempt: u32) {}
}

/// Observer that ignores phase changes.
pub struct NoObserver;

impl AttemptObserver for NoObserver {}

/// What one upload call is about.
pub struct UploadRequest<'a> {
    pub paths: &'a [PathBuf],
    pub total_bytes: u64,
    pub fileset: &'a FilesetSpec,
    pub destination: &'a Destination,
}

#[derive(Debug, Clone)]
pub struct ChunkedUploader {
    block_size: usize,
    max_attempts: u32,
    checksum: ChecksumAlgorithm,
}

/// State of a single try. Dropped entirely when the try fails.
struct UploadAttempt {
    number: u32,
    written: u64,
    last_percent: u8,
    digests: Vec<String>,
}

impl UploadAttempt {
    fn new(number: u32) -> Self {
        Self {
            number,
            written: 0,
            last_percent: 0,
            digests: Vec::new(),
        }
    }

    fn advance(&mut self, bytes: usize, total: u64, sink: &dyn ProgressSink) {
        self.written += bytes as u64;
        self.report(percent_of(self.written, total), sink);
    }

    fn report(&mut self, percent: u8, sink: &dyn ProgressSink) {
        if percent > self.last_percent {
            self.last_percent = percent;
            sink.progress(percent);
        }
    }
}

impl ChunkedUploader {
    pub fn new(block_size: usize, max_attempts: u32, checksum: ChecksumAlgorithm) -> Self {
        Self {
            block_size: block_size.max(1),
            max_attempts: max_attempts.max(1),
            checksum,
        }
    }

    pub fn from_settings(settings: &ImportSettings) -> Self {
        Self::new(settings.block_size, settings.max_attempts, settings.checksum)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upload the fileset and verify it, retrying from byte zero on verification failure.
    ///
    /// Attempts after the first announce themselves on `sink` with a retry
    /// notification followed by a reset to 0%. Connection errors end the upload
    /// immediately; running out of attempts yields [`ImportError::AttemptsExhausted`].
    pub async fn upload(
        &self,
        remote: &dyn RemoteRepository,
        request: &UploadRequest<'_>,
        sink: &dyn ProgressSink,
        observer: &mut dyn AttemptObserver,
    ) -> Result<Vec<RemoteObject>, ImportError> {
        let mut last_error = String::new();

        for number in 1..=self.max_attempts {
            if number > 1 {
                sink.retry(number, self.max_attempts);
                sink.progress(0);
            }
            observer.writing(number);

            let mut target = remote
                .open_upload_target(request.fileset, request.destination)
                .await?;

            let attempt = match self.write_all(target.as_mut(), request, number, sink).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    target.abort().await;
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    warn!(file = %request.fileset.name, attempt = number, error = %e, "Block write rejected");
                    last_error = e.to_string();
                    continue;
                }
            };

            sink.importing();
            observer.verifying(number);

            match target.verify(&attempt.digests).await.map_err(ImportError::from) {
                Ok(objects) => {
                    info!(
                        file = %request.fileset.name,
                        attempt = attempt.number,
                        bytes = attempt.written,
                        objects = objects.len(),
                        "Upload verified"
                    );
                    return Ok(objects);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        file = %request.fileset.name,
                        attempt = number,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Upload verification failed"
                    );
                    target.abort().await;
                    last_error = e.to_string();
                }
                Err(e) => {
                    target.abort().await;
                    return Err(e);
                }
            }
        }

        Err(ImportError::AttemptsExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }

    async fn write_all(
        &self,
        target: &mut dyn UploadTarget,
        request: &UploadRequest<'_>,
        number: u32,
        sink: &dyn ProgressSink,
    ) -> Result<UploadAttempt, ImportError> {
        let mut attempt = UploadAttempt::new(number);
        let mut buf = vec![0u8; self.block_size];

        for (index, path) in request.paths.iter().enumerate() {
            let mut file = tokio::fs::File::open(path).await?;
            let mut hasher = self.checksum.hasher();
            let mut offset: u64 = 0;

            loop {
                let n = read_block(&mut file, &mut buf).await?;
                if n == 0 {
                    break;
                }

                let block = &buf[..n];
                target
                    .write_block(index, offset, block)
                    .await
                    .map_err(ImportError::from)?;
                hasher.update(block);
                offset += n as u64;
                attempt.advance(n, request.total_bytes, sink);
            }

            debug!(path = %path.display(), bytes = offset, "File written");
            attempt.digests.push(hasher.finish());
        }

        if request.total_bytes == 0 {
            attempt.report(100, sink);
        }
        Ok(attempt)
    }
}

/// Fill `buf` from `file`, short only at end of file.
async fn read_block(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
