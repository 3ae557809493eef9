//! Staged files and the filesets they are grouped into.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

/// Extensions that only travel as part of another file's fileset.
pub const SIDE_CAR_EXTENSIONS: &[&str] = &["ser", "xml"];

/// Lowercase extension of a file name, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn stem_of(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// Role of a file inside its fileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Primary,
    SideCar,
}

/// One file written to the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub original_name: String,
    pub staged_path: PathBuf,
    pub size: u64,
    pub role: FileRole,
}

impl StagedFile {
    pub fn new(original_name: impl Into<String>, staged_path: PathBuf, size: u64) -> Self {
        Self {
            original_name: original_name.into(),
            staged_path,
            size,
            role: FileRole::Primary,
        }
    }

    pub fn extension(&self) -> Option<String> {
        extension_of(&self.original_name)
    }
}

/// Every local path a batch has created. Shared with the cleanup guard.
#[derive(Debug, Clone, Default)]
pub struct TempPaths {
    inner: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl TempPaths {
    fn lock(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn track(&self, path: impl Into<PathBuf>) {
        self.lock().insert(path.into());
    }

    pub fn retrack(&self, from: &Path, to: impl Into<PathBuf>) {
        let mut paths = self.lock();
        paths.remove(from);
        paths.insert(to.into());
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().iter().cloned().collect()
    }

    /// Delete every tracked path that still exists. Returns how many were removed.
    pub fn remove_all(&self) -> usize {
        let paths: Vec<PathBuf> = std::mem::take(&mut *self.lock()).into_iter().collect();
        let mut removed = 0;
        for path in paths {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
                }
            }
        }
        removed
    }
}

/// Removes all tracked paths when dropped.
#[must_use = "temporary files are removed when the guard is dropped"]
pub struct TempCleanup {
    paths: TempPaths,
}

impl Drop for TempCleanup {
    fn drop(&mut self) {
        let removed = self.paths.remove_all();
        if removed > 0 {
            tracing::debug!(removed, "Removed temporary files");
        }
    }
}

/// A fileset staged by one user: the primary file plus its side-cars.
#[derive(Debug)]
pub struct UploadBatch {
    pub id: Uuid,
    pub owner: String,
    pub base_dir: PathBuf,
    files: Vec<StagedFile>,
    converted_paths: Vec<PathBuf>,
    temp: TempPaths,
}

impl UploadBatch {
    pub fn new(
        owner: impl Into<String>,
        base_dir: PathBuf,
        mut primary: StagedFile,
        side_cars: Vec<StagedFile>,
    ) -> Self {
        let temp = TempPaths::default();
        primary.role = FileRole::Primary;
        temp.track(primary.staged_path.clone());

        let mut files = vec![primary];
        for mut side_car in side_cars {
            side_car.role = FileRole::SideCar;
            temp.track(side_car.staged_path.clone());
            files.push(side_car);
        }

        Self {
            id: Uuid::now_v7(),
            owner: owner.into(),
            base_dir,
            files,
            converted_paths: Vec::new(),
            temp,
        }
    }

    pub fn primary(&self) -> &StagedFile {
        &self.files[0]
    }

    /// Name events for this batch are keyed by.
    pub fn display_name(&self) -> &str {
        &self.primary().original_name
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    pub fn side_cars(&self) -> impl Iterator<Item = &StagedFile> {
        self.files.iter().filter(|f| f.role == FileRole::SideCar)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn original_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.original_name.as_str()).collect()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Side-car files attached to the imported images after verification.
    pub fn attachment_paths(&self) -> Vec<PathBuf> {
        self.side_cars()
            .filter(|f| f.extension().as_deref() == Some("xml"))
            .map(|f| f.staged_path.clone())
            .collect()
    }

    /// Record converter output. The paths become owned by this batch.
    pub fn set_converted(&mut self, paths: Vec<PathBuf>) {
        for path in &paths {
            self.temp.track(path.clone());
        }
        self.converted_paths = paths;
    }

    pub fn converted_paths(&self) -> &[PathBuf] {
        &self.converted_paths
    }

    /// File name the artifact will carry in the repository.
    pub fn artifact_name(&self) -> String {
        self.converted_paths
            .first()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.display_name().to_string())
    }

    /// Rename the main converted file in place, keeping it tracked for cleanup.
    pub async fn rename_artifact(&mut self, new_name: &str) -> std::io::Result<PathBuf> {
        let current = self.converted_paths.first().cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no converted file to rename")
        })?;
        let renamed = current.with_file_name(new_name);

        tokio::fs::rename(&current, &renamed).await?;
        self.temp.retrack(&current, renamed.clone());
        self.converted_paths[0] = renamed.clone();
        Ok(renamed)
    }

    pub fn temp_paths(&self) -> TempPaths {
        self.temp.clone()
    }

    /// Guard that removes every path this batch created when dropped.
    pub fn cleanup_guard(&self) -> TempCleanup {
        TempCleanup {
            paths: self.temp.clone(),
        }
    }
}

fn is_ser_of(ser_name: &str, emi_stem: &str) -> bool {
    stem_of(ser_name)
        .strip_prefix(emi_stem)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Group the files of one request into filesets.
///
/// `.emi` files take every `<stem>_<digits>.ser`, `.mrc` files take the `.xml`
/// with the same stem. Anything left over is imported on its own. Order of the
/// result follows the order of the primary files in the request.
pub fn group_filesets(owner: &str, base_dir: &Path, staged: Vec<StagedFile>) -> Vec<UploadBatch> {
    let extensions: Vec<Option<String>> = staged.iter().map(StagedFile::extension).collect();
    let mut claimed_by: Vec<Option<usize>> = vec![None; staged.len()];

    for (i, file) in staged.iter().enumerate() {
        let stem = stem_of(&file.original_name);
        match extensions[i].as_deref() {
            Some("emi") => {
                for (j, other) in staged.iter().enumerate() {
                    if claimed_by[j].is_none()
                        && extensions[j].as_deref() == Some("ser")
                        && is_ser_of(&other.original_name, stem)
                    {
                        claimed_by[j] = Some(i);
                    }
                }
            }
            Some("mrc") => {
                let xml = staged.iter().enumerate().position(|(j, other)| {
                    claimed_by[j].is_none()
                        && extensions[j].as_deref() == Some("xml")
                        && stem_of(&other.original_name) == stem
                });
                if let Some(j) = xml {
                    claimed_by[j] = Some(i);
                }
            }
            _ => {}
        }
    }

    let mut side_cars: Vec<Vec<StagedFile>> = vec![Vec::new(); staged.len()];
    let mut primaries: Vec<(usize, StagedFile)> = Vec::new();
    for (j, file) in staged.into_iter().enumerate() {
        match claimed_by[j] {
            Some(owner_idx) => side_cars[owner_idx].push(file),
            None => primaries.push((j, file)),
        }
    }

    primaries
        .into_iter()
        .map(|(i, primary)| {
            UploadBatch::new(
                owner,
                base_dir.to_path_buf(),
                primary,
                std::mem::take(&mut side_cars[i]),
            )
        })
        .collect()
}
