//! Ephemeral on-disk store for uploads and generated images.

use crate::error::InferenceError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

/// Extensions accepted by the two-stage analysis flow.
pub const ANALYZE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
/// Extensions accepted by the one-shot `/detect` flow.
pub const DETECT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// `<file_id>.<ext>`
    pub filename: String,
    pub file_id: String,
}

/// Lower-cased extension of `filename` if it is in `allowed`.
pub fn allowed_extension(filename: &str, allowed: &[&str]) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    allowed.contains(&ext.as_str()).then_some(ext)
}

/// Checks name, extension, emptiness and size of an upload.
/// Returns the normalised extension.
pub fn validate_upload(
    filename: &str,
    len: usize,
    allowed: &[&str],
    max_bytes: usize,
) -> Result<String, InferenceError> {
    if filename.is_empty() {
        return Err(InferenceError::InvalidUpload("No file selected".to_string()));
    }
    let ext = allowed_extension(filename, allowed).ok_or_else(|| {
        InferenceError::InvalidUpload(format!("Invalid file type. Allowed: {}", allowed.join(", ")))
    })?;
    if len == 0 {
        return Err(InferenceError::InvalidUpload("Uploaded file is empty".to_string()));
    }
    if len > max_bytes {
        return Err(InferenceError::PayloadTooLarge {
            max_mb: max_bytes / (1024 * 1024),
        });
    }
    Ok(ext)
}

/// A generated or client-supplied name is safe to join onto a store dir
/// only if it is a single plain path component.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Debug, Clone)]
pub struct FileStore {
    upload_dir: PathBuf,
    results_dir: PathBuf,
    retention: Duration,
}

impl FileStore {
    pub fn new(upload_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            results_dir: results_dir.into(),
            retention,
        }
    }

    /// Creates both directories if missing.
    pub fn ensure_dirs(&self) -> Result<(), InferenceError> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.results_dir)?;
        Ok(())
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub async fn save_upload(&self, ext: &str, bytes: &[u8]) -> Result<StoredUpload, InferenceError> {
        let file_id = Uuid::new_v4().to_string();
        let filename = format!("{file_id}.{ext}");
        tokio::fs::write(self.upload_dir.join(&filename), bytes).await?;
        debug!(%filename, size = bytes.len(), "stored upload");
        Ok(StoredUpload { filename, file_id })
    }

    /// Path of an existing upload, or `FileNotFound` for unknown or
    /// unsafe names.
    pub fn resolve_upload(&self, filename: &str) -> Result<PathBuf, InferenceError> {
        if !is_safe_filename(filename) {
            return Err(InferenceError::FileNotFound);
        }
        let path = self.upload_dir.join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(InferenceError::FileNotFound)
        }
    }

    /// Removes files older than the retention period from both dirs.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = SystemTime::now();
        [&self.upload_dir, &self.results_dir]
            .into_iter()
            .map(|dir| sweep_dir(dir, now, self.retention))
            .sum()
    }
}

fn sweep_dir(dir: &Path, now: SystemTime, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read directory for cleanup");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let expired = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|age| age > max_age);
        if expired {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove expired file"),
            }
        }
    }
    removed
}
