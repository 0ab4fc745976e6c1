//! Persisted memory of files that failed to download.
//!
//! Once a file id lands here it is excluded from every later run until the
//! document is deleted (`--retry-failed-files`).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{StorageError, read_json_if_exists, write_json_atomic};

#[derive(Debug, Serialize, Deserialize)]
struct FailedFilesDocument {
    #[serde(default)]
    failed_file_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

/// The set of permanently failed file ids, bound to its on-disk document.
#[derive(Debug, Clone)]
pub struct PermanentFailureSet {
    path: PathBuf,
    ids: BTreeSet<String>,
    dirty: bool,
}

impl PermanentFailureSet {
    /// Loads the document at `path`; a missing document is an empty set.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the document exists but cannot be read
    /// or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let document: Option<FailedFilesDocument> = read_json_if_exists(&path).await?;
        let ids: BTreeSet<String> = document
            .map(|doc| doc.failed_file_ids)
            .unwrap_or_default()
            .into_iter()
            .collect();
        debug!(path = %path.display(), count = ids.len(), "loaded permanent failure set");
        Ok(Self {
            path,
            ids,
            dirty: false,
        })
    }

    /// Deletes the document at `path`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file exists but cannot be removed.
    pub async fn clear(path: &Path) -> Result<(), StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "cleared permanent failure set");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Whether a file id is denylisted.
    #[must_use]
    pub fn contains(&self, file_id: &str) -> bool {
        self.ids.contains(file_id)
    }

    /// Number of denylisted ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Unions `file_ids` into the set. Returns how many were new.
    pub fn record<I, S>(&mut self, file_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.ids.len();
        self.ids.extend(file_ids.into_iter().map(Into::into));
        let added = self.ids.len() - before;
        if added > 0 {
            self.dirty = true;
        }
        added
    }

    /// Writes the set back to disk if it changed since loading.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the write fails.
    pub async fn persist(&mut self) -> Result<(), StorageError> {
        if !self.dirty {
            return Ok(());
        }
        let document = FailedFilesDocument {
            failed_file_ids: self.ids.iter().cloned().collect(),
            updated_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        };
        write_json_atomic(&self.path, &document).await?;
        self.dirty = false;
        info!(path = %self.path.display(), count = self.ids.len(), "persisted permanent failure set");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_document_is_empty() {
        let dir = TempDir::new().unwrap();
        let set = PermanentFailureSet::load(dir.path().join("failed_files.json"))
            .await
            .unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_union_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed_files.json");
        std::fs::write(&path, r#"{"failed_file_ids": ["old"]}"#).unwrap();

        let mut set = PermanentFailureSet::load(&path).await.unwrap();
        assert!(set.contains("old"));
        assert_eq!(set.record(["new", "old"]), 1);
        set.persist().await.unwrap();

        let reloaded = PermanentFailureSet::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("old"));
        assert!(reloaded.contains("new"));
    }

    #[tokio::test]
    async fn test_unchanged_set_is_not_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed_files.json");
        let mut set = PermanentFailureSet::load(&path).await.unwrap();
        assert_eq!(set.record(Vec::<String>::new()), 0);
        set.persist().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_clear_removes_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed_files.json");
        std::fs::write(&path, r#"{"failed_file_ids": ["x"]}"#).unwrap();

        PermanentFailureSet::clear(&path).await.unwrap();
        assert!(!path.exists());
        PermanentFailureSet::clear(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed_files.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            PermanentFailureSet::load(&path).await,
            Err(StorageError::Json { .. })
        ));
    }
}
