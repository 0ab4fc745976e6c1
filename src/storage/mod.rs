//! Filesystem adapter for backup output.
//!
//! A [`ConversationStore`] is scoped either to the output directory itself
//! (the default collection) or to `projects/<name>` beneath it. Files and the
//! permanent-failure document are shared by every scope and always live at
//! the output root.
//!
//! ```text
//! <output>/
//!   conversations/<id>.json
//!   conversations.json
//!   metadata.json
//!   backup.log
//!   markdown/<id>.md
//!   projects/<name>/...        same layout per project
//!   files/<file_id>/<name>
//!   failed_files.json
//! ```

mod error;
mod partial;
mod sanitize;

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::timestamp::Timestamp;

pub use error::StorageError;
pub use partial::PartialFile;
pub use sanitize::{
    MAX_PROJECT_FOLDER_CHARS, is_windows_reserved_name, sanitize_project_name,
    sanitize_relative_path, sanitize_segment,
};

/// Directory holding one JSON document per conversation.
pub const CONVERSATIONS_DIR: &str = "conversations";
/// Summary index written after each run.
pub const SUMMARY_INDEX_FILE: &str = "conversations.json";
/// Run metadata document.
pub const METADATA_FILE: &str = "metadata.json";
/// Append-only run log.
pub const LOG_FILE: &str = "backup.log";
/// Directory holding markdown transcripts.
pub const MARKDOWN_DIR: &str = "markdown";
/// Directory holding project scopes.
pub const PROJECTS_DIR: &str = "projects";
/// Directory holding downloaded files.
pub const FILES_DIR: &str = "files";
/// Persisted permanent-failure set.
pub const FAILED_FILES_FILE: &str = "failed_files.json";
/// Suffix of a file still being written.
pub const PART_SUFFIX: &str = ".part";

/// Scoped view of the backup output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationStore {
    output_root: PathBuf,
    scope_root: PathBuf,
}

impl ConversationStore {
    /// Creates a store for the default collection.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        let output_root = output_root.into();
        Self {
            scope_root: output_root.clone(),
            output_root,
        }
    }

    /// Returns a store scoped to `projects/<dir_name>`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidName`] if the name is not a single
    /// usable path segment.
    pub fn project(&self, dir_name: &str) -> Result<Self, StorageError> {
        let clean = sanitize_segment(dir_name).ok_or_else(|| StorageError::invalid_name(dir_name))?;
        Ok(Self {
            output_root: self.output_root.clone(),
            scope_root: self.output_root.join(PROJECTS_DIR).join(clean),
        })
    }

    /// The output directory shared by all scopes.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// The directory this store writes conversations into.
    #[must_use]
    pub fn scope_root(&self) -> &Path {
        &self.scope_root
    }

    /// Creates the scope's directory structure.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if a directory cannot be created.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        let dir = self.scope_root.join(CONVERSATIONS_DIR);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        debug!(path = %self.scope_root.display(), "storage initialized");
        Ok(())
    }

    /// Path of the stored detail document for a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidName`] for ids that are not usable as a
    /// file name.
    pub fn detail_path(&self, conversation_id: &str) -> Result<PathBuf, StorageError> {
        let clean = sanitize_segment(conversation_id)
            .ok_or_else(|| StorageError::invalid_name(conversation_id))?;
        Ok(self
            .scope_root
            .join(CONVERSATIONS_DIR)
            .join(format!("{clean}.json")))
    }

    /// Writes a raw detail document.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the id is unusable or the write fails.
    pub async fn write_detail(
        &self,
        conversation_id: &str,
        detail: &Value,
    ) -> Result<PathBuf, StorageError> {
        let path = self.detail_path(conversation_id)?;
        write_json_atomic(&path, detail).await?;
        Ok(path)
    }

    /// Reads a stored detail document, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the file exists but cannot be read or
    /// parsed.
    pub async fn read_detail(&self, conversation_id: &str) -> Result<Option<Value>, StorageError> {
        let path = self.detail_path(conversation_id)?;
        read_json_if_exists(&path).await
    }

    /// The stored copy's `update_time` in epoch seconds.
    ///
    /// Missing, unreadable or unparseable copies yield `None`, which makes the
    /// conversation a download candidate.
    pub async fn local_update_time(&self, conversation_id: &str) -> Option<f64> {
        let detail = match self.read_detail(conversation_id).await {
            Ok(detail) => detail?,
            Err(e) => {
                warn!(conversation_id, error = %e, "ignoring unreadable local copy");
                return None;
            }
        };
        let raw = detail.get("update_time")?;
        serde_json::from_value::<Timestamp>(raw.clone())
            .ok()?
            .to_epoch_seconds()
    }

    /// Ids of every stored detail document, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory exists but cannot be read.
    pub async fn list_detail_ids(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.scope_root.join(CONVERSATIONS_DIR);
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Writes the summary index for this scope.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if serialization or the write fails.
    pub async fn write_summary_index<T: Serialize + ?Sized>(
        &self,
        summaries: &T,
    ) -> Result<(), StorageError> {
        write_json_atomic(&self.scope_root.join(SUMMARY_INDEX_FILE), summaries).await
    }

    /// Writes the run metadata document for this scope.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if serialization or the write fails.
    pub async fn write_run_metadata<T: Serialize + ?Sized>(
        &self,
        metadata: &T,
    ) -> Result<(), StorageError> {
        write_json_atomic(&self.scope_root.join(METADATA_FILE), metadata).await
    }

    /// Appends lines to this scope's `backup.log`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the log cannot be opened or written.
    pub async fn append_log(&self, lines: &[String]) -> Result<(), StorageError> {
        if lines.is_empty() {
            return Ok(());
        }
        let path = self.scope_root.join(LOG_FILE);
        ensure_parent(&path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        let mut buffer = String::new();
        for line in lines {
            buffer.push_str(line.trim_end());
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        file.flush().await.map_err(|e| StorageError::io(&path, e))
    }

    /// Writes a markdown transcript.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the id is unusable or the write fails.
    pub async fn write_markdown(
        &self,
        conversation_id: &str,
        markdown: &str,
    ) -> Result<PathBuf, StorageError> {
        let clean = sanitize_segment(conversation_id)
            .ok_or_else(|| StorageError::invalid_name(conversation_id))?;
        let path = self
            .scope_root
            .join(MARKDOWN_DIR)
            .join(format!("{clean}.md"));
        write_bytes_atomic(&path, markdown.as_bytes()).await?;
        Ok(path)
    }

    /// Stores for every project scope already present on disk, sorted by
    /// directory name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the projects directory exists but
    /// cannot be read.
    pub async fn existing_project_stores(&self) -> Result<Vec<Self>, StorageError> {
        let dir = self.output_root.join(PROJECTS_DIR);
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| StorageError::io(entry.path(), e))?
                .is_dir();
            if is_dir && let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        names.iter().map(|name| self.project(name)).collect()
    }

    /// Directory holding downloaded files.
    #[must_use]
    pub fn files_dir(&self) -> PathBuf {
        self.output_root.join(FILES_DIR)
    }

    /// Path of the persisted permanent-failure set.
    #[must_use]
    pub fn failed_files_path(&self) -> PathBuf {
        self.output_root.join(FAILED_FILES_FILE)
    }

    /// Whether `files/<file_id>/` already holds at least one complete
    /// regular file, at any depth. Leftover `.part` files do not count.
    pub async fn has_local_file(&self, file_id: &str) -> bool {
        let Some(clean) = sanitize_segment(file_id) else {
            return false;
        };
        let mut stack = vec![self.files_dir().join(clean)];
        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                match entry.file_type().await {
                    Ok(kind) if kind.is_file() => {
                        if !entry.file_name().to_string_lossy().ends_with(PART_SUFFIX) {
                            return true;
                        }
                    }
                    Ok(kind) if kind.is_dir() => stack.push(entry.path()),
                    _ => {}
                }
            }
        }
        false
    }

    /// Starts writing a downloaded file to `files/<file_id>/<relative_name>`.
    ///
    /// `relative_name` may contain subdirectories; each segment is
    /// sanitized. When nothing usable is left the file id is used as the name.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the id is unusable or the file cannot
    /// be created.
    pub async fn create_file(
        &self,
        file_id: &str,
        relative_name: &str,
    ) -> Result<PartialFile, StorageError> {
        let clean_id = sanitize_segment(file_id).ok_or_else(|| StorageError::invalid_name(file_id))?;
        let mut path = self.files_dir().join(&clean_id);
        let segments = sanitize_relative_path(relative_name);
        if segments.is_empty() {
            path.push(&clean_id);
        } else {
            path.extend(segments);
        }
        PartialFile::create(path).await
    }
}

/// Reads and parses a JSON document, or `None` when the file is absent.
///
/// # Errors
///
/// Returns a [`StorageError`] if the file exists but cannot be read or parsed.
pub async fn read_json_if_exists<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::json(path, e))
}

/// Serializes `value` as pretty JSON and writes it atomically.
///
/// # Errors
///
/// Returns a [`StorageError`] if serialization or the write fails.
pub async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StorageError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::json(path, e))?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes).await
}

/// Writes through a sibling temporary file, then renames it into place.
async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    ensure_parent(path).await?;
    let tmp_path = part_path(path);
    fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| StorageError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StorageError::io(path, e))
}

fn part_path(path: &Path) -> PathBuf {
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(PART_SUFFIX);
    path.with_file_name(tmp_name)
}

async fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }
    Ok(())
}
