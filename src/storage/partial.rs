//! Streamed file writes that only appear under their final name once
//! complete.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use super::{StorageError, ensure_parent, part_path};

/// A file being written chunk by chunk into a sibling `.part` file.
///
/// Nothing exists under the final name until [`PartialFile::commit`]
/// renames the `.part` file into place. [`PartialFile::discard`] removes it.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl PartialFile {
    pub(super) async fn create(path: PathBuf) -> Result<Self, StorageError> {
        ensure_parent(&path).await?;
        let tmp_path = part_path(&path);
        let file = File::create(&tmp_path)
            .await
            .map_err(|e| StorageError::io(&tmp_path, e))?;
        Ok(Self {
            path,
            tmp_path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// The path the file will have once committed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Appends one chunk.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the write fails.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| StorageError::io(&self.tmp_path, e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flushes and renames the file into place, returning its final path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the flush or rename fails. The `.part`
    /// file is left behind in that case; it never counts as a local copy.
    pub async fn commit(self) -> Result<PathBuf, StorageError> {
        let Self {
            path,
            tmp_path,
            mut writer,
            ..
        } = self;
        writer
            .flush()
            .await
            .map_err(|e| StorageError::io(&tmp_path, e))?;
        drop(writer);
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(path)
    }

    /// Drops the unfinished file.
    pub async fn discard(self) {
        let Self {
            tmp_path, writer, ..
        } = self;
        drop(writer);
        if let Err(e) = fs::remove_file(&tmp_path).await {
            debug!(path = %tmp_path.display(), error = %e, "could not remove partial file");
        }
    }
}
