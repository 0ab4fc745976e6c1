//! Two-step file download: resolve a short-lived URL, then fetch the bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiClient, ApiError, FILE_STEP_MAX_RETRIES, RetryPolicy};
use crate::download::{BatchAborted, BatchObserver, DownloadEngine, ItemFailure, ItemOutcome};
use crate::storage::ConversationStore;

use super::denylist::PermanentFailureSet;
use super::extractor::FileReference;
use super::FileError;

/// Outcome of one file-materialization run.
///
/// `downloaded + skipped + failed == total`. References excluded by the
/// permanent-failure set are counted in `excluded` only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileDownloadResult {
    /// Files fetched and written in this run.
    pub downloaded: usize,
    /// Files already present locally.
    pub skipped: usize,
    /// Files that failed in this run.
    pub failed: usize,
    /// Files attempted in this run.
    pub total: usize,
    /// References dropped before the batch because they failed previously.
    pub excluded: usize,
    /// Ids that failed in this run.
    pub failed_file_ids: Vec<String>,
    /// Failure details.
    pub errors: Vec<ItemFailure>,
}

/// Downloads referenced files into the store's `files/` directory.
#[derive(Debug, Clone)]
pub struct FileMaterializer {
    client: ApiClient,
    store: ConversationStore,
    engine: DownloadEngine,
    step_policy: RetryPolicy,
}

impl FileMaterializer {
    /// Creates a materializer. Both protocol steps use the client's retry
    /// policy reduced to a single retry.
    #[must_use]
    pub fn new(client: ApiClient, store: ConversationStore, engine: DownloadEngine) -> Self {
        let step_policy = client.retry_policy().reduced_to(FILE_STEP_MAX_RETRIES);
        Self {
            client,
            store,
            engine,
            step_policy,
        }
    }

    /// Materializes `references`, skipping denylisted ids and files already
    /// on disk.
    ///
    /// Ids whose failure is permanent (the server refused, had no URL, or the
    /// transfer failed) are added to the permanent-failure set, which is
    /// persisted once at the end. Local storage failures are reported but
    /// not remembered, so the next run tries those files again.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Storage`] if the permanent-failure document
    /// cannot be loaded or persisted. A rejected credential on either step
    /// stops the phase and is returned as-is; permanent failures recorded
    /// before it are still persisted. Other per-file failures are reported
    /// in the result instead.
    #[instrument(skip_all, fields(references = references.len()))]
    pub async fn run(
        &self,
        references: Vec<FileReference>,
        observer: Option<&dyn BatchObserver>,
    ) -> Result<FileDownloadResult, FileError> {
        let mut denylist = PermanentFailureSet::load(self.store.failed_files_path()).await?;

        let (excluded, batch): (Vec<_>, Vec<_>) = references
            .into_iter()
            .partition(|reference| denylist.contains(&reference.file_id));
        if !excluded.is_empty() {
            info!(
                excluded = excluded.len(),
                "skipping files that failed in a previous run"
            );
        }

        let shared = Arc::new(self.clone());
        let outcome = self
            .engine
            .run(
                batch,
                |reference| {
                    let materializer = Arc::clone(&shared);
                    async move { materializer.materialize(&reference).await }
                },
                observer,
            )
            .await;

        let stats = match outcome {
            Ok(stats) => stats,
            Err(BatchAborted {
                item_id,
                error,
                stats,
            }) => {
                warn!(file_id = %item_id, error = %error, "file phase stopped");
                remember_permanent(&mut denylist, stats.errors());
                denylist.persist().await?;
                return Err(error);
            }
        };

        remember_permanent(&mut denylist, stats.errors());
        denylist.persist().await?;

        Ok(FileDownloadResult {
            downloaded: stats.downloaded(),
            skipped: stats.skipped(),
            failed: stats.failed(),
            total: stats.total(),
            excluded: excluded.len(),
            failed_file_ids: stats.errors().iter().map(|f| f.item_id.clone()).collect(),
            errors: stats.errors().to_vec(),
        })
    }

    async fn materialize(&self, reference: &FileReference) -> Result<ItemOutcome, FileError> {
        let file_id = reference.file_id.as_str();
        if self.store.has_local_file(file_id).await {
            debug!(file_id, "file already present");
            return Ok(ItemOutcome::Skipped);
        }

        let info = self
            .client
            .file_download_info(file_id, &self.step_policy)
            .await
            .map_err(FileError::resolve)?;
        let url = match info.download_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => {
                return Err(FileError::no_download_url(
                    info.error_code.or(info.status),
                ));
            }
        };

        let response = self
            .client
            .open_download(&url, &self.step_policy)
            .await
            .map_err(FileError::fetch)?;

        let name = info
            .file_name
            .as_deref()
            .or(reference.filename.as_deref())
            .unwrap_or(file_id);
        let mut file = self.store.create_file(file_id, name).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let written = match chunk {
                Ok(chunk) => file.write_chunk(&chunk).await.map_err(FileError::from),
                Err(e) => Err(FileError::fetch(ApiError::transport(&url, e.to_string()))),
            };
            if let Err(error) = written {
                file.discard().await;
                return Err(error);
            }
        }
        let bytes = file.bytes_written();
        let path = file.commit().await?;
        debug!(file_id, path = %path.display(), bytes, "file written");
        Ok(ItemOutcome::Downloaded)
    }
}

fn remember_permanent(denylist: &mut PermanentFailureSet, failures: &[ItemFailure]) {
    let added = denylist.record(
        failures
            .iter()
            .filter(|failure| failure.permanent)
            .map(|failure| failure.item_id.clone()),
    );
    if added > 0 {
        warn!(added, "recording permanently failed files");
    }
}

/// Groups failures by message: one line per distinct message, listing the
/// affected ids in the order they failed.
#[must_use]
pub fn group_errors_by_message(errors: &[ItemFailure]) -> Vec<String> {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for failure in errors {
        groups
            .entry(failure.message.as_str())
            .or_default()
            .push(failure.item_id.as_str());
    }
    groups
        .into_iter()
        .map(|(message, ids)| format!("{message} ({}): {}", ids.len(), ids.join(", ")))
        .collect()
}
