//! Backup engine: list a collection, diff against local state, fetch what
//! changed.
//!
//! One [`BackupEngine::run`] handles one [`Collection`]: the default
//! conversation list or a single project. Each run lists every summary,
//! skips conversations whose stored copy is at least as new as the remote
//! one (incremental mode), fetches the rest through the bounded
//! [`DownloadEngine`], and finally writes the summary index, the run
//! metadata and the run log for that collection.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use chat_backup_core::api::{ApiClient, RetryPolicy};
//! use chat_backup_core::backup::{BackupEngine, BackupOptions, Collection};
//! use chat_backup_core::download::DownloadEngine;
//! use chat_backup_core::storage::ConversationStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new("https://chat.example.com/backend-api/", None, RetryPolicy::default())?;
//! let engine = BackupEngine::new(
//!     client,
//!     ConversationStore::new("./backup"),
//!     DownloadEngine::new(10, Duration::ZERO)?,
//!     BackupOptions::default(),
//! );
//! let result = engine.run(&Collection::Default, None).await?;
//! println!("{} downloaded, {} skipped", result.downloaded, result.skipped);
//! # Ok(())
//! # }
//! ```

mod error;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures_util::TryStreamExt;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiClient, ApiError, ConversationDetail, ConversationSummary};
use crate::download::{BatchObserver, DownloadEngine, ItemFailure, ItemOutcome};
use crate::export::render_markdown;
use crate::files::{FileDownloadResult, FileMaterializer, collect_store_references};
use crate::listing::{self, ListingOptions};
use crate::storage::{ConversationStore, sanitize_project_name, sanitize_segment};
use crate::timestamp::epoch_seconds;

pub use error::{BackupError, ConversationError};

/// A set of conversations backed up together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Collection {
    /// The account's main conversation list.
    Default,
    /// Conversations filed under one project.
    Project {
        /// Remote project id.
        id: String,
        /// Display name.
        name: String,
        /// Folder under `projects/` that holds this project's output.
        dir: String,
    },
}

impl Collection {
    /// Creates a project collection, deriving its folder from the name.
    pub fn project(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let name = name.into();
        let dir = project_dir_name(&name, &id);
        Self::Project { id, name, dir }
    }

    /// Short label for logs and messages.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Default => "default collection".to_string(),
            Self::Project { name, .. } => format!("project '{name}'"),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Folder name for a project: the sanitized name, or the sanitized id when
/// the name has no usable characters.
#[must_use]
pub fn project_dir_name(name: &str, id: &str) -> String {
    let sanitized = sanitize_project_name(name);
    if !sanitized.is_empty() {
        return sanitized;
    }
    sanitize_segment(id).unwrap_or_else(|| "project".to_string())
}

/// Tunables for a backup run.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Skip conversations whose local copy is current.
    pub incremental: bool,
    /// Also write a markdown transcript per fetched conversation.
    pub markdown: bool,
    /// Pagination settings for the summary listing.
    pub listing: ListingOptions,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            incremental: true,
            markdown: false,
            listing: ListingOptions::default(),
        }
    }
}

/// Outcome of one collection run.
///
/// `total_items == downloaded + skipped + failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRunResult {
    /// The collection that was backed up.
    pub collection: Collection,
    /// Distinct conversations listed remotely.
    pub total_items: usize,
    /// Conversations fetched and written.
    pub downloaded: usize,
    /// Conversations whose local copy was current.
    pub skipped: usize,
    /// Conversations that could not be fetched or stored.
    pub failed: usize,
    /// Per-conversation failure messages.
    pub errors: Vec<ItemFailure>,
}

/// Document written to `metadata.json` after each run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunMetadata {
    /// The collection that was backed up.
    pub collection: Collection,
    /// RFC 3339 start time.
    pub started_at: String,
    /// RFC 3339 finish time.
    pub finished_at: String,
    /// Whether unchanged conversations were skipped.
    pub incremental: bool,
    /// Distinct conversations listed remotely.
    pub total: usize,
    /// Conversations fetched and written.
    pub downloaded: usize,
    /// Conversations whose local copy was current.
    pub skipped: usize,
    /// Conversations that failed.
    pub failed: usize,
}

/// Incremental skip rule: skip only when both timestamps are known and the
/// local copy is at least as new as the remote summary.
#[must_use]
pub fn should_skip(local_update_time: Option<f64>, remote_update_time: Option<f64>) -> bool {
    matches!(
        (local_update_time, remote_update_time),
        (Some(local), Some(remote)) if local >= remote
    )
}

/// Backs up collections into a [`ConversationStore`].
#[derive(Debug, Clone)]
pub struct BackupEngine {
    client: ApiClient,
    store: ConversationStore,
    engine: DownloadEngine,
    options: BackupOptions,
}

struct DetailFetcher {
    client: ApiClient,
    store: ConversationStore,
    markdown: bool,
}

impl DetailFetcher {
    async fn fetch(&self, conversation_id: &str) -> Result<ItemOutcome, ConversationError> {
        let raw = self.client.conversation(conversation_id).await?;
        let detail: ConversationDetail =
            serde_json::from_value(raw.clone()).map_err(ConversationError::Shape)?;
        detail.validate_graph().map_err(ConversationError::Graph)?;

        self.store.write_detail(conversation_id, &raw).await?;
        if self.markdown {
            self.store
                .write_markdown(conversation_id, &render_markdown(&detail))
                .await?;
        }
        debug!(conversation_id, "conversation stored");
        Ok(ItemOutcome::Downloaded)
    }
}

impl BackupEngine {
    /// Creates a backup engine writing under `store`'s output root.
    #[must_use]
    pub fn new(
        client: ApiClient,
        store: ConversationStore,
        engine: DownloadEngine,
        options: BackupOptions,
    ) -> Self {
        Self {
            client,
            store,
            engine,
            options,
        }
    }

    /// The store for the default collection.
    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// The store a collection writes into.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Storage`] if the project folder name is unusable.
    pub fn scope_store(&self, collection: &Collection) -> Result<ConversationStore, BackupError> {
        match collection {
            Collection::Default => Ok(self.store.clone()),
            Collection::Project { dir, .. } => Ok(self.store.project(dir)?),
        }
    }

    /// Backs up one collection.
    ///
    /// Item failures are counted in the result. A failed listing, a
    /// credential rejected mid-batch or an unwritable output directory
    /// aborts the run.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Listing`] if the summaries cannot be listed,
    /// [`BackupError::Interrupted`] if a conversation fetch is refused for
    /// the credential, and [`BackupError::Storage`] if the collection's
    /// output cannot be written.
    #[instrument(skip(self, collection, observer), fields(collection = %collection))]
    pub async fn run(
        &self,
        collection: &Collection,
        observer: Option<&dyn BatchObserver>,
    ) -> Result<BackupRunResult, BackupError> {
        let started_at = now_rfc3339();
        let store = self.scope_store(collection)?;
        store.initialize().await?;

        let summaries = self
            .list(collection)
            .await
            .map_err(|e| BackupError::listing(collection.label(), e))?;
        let summaries = dedupe_summaries(summaries);

        let mut to_fetch = Vec::new();
        let mut skipped_current = 0usize;
        for summary in &summaries {
            let current = self.options.incremental
                && should_skip(
                    store.local_update_time(&summary.id).await,
                    epoch_seconds(summary.update_time.as_ref()),
                );
            if current {
                skipped_current += 1;
            } else {
                to_fetch.push(summary.id.clone());
            }
        }
        info!(
            listed = summaries.len(),
            to_fetch = to_fetch.len(),
            skipped = skipped_current,
            incremental = self.options.incremental,
            "collection listed"
        );

        let fetcher = Arc::new(DetailFetcher {
            client: self.client.clone(),
            store: store.clone(),
            markdown: self.options.markdown,
        });
        let stats = self
            .engine
            .run(
                to_fetch,
                |conversation_id| {
                    let fetcher = Arc::clone(&fetcher);
                    async move { fetcher.fetch(&conversation_id).await }
                },
                observer,
            )
            .await
            .map_err(|aborted| {
                warn!(conversation_id = %aborted.item_id, "backup stopped");
                BackupError::interrupted(collection.label(), aborted.item_id, aborted.error)
            })?;

        let result = BackupRunResult {
            collection: collection.clone(),
            total_items: summaries.len(),
            downloaded: stats.downloaded(),
            skipped: stats.skipped() + skipped_current,
            failed: stats.failed(),
            errors: stats.errors().to_vec(),
        };

        let finished_at = now_rfc3339();
        store.write_summary_index(&summaries).await?;
        store
            .write_run_metadata(&RunMetadata {
                collection: collection.clone(),
                started_at,
                finished_at: finished_at.clone(),
                incremental: self.options.incremental,
                total: result.total_items,
                downloaded: result.downloaded,
                skipped: result.skipped,
                failed: result.failed,
            })
            .await?;
        store.append_log(&log_lines(&result, &finished_at)).await?;

        info!(
            total = result.total_items,
            downloaded = result.downloaded,
            skipped = result.skipped,
            failed = result.failed,
            "collection backup complete"
        );
        Ok(result)
    }

    /// Lists every project as a [`Collection`], giving each a distinct folder.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::ProjectDiscovery`] if the listing fails.
    pub async fn discover_projects(&self) -> Result<Vec<Collection>, BackupError> {
        let projects: Vec<_> = listing::projects(self.client.clone(), self.options.listing.clone())
            .try_collect()
            .await
            .map_err(BackupError::project_discovery)?;

        let mut seen_ids = HashSet::new();
        let mut used_dirs = HashSet::new();
        let mut collections = Vec::with_capacity(projects.len());
        for project in projects {
            if !seen_ids.insert(project.id.clone()) {
                continue;
            }
            let mut collection = Collection::project(project.id, project.name);
            if let Collection::Project { id, dir, .. } = &mut collection
                && !used_dirs.insert(dir.clone())
            {
                let suffix = sanitize_segment(id).unwrap_or_default();
                *dir = format!("{dir}-{suffix}");
                used_dirs.insert(dir.clone());
            }
            collections.push(collection);
        }
        info!(projects = collections.len(), "projects discovered");
        Ok(collections)
    }

    /// Downloads every file referenced by stored conversations of the
    /// default collection and of every project folder on disk.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Files`] if stored conversations or the
    /// permanent-failure document cannot be read or written, or if a file
    /// step is refused for the credential.
    pub async fn materialize_files(
        &self,
        observer: Option<&dyn BatchObserver>,
    ) -> Result<FileDownloadResult, BackupError> {
        let mut stores = vec![self.store.clone()];
        stores.extend(self.store.existing_project_stores().await?);
        let references = collect_store_references(&stores).await?;
        info!(
            scopes = stores.len(),
            references = references.len(),
            "file references collected"
        );

        let materializer =
            FileMaterializer::new(self.client.clone(), self.store.clone(), self.engine.clone());
        let result = materializer.run(references.into_vec(), observer).await?;
        if result.failed > 0 {
            warn!(failed = result.failed, "some files could not be downloaded");
        }
        Ok(result)
    }

    async fn list(&self, collection: &Collection) -> Result<Vec<ConversationSummary>, ApiError> {
        let options = self.options.listing.clone();
        match collection {
            Collection::Default => {
                listing::conversation_summaries(self.client.clone(), options)
                    .try_collect()
                    .await
            }
            Collection::Project { id, .. } => {
                listing::project_summaries(self.client.clone(), id.clone(), options)
                    .try_collect()
                    .await
            }
        }
    }
}

/// Keeps the first summary seen for each id.
fn dedupe_summaries(summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
    let mut seen = HashSet::new();
    summaries
        .into_iter()
        .filter(|summary| seen.insert(summary.id.clone()))
        .collect()
}

fn log_lines(result: &BackupRunResult, timestamp: &str) -> Vec<String> {
    let mut lines: Vec<String> = result
        .errors
        .iter()
        .map(|failure| {
            format!(
                "{timestamp} FAILED {}: {}",
                failure.item_id, failure.message
            )
        })
        .collect();
    lines.push(format!(
        "{timestamp} RUN {}: total={} downloaded={} skipped={} failed={}",
        result.collection,
        result.total_items,
        result.downloaded,
        result.skipped,
        result.failed
    ));
    lines
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;

    // ==================== Skip Rule Tests ====================

    #[test]
    fn test_skip_when_local_is_as_new_as_iso_remote() {
        let remote = Timestamp::from("1970-01-01T00:01:40.000Z").to_epoch_seconds();
        assert!(should_skip(Some(100.0), remote));
    }

    #[test]
    fn test_download_when_remote_is_newer() {
        assert!(!should_skip(Some(100.0), Some(150.0)));
    }

    #[test]
    fn test_skip_when_local_is_newer() {
        assert!(should_skip(Some(200.0), Some(150.0)));
    }

    #[test]
    fn test_unknown_timestamps_always_download() {
        assert!(!should_skip(None, Some(100.0)));
        assert!(!should_skip(Some(100.0), None));
        assert!(!should_skip(None, None));
    }

    // ==================== Collection Tests ====================

    #[test]
    fn test_project_dir_from_name() {
        let collection = Collection::project("g-p-1", "Tax Docs / 2024");
        assert_eq!(
            collection,
            Collection::Project {
                id: "g-p-1".to_string(),
                name: "Tax Docs / 2024".to_string(),
                dir: "Tax-Docs-2024".to_string(),
            }
        );
        assert_eq!(collection.label(), "project 'Tax Docs / 2024'");
    }

    #[test]
    fn test_project_dir_falls_back_to_id() {
        assert_eq!(project_dir_name("///", "g-p-9"), "g-p-9");
        assert_eq!(project_dir_name("", ".."), "project");
    }

    #[test]
    fn test_collection_serializes_with_kind() {
        let value = serde_json::to_value(Collection::Default).unwrap();
        assert_eq!(value, serde_json::json!({"kind": "default"}));
    }

    // ==================== Helper Tests ====================

    #[test]
    fn test_dedupe_keeps_first() {
        let summary = |id: &str, title: &str| ConversationSummary {
            id: id.to_string(),
            title: Some(title.to_string()),
            create_time: None,
            update_time: None,
            is_archived: None,
        };
        let deduped = dedupe_summaries(vec![
            summary("a", "first"),
            summary("b", "only"),
            summary("a", "second"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].title.as_deref(), Some("first"));
    }

    #[test]
    fn test_log_lines_include_failures_and_summary() {
        let result = BackupRunResult {
            collection: Collection::Default,
            total_items: 3,
            downloaded: 1,
            skipped: 1,
            failed: 1,
            errors: vec![ItemFailure {
                item_id: "c9".to_string(),
                message: "HTTP 500".to_string(),
                permanent: true,
            }],
        };
        let lines = log_lines(&result, "2024-01-01T00:00:00Z");
        assert_eq!(
            lines,
            vec![
                "2024-01-01T00:00:00Z FAILED c9: HTTP 500".to_string(),
                "2024-01-01T00:00:00Z RUN default collection: total=3 downloaded=1 skipped=1 failed=1"
                    .to_string(),
            ]
        );
    }
}
