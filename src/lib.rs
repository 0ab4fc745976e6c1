//! Chat Backup Core Library
//!
//! This library backs up a user's remote conversation history, and the
//! files those conversations reference, into a local directory. Runs are
//! incremental: conversations whose stored copy is current are skipped, and
//! files that failed permanently are remembered and not retried.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`api`] - HTTP client, error taxonomy, retry/backoff policy, wire types
//! - [`listing`] - Lazy offset- and cursor-paginated listings
//! - [`download`] - Bounded-concurrency batch engine
//! - [`backup`] - Per-collection backup runs with incremental skip
//! - [`files`] - File-reference extraction and two-step file downloads
//! - [`storage`] - On-disk layout and atomic writes
//! - [`export`] - Markdown transcripts
//! - [`timestamp`] - Epoch/ISO timestamp normalization

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod backup;
pub mod download;
pub mod export;
pub mod files;
pub mod listing;
pub mod storage;
pub mod timestamp;

// Re-export commonly used types
pub use api::{ApiClient, ApiError, DEFAULT_MAX_RETRIES, FailureType, RetryPolicy, classify_error};
pub use backup::{BackupEngine, BackupError, BackupOptions, BackupRunResult, Collection};
pub use download::{DEFAULT_CONCURRENCY, DownloadEngine, DownloadStats, EngineError};
pub use files::{FileDownloadResult, FileMaterializer, FileReference, PermanentFailureSet};
pub use storage::{ConversationStore, StorageError};
