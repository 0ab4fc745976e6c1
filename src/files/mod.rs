//! Discovery and download of files referenced by stored conversations.
//!
//! [`extract_file_references`] scans one conversation; [`collect_store_references`]
//! scans every stored conversation of one or more scopes and deduplicates
//! the result. [`FileMaterializer`] then downloads each file through the
//! two-step resolve/fetch protocol, remembering failures in a
//! [`PermanentFailureSet`] so they are not retried on later runs.

mod denylist;
mod extractor;
mod materializer;

use thiserror::Error;

use crate::api::ApiError;
use crate::download::BatchError;
use crate::storage::StorageError;

pub use denylist::PermanentFailureSet;
pub use extractor::{
    ASSET_POINTER_PREFIXES, FileReference, FileReferenceSet, IMAGE_ASSET_POINTER, Provenance,
    collect_store_references, extract_file_references,
};
pub use materializer::{FileDownloadResult, FileMaterializer, group_errors_by_message};

/// Errors from the file subsystem.
///
/// Messages never include the file id; it travels alongside in
/// [`crate::download::ItemFailure`] and failures are grouped by message.
#[derive(Debug, Error)]
pub enum FileError {
    /// Resolving the download URL failed.
    #[error("resolve step failed: {}", .0.reason())]
    Resolve(#[source] ApiError),

    /// The resolve step answered without a usable URL.
    #[error("no download URL{}", detail_suffix(.0))]
    NoDownloadUrl(Option<String>),

    /// Fetching the resolved URL failed.
    #[error("fetch step failed: {}", .0.reason())]
    Fetch(#[source] ApiError),

    /// Reading or writing local state failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) if !detail.is_empty() => format!(" ({detail})"),
        _ => String::new(),
    }
}

impl FileError {
    /// Wraps a resolve-step API error.
    #[must_use]
    pub fn resolve(source: ApiError) -> Self {
        Self::Resolve(source)
    }

    /// Wraps a fetch-step API error.
    #[must_use]
    pub fn fetch(source: ApiError) -> Self {
        Self::Fetch(source)
    }

    /// Creates a missing-URL error with the server's status or error code.
    #[must_use]
    pub fn no_download_url(detail: Option<String>) -> Self {
        Self::NoDownloadUrl(detail)
    }

    /// Returns true when either protocol step was refused for the credential.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        match self {
            Self::Resolve(source) | Self::Fetch(source) => source.is_authentication(),
            Self::NoDownloadUrl(_) | Self::Storage(_) => false,
        }
    }
}

/// A rejected credential stops the file phase. Local storage failures say
/// nothing about the file, so only the remote failures are permanent.
impl BatchError for FileError {
    fn is_fatal(&self) -> bool {
        self.is_authentication()
    }

    fn is_permanent(&self) -> bool {
        !matches!(self, Self::Storage(_)) && !self.is_authentication()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_omit_file_id() {
        let error = FileError::resolve(ApiError::http_status(
            "files/file-123/download",
            404,
            "Not Found",
        ));
        assert_eq!(error.to_string(), "resolve step failed: HTTP 404: Not Found");
        assert!(!error.to_string().contains("file-123"));
    }

    #[test]
    fn test_no_download_url_display() {
        assert_eq!(
            FileError::no_download_url(Some("file_expired".to_string())).to_string(),
            "no download URL (file_expired)"
        );
        assert_eq!(FileError::no_download_url(None).to_string(), "no download URL");
    }

    #[test]
    fn test_rejected_credential_is_fatal_not_permanent() {
        let error = FileError::resolve(ApiError::authentication("files/f1/download", 401));
        assert!(error.is_authentication());
        assert!(error.is_fatal());
        assert!(!error.is_permanent());

        let error = FileError::fetch(ApiError::authentication("blob", 403));
        assert!(error.is_fatal());
    }

    #[test]
    fn test_storage_failure_is_not_permanent() {
        let error = FileError::from(StorageError::io(
            "files/f1",
            std::io::Error::other("disk full"),
        ));
        assert!(!error.is_fatal());
        assert!(!error.is_permanent());
    }

    #[test]
    fn test_remote_failures_are_permanent() {
        assert!(FileError::no_download_url(None).is_permanent());
        assert!(
            FileError::resolve(ApiError::http_status("files/f1/download", 404, "Not Found"))
                .is_permanent()
        );
        assert!(FileError::fetch(ApiError::transport("blob", "reset")).is_permanent());
    }
}
