//! Run-level errors for the backup engine.

use thiserror::Error;

use crate::api::ApiError;
use crate::api::types::GraphError;
use crate::download::BatchError;
use crate::files::FileError;
use crate::storage::StorageError;

/// Why one conversation could not be backed up.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Fetching the detail document failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The detail document does not have the expected shape.
    #[error("unexpected conversation shape: {0}")]
    Shape(#[source] serde_json::Error),

    /// The message graph breaks the tree invariants.
    #[error("invalid message graph: {0}")]
    Graph(#[source] GraphError),

    /// The document could not be written locally.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ConversationError {
    /// Returns true when the API refused the credential.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Api(source) if source.is_authentication())
    }
}

/// A rejected credential will be rejected for every remaining conversation
/// too, so it stops the batch.
impl BatchError for ConversationError {
    fn is_fatal(&self) -> bool {
        self.is_authentication()
    }

    fn is_permanent(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Conditions that abort a whole backup run.
///
/// Ordinary per-conversation failures never surface here; they are counted
/// in [`BackupRunResult`](super::BackupRunResult).
#[derive(Debug, Error)]
pub enum BackupError {
    /// The conversation listing for a collection could not be completed.
    #[error("listing {collection} failed: {source}")]
    Listing {
        /// Label of the collection being listed.
        collection: String,
        /// The error that ended the listing.
        #[source]
        source: ApiError,
    },

    /// The project listing could not be completed.
    #[error("project discovery failed: {source}")]
    ProjectDiscovery {
        /// The error that ended the listing.
        #[source]
        source: ApiError,
    },

    /// A conversation failed in a way that stops the batch.
    #[error("backing up {collection} stopped at conversation {conversation_id}: {source}")]
    Interrupted {
        /// Label of the collection being backed up.
        collection: String,
        /// The conversation whose failure stopped the batch.
        conversation_id: String,
        /// The fatal failure.
        #[source]
        source: ConversationError,
    },

    /// Local state could not be read or written.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The file phase could not load or persist its state, or a file step
    /// was refused for the credential.
    #[error(transparent)]
    Files(#[from] FileError),
}

impl BackupError {
    /// Creates a listing error.
    pub fn listing(collection: impl Into<String>, source: ApiError) -> Self {
        Self::Listing {
            collection: collection.into(),
            source,
        }
    }

    /// Creates a project-discovery error.
    #[must_use]
    pub fn project_discovery(source: ApiError) -> Self {
        Self::ProjectDiscovery { source }
    }

    /// Creates an interrupted-batch error.
    pub fn interrupted(
        collection: impl Into<String>,
        conversation_id: impl Into<String>,
        source: ConversationError,
    ) -> Self {
        Self::Interrupted {
            collection: collection.into(),
            conversation_id: conversation_id.into(),
            source,
        }
    }

    /// Returns true when the run was aborted by a rejected credential.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        match self {
            Self::Listing { source, .. } | Self::ProjectDiscovery { source } => {
                source.is_authentication()
            }
            Self::Interrupted { source, .. } => source.is_authentication(),
            Self::Files(source) => source.is_authentication(),
            Self::Storage(_) => false,
        }
    }
}
