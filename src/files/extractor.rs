//! File-reference discovery inside conversation message graphs.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::types::{ConversationDetail, Message};
use crate::download::WorkItem;
use crate::storage::ConversationStore;

use super::FileError;

/// Content-part type that carries an inline asset pointer.
pub const IMAGE_ASSET_POINTER: &str = "image_asset_pointer";

/// Scheme prefixes stripped from asset pointers to get the file id.
pub const ASSET_POINTER_PREFIXES: [&str; 2] = ["file-service://", "sediment://"];

/// Where in a message a file reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// An inline image asset pointer in the content parts.
    AssetPointer,
    /// An entry of the message's attachment metadata.
    Attachment,
    /// An entry of the message's citation metadata.
    Citation,
}

/// A binary asset referenced by a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReference {
    /// Remote file identifier.
    pub file_id: String,
    /// Display name recorded alongside the reference, if any.
    pub filename: Option<String>,
    /// Which scan discovered it.
    pub provenance: Provenance,
}

impl WorkItem for FileReference {
    fn item_id(&self) -> &str {
        &self.file_id
    }
}

/// Deduplicating, insertion-ordered collection of file references.
#[derive(Debug, Clone, Default)]
pub struct FileReferenceSet {
    seen: HashSet<String>,
    references: Vec<FileReference>,
}

impl FileReferenceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reference unless its file id is already present.
    ///
    /// Returns true if it was added.
    pub fn insert(&mut self, reference: FileReference) -> bool {
        if self.seen.insert(reference.file_id.clone()) {
            self.references.push(reference);
            true
        } else {
            false
        }
    }

    /// Number of distinct file ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Whether a file id is present.
    #[must_use]
    pub fn contains(&self, file_id: &str) -> bool {
        self.seen.contains(file_id)
    }

    /// Iterates in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &FileReference> {
        self.references.iter()
    }

    /// Consumes the set, returning references in first-seen order.
    #[must_use]
    pub fn into_vec(self) -> Vec<FileReference> {
        self.references
    }
}

impl Extend<FileReference> for FileReferenceSet {
    fn extend<I: IntoIterator<Item = FileReference>>(&mut self, iter: I) {
        for reference in iter {
            self.insert(reference);
        }
    }
}

/// Extracts every distinct file reference from one conversation.
///
/// Asset pointers are scanned first, then attachments, then citations; nodes
/// are visited in id order. The first occurrence of a file id wins.
#[must_use]
pub fn extract_file_references(detail: &ConversationDetail) -> Vec<FileReference> {
    let mut node_ids: Vec<&String> = detail.mapping.keys().collect();
    node_ids.sort();
    let messages: Vec<&Message> = node_ids
        .into_iter()
        .filter_map(|id| detail.mapping.get(id)?.message.as_ref())
        .collect();

    let mut set = FileReferenceSet::new();
    for message in &messages {
        set.extend(asset_pointer_references(message));
    }
    for message in &messages {
        set.extend(attachment_references(message));
    }
    for message in &messages {
        set.extend(citation_references(message));
    }
    set.into_vec()
}

fn asset_pointer_references(message: &Message) -> impl Iterator<Item = FileReference> + '_ {
    message
        .content
        .iter()
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| {
            let part = part.as_object()?;
            if part.get("content_type").and_then(Value::as_str) != Some(IMAGE_ASSET_POINTER) {
                return None;
            }
            let pointer = part.get("asset_pointer").and_then(Value::as_str)?;
            let file_id = strip_asset_prefix(pointer)?;
            Some(FileReference {
                file_id: file_id.to_string(),
                filename: None,
                provenance: Provenance::AssetPointer,
            })
        })
}

fn strip_asset_prefix(pointer: &str) -> Option<&str> {
    ASSET_POINTER_PREFIXES
        .iter()
        .find_map(|prefix| pointer.strip_prefix(prefix))
        .filter(|id| !id.trim().is_empty())
}

fn attachment_references(message: &Message) -> impl Iterator<Item = FileReference> + '_ {
    message.metadata.attachments.iter().filter_map(|entry| {
        let file_id = non_empty(entry.id.as_deref())?;
        Some(FileReference {
            file_id: file_id.to_string(),
            filename: non_empty(entry.name.as_deref()).map(str::to_string),
            provenance: Provenance::Attachment,
        })
    })
}

fn citation_references(message: &Message) -> impl Iterator<Item = FileReference> + '_ {
    message.metadata.citations.iter().filter_map(|entry| {
        let (file_id, title) = match &entry.metadata {
            Some(nested) => (nested.file_id.as_deref(), nested.title.as_deref()),
            None => (entry.file_id.as_deref(), entry.title.as_deref()),
        };
        let file_id = non_empty(file_id)?;
        Some(FileReference {
            file_id: file_id.to_string(),
            filename: non_empty(title).map(str::to_string),
            provenance: Provenance::Citation,
        })
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Scans every stored conversation in `stores` and returns the distinct
/// file references, deduplicated across all of them.
///
/// Stored documents that no longer parse are logged and skipped.
///
/// # Errors
///
/// Returns [`FileError::Storage`] if a conversation directory or document
/// cannot be read.
pub async fn collect_store_references(
    stores: &[ConversationStore],
) -> Result<FileReferenceSet, FileError> {
    let mut set = FileReferenceSet::new();
    for store in stores {
        let ids = store.list_detail_ids().await?;
        let mut scanned = 0usize;
        for id in ids {
            let Some(raw) = store.read_detail(&id).await? else {
                continue;
            };
            match serde_json::from_value::<ConversationDetail>(raw) {
                Ok(detail) => {
                    set.extend(extract_file_references(&detail));
                    scanned += 1;
                }
                Err(e) => {
                    warn!(conversation_id = %id, error = %e, "skipping unparseable stored conversation");
                }
            }
        }
        debug!(
            scope = %store.scope_root().display(),
            scanned,
            references = set.len(),
            "scanned stored conversations"
        );
    }
    Ok(set)
}
