//! Wire types returned by the conversation API.
//!
//! Only the fields the backup engine reads are typed; detail documents are
//! persisted from their raw JSON so nothing the server sends is lost.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timestamp::Timestamp;

/// Lightweight listing record for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation identifier.
    pub id: String,
    /// Display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Creation time.
    #[serde(default)]
    pub create_time: Option<Timestamp>,
    /// Last update time, compared against the local copy in incremental mode.
    #[serde(default)]
    pub update_time: Option<Timestamp>,
    /// Whether the conversation is archived.
    #[serde(default)]
    pub is_archived: Option<bool>,
}

/// One page of an offset-paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct OffsetPage<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total items the server reports for the whole listing.
    #[serde(default)]
    pub total: Option<usize>,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct CursorPage<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Opaque cursor for the next page; absent on the last page.
    #[serde(default)]
    pub cursor: Option<String>,
}

/// A named sub-collection of conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    /// Project identifier used in API paths.
    pub id: String,
    /// Display name; becomes the project's storage directory after sanitizing.
    pub name: String,
}

/// Full conversation record including the message graph.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationDetail {
    /// Conversation identifier. Some responses only carry `conversation_id`.
    #[serde(default, alias = "conversation_id")]
    pub id: String,
    /// Display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Creation time.
    #[serde(default)]
    pub create_time: Option<Timestamp>,
    /// Last update time.
    #[serde(default)]
    pub update_time: Option<Timestamp>,
    /// Node id to message node.
    #[serde(default)]
    pub mapping: HashMap<String, MessageNode>,
    /// Leaf of the active branch, when the server marks one.
    #[serde(default)]
    pub current_node: Option<String>,
}

/// One node of the message graph.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageNode {
    /// Node identifier.
    #[serde(default)]
    pub id: String,
    /// The message carried by this node; structural nodes have none.
    #[serde(default)]
    pub message: Option<Message>,
    /// Parent node id; `None` for the root.
    #[serde(default)]
    pub parent: Option<String>,
    /// Child node ids, in the order the server recorded them.
    #[serde(default)]
    pub children: Vec<String>,
}

/// A single message.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Message identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Who produced the message.
    #[serde(default)]
    pub author: Option<Author>,
    /// When the message was created.
    #[serde(default)]
    pub create_time: Option<Timestamp>,
    /// Message body.
    #[serde(default)]
    pub content: Option<MessageContent>,
    /// Free-form metadata; attachments and citations live here.
    #[serde(default)]
    pub metadata: MessageMetadata,
}

/// Message author.
#[derive(Debug, Clone, Deserialize)]
pub struct Author {
    /// Role such as `user`, `assistant`, `tool` or `system`.
    pub role: String,
}

/// Message body. Parts are either plain strings or typed objects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageContent {
    /// Content type such as `text` or `multimodal_text`.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Body parts.
    #[serde(default)]
    pub parts: Vec<Value>,
    /// Single text body used by some content types (code, execution output).
    #[serde(default)]
    pub text: Option<String>,
}

/// Message metadata fields the file scanner reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageMetadata {
    /// Uploaded attachments.
    #[serde(default)]
    pub attachments: Vec<AttachmentEntry>,
    /// Citations, some of which point at uploaded files.
    #[serde(default)]
    pub citations: Vec<CitationEntry>,
}

/// An uploaded attachment.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentEntry {
    /// File identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Original filename.
    #[serde(default)]
    pub name: Option<String>,
}

/// A citation entry. File details may sit on the entry or in a nested `metadata` object.
#[derive(Debug, Clone, Deserialize)]
pub struct CitationEntry {
    /// File identifier on the entry itself.
    #[serde(default)]
    pub file_id: Option<String>,
    /// Title on the entry itself.
    #[serde(default)]
    pub title: Option<String>,
    /// Nested metadata object.
    #[serde(default)]
    pub metadata: Option<CitationMetadata>,
}

/// Nested citation metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct CitationMetadata {
    /// File identifier.
    #[serde(default)]
    pub file_id: Option<String>,
    /// Title.
    #[serde(default)]
    pub title: Option<String>,
}

/// Short-lived download metadata for a file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileDownloadInfo {
    /// Server status string, e.g. `success` or `error`.
    #[serde(default)]
    pub status: Option<String>,
    /// Signed URL to fetch the bytes from.
    #[serde(default)]
    pub download_url: Option<String>,
    /// Server-side filename.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Error code reported instead of a URL.
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Structural problem in a message graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A node names a parent that is not in the mapping.
    #[error("node {node} references missing parent {parent}")]
    MissingParent {
        /// Offending node.
        node: String,
        /// Parent id that does not resolve.
        parent: String,
    },
    /// The mapping has no root or more than one.
    #[error("message graph has {count} roots, expected 1")]
    RootCount {
        /// Number of parentless nodes.
        count: usize,
    },
    /// Following parents from a node never reaches the root.
    #[error("message graph has a cycle through node {node}")]
    Cycle {
        /// A node on the cycle.
        node: String,
    },
}

impl ConversationDetail {
    /// Checks the tree invariants: resolvable parents, a single root, no cycles.
    ///
    /// An empty mapping is valid.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError`] found.
    pub fn validate_graph(&self) -> Result<(), GraphError> {
        if self.mapping.is_empty() {
            return Ok(());
        }

        let mut roots = 0usize;
        for (key, node) in &self.mapping {
            match &node.parent {
                Some(parent) if !self.mapping.contains_key(parent) => {
                    return Err(GraphError::MissingParent {
                        node: key.clone(),
                        parent: parent.clone(),
                    });
                }
                Some(_) => {}
                None => roots += 1,
            }
        }
        if roots != 1 {
            return Err(GraphError::RootCount { count: roots });
        }

        let mut reaches_root: HashSet<&str> = HashSet::new();
        for start in self.mapping.keys() {
            let mut path: HashSet<&str> = HashSet::new();
            let mut cursor = start.as_str();
            loop {
                if reaches_root.contains(cursor) {
                    break;
                }
                if !path.insert(cursor) {
                    return Err(GraphError::Cycle {
                        node: cursor.to_string(),
                    });
                }
                match self.mapping.get(cursor).and_then(|n| n.parent.as_deref()) {
                    Some(parent) => cursor = parent,
                    None => break,
                }
            }
            reaches_root.extend(path);
        }

        Ok(())
    }

    /// Returns the root node id, if the mapping has exactly one parentless node.
    #[must_use]
    pub fn root_id(&self) -> Option<&str> {
        let mut roots = self
            .mapping
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(key, _)| key.as_str());
        let root = roots.next()?;
        roots.next().is_none().then_some(root)
    }

    /// Returns node ids of the active branch, root first.
    ///
    /// With a `current_node` marker the branch is the marker's ancestry.
    /// Without one, the walk starts at the root and always takes the first
    /// recorded child, so upstream child reordering changes the result.
    #[must_use]
    pub fn active_branch(&self) -> Vec<&str> {
        if let Some(current) = self.current_node.as_deref()
            && self.mapping.contains_key(current)
        {
            let mut branch = Vec::new();
            let mut cursor = Some(current);
            while let Some(id) = cursor {
                if branch.contains(&id) || branch.len() > self.mapping.len() {
                    break;
                }
                branch.push(id);
                cursor = self.mapping.get(id).and_then(|n| n.parent.as_deref());
            }
            branch.reverse();
            return branch;
        }

        let mut branch = Vec::new();
        let mut cursor = self.root_id();
        while let Some(id) = cursor {
            if branch.contains(&id) {
                break;
            }
            branch.push(id);
            cursor = self
                .mapping
                .get(id)
                .and_then(|n| n.children.first())
                .map(String::as_str)
                .filter(|child| self.mapping.contains_key(*child));
        }
        branch
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn detail(value: Value) -> ConversationDetail {
        serde_json::from_value(value).unwrap()
    }

    fn linear_graph() -> Value {
        json!({
            "id": "c1",
            "mapping": {
                "root": {"id": "root", "parent": null, "children": ["a"]},
                "a": {"id": "a", "parent": "root", "children": ["b", "c"]},
                "b": {"id": "b", "parent": "a", "children": []},
                "c": {"id": "c", "parent": "a", "children": []}
            }
        })
    }

    #[test]
    fn test_summary_accepts_numeric_and_string_times() {
        let summary: ConversationSummary = serde_json::from_value(json!({
            "id": "c1",
            "title": "Hello",
            "create_time": "2024-01-01T00:00:00Z",
            "update_time": 1_704_067_200.5
        }))
        .unwrap();
        assert_eq!(summary.id, "c1");
        assert_eq!(summary.update_time, Some(Timestamp::Seconds(1_704_067_200.5)));
    }

    #[test]
    fn test_detail_accepts_conversation_id_alias() {
        let parsed = detail(json!({"conversation_id": "c9", "mapping": {}}));
        assert_eq!(parsed.id, "c9");
    }

    #[test]
    fn test_validate_graph_accepts_tree() {
        assert!(detail(linear_graph()).validate_graph().is_ok());
    }

    #[test]
    fn test_validate_graph_rejects_missing_parent() {
        let parsed = detail(json!({
            "id": "c1",
            "mapping": {
                "root": {"parent": null, "children": []},
                "x": {"parent": "ghost", "children": []}
            }
        }));
        assert!(matches!(
            parsed.validate_graph(),
            Err(GraphError::MissingParent { .. })
        ));
    }

    #[test]
    fn test_validate_graph_rejects_cycle() {
        let parsed = detail(json!({
            "id": "c1",
            "mapping": {
                "root": {"parent": null, "children": []},
                "a": {"parent": "b", "children": ["b"]},
                "b": {"parent": "a", "children": ["a"]}
            }
        }));
        assert!(matches!(parsed.validate_graph(), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_validate_graph_rejects_two_roots() {
        let parsed = detail(json!({
            "id": "c1",
            "mapping": {
                "r1": {"parent": null},
                "r2": {"parent": null}
            }
        }));
        assert_eq!(
            parsed.validate_graph(),
            Err(GraphError::RootCount { count: 2 })
        );
    }

    #[test]
    fn test_active_branch_follows_current_node() {
        let mut value = linear_graph();
        value["current_node"] = json!("c");
        assert_eq!(detail(value).active_branch(), vec!["root", "a", "c"]);
    }

    #[test]
    fn test_active_branch_falls_back_to_first_child() {
        assert_eq!(detail(linear_graph()).active_branch(), vec!["root", "a", "b"]);
    }

    #[test]
    fn test_active_branch_ignores_unknown_marker() {
        let mut value = linear_graph();
        value["current_node"] = json!("nope");
        assert_eq!(detail(value).active_branch(), vec!["root", "a", "b"]);
    }

    #[test]
    fn test_file_download_info_tolerates_missing_url() {
        let info: FileDownloadInfo =
            serde_json::from_value(json!({"status": "error", "error_code": "file_not_found"}))
                .unwrap();
        assert!(info.download_url.is_none());
        assert_eq!(info.error_code.as_deref(), Some("file_not_found"));
    }
}
