//! Markdown transcript of a conversation's active branch.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;

use crate::api::types::{ConversationDetail, Message};
use crate::timestamp::epoch_seconds;

const UNTITLED: &str = "Untitled conversation";

/// Renders the active branch of `detail` as markdown.
///
/// Nodes without a message, and messages with no renderable content, are
/// left out.
#[must_use]
pub fn render_markdown(detail: &ConversationDetail) -> String {
    let mut out = String::new();
    let title = detail
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED);
    let _ = writeln!(out, "# {title}\n");
    let _ = writeln!(out, "- Conversation: `{}`", detail.id);
    if let Some(created) = format_time(epoch_seconds(detail.create_time.as_ref())) {
        let _ = writeln!(out, "- Created: {created}");
    }
    if let Some(updated) = format_time(epoch_seconds(detail.update_time.as_ref())) {
        let _ = writeln!(out, "- Updated: {updated}");
    }

    for node_id in detail.active_branch() {
        let Some(message) = detail
            .mapping
            .get(node_id)
            .and_then(|node| node.message.as_ref())
        else {
            continue;
        };
        let body = message_body(message);
        if body.is_empty() {
            continue;
        }
        let _ = write!(out, "\n## {}\n\n{body}\n", role_heading(message));
    }
    out
}

fn role_heading(message: &Message) -> String {
    let role = message
        .author
        .as_ref()
        .map_or("unknown", |author| author.role.as_str());
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Unknown".to_string(),
    }
}

fn message_body(message: &Message) -> String {
    let Some(content) = &message.content else {
        return String::new();
    };
    let mut blocks: Vec<String> = content.parts.iter().filter_map(part_text).collect();
    if blocks.is_empty()
        && let Some(text) = content.text.as_deref()
    {
        blocks.push(text.to_string());
    }
    blocks
        .into_iter()
        .map(|block| block.trim().to_string())
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn part_text(part: &Value) -> Option<String> {
    match part {
        Value::String(text) => Some(text.clone()),
        Value::Object(object) => {
            if let Some(pointer) = object.get("asset_pointer").and_then(Value::as_str) {
                return Some(format!("[asset: {pointer}]"));
            }
            object.get("text").and_then(Value::as_str).map(str::to_string)
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_time(seconds: Option<f64>) -> Option<String> {
    let seconds = seconds?;
    let whole = seconds.floor() as i64;
    let nanos = ((seconds - seconds.floor()) * 1e9) as u32;
    DateTime::from_timestamp(whole, nanos).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}
