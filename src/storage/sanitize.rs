//! Path-segment sanitization for names that come from the remote API.

use std::path::{Component, Path};

/// Maximum length of a project folder name.
pub const MAX_PROJECT_FOLDER_CHARS: usize = 80;

/// Maximum length of a single stored file-name segment.
pub const MAX_SEGMENT_CHARS: usize = 200;

/// Collapses separators, whitespace and reserved characters in a project
/// name into single dashes.
#[must_use]
pub fn sanitize_project_name(name: &str) -> String {
    let mut sanitized = String::new();
    let mut previous_dash = false;

    for ch in name.trim().chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() || c.is_control() => '-',
            c => c,
        };

        if mapped == '-' {
            if !previous_dash {
                sanitized.push('-');
                previous_dash = true;
            }
        } else {
            sanitized.push(mapped);
            previous_dash = false;
        }
    }

    let mut sanitized = sanitized.trim_matches(['-', '.']).to_string();
    if is_windows_reserved_name(&sanitized) {
        sanitized.push_str("-project");
    }
    if sanitized.chars().count() > MAX_PROJECT_FOLDER_CHARS {
        sanitized = sanitized.chars().take(MAX_PROJECT_FOLDER_CHARS).collect();
        sanitized = sanitized.trim_matches('-').to_string();
    }
    sanitized
}

/// Sanitizes one path segment (an id or a file name).
///
/// Returns `None` when nothing usable is left, including for `.` and `..`.
#[must_use]
pub fn sanitize_segment(segment: &str) -> Option<String> {
    let trimmed = segment.trim();
    let mut sanitized: String = trimmed
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.chars().count() > MAX_SEGMENT_CHARS {
        sanitized = sanitized.chars().take(MAX_SEGMENT_CHARS).collect();
    }
    if sanitized.is_empty() || !is_plain_segment(&sanitized) {
        return None;
    }
    if is_windows_reserved_name(&sanitized) {
        sanitized.insert(0, '_');
    }
    Some(sanitized)
}

/// Sanitizes a relative path, keeping its directory structure.
///
/// Both `/` and `\` separate segments. Unusable segments are dropped.
#[must_use]
pub fn sanitize_relative_path(path: &str) -> Vec<String> {
    path.split(['/', '\\']).filter_map(sanitize_segment).collect()
}

fn is_plain_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Returns true if the name is a Windows reserved name (CON, PRN, AUX, NUL, COM1–9, LPT1–9).
#[must_use]
pub fn is_windows_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).to_uppercase();
    matches!(
        stem.as_str(),
        "CON"
            | "PRN"
            | "AUX"
            | "NUL"
            | "COM1"
            | "COM2"
            | "COM3"
            | "COM4"
            | "COM5"
            | "COM6"
            | "COM7"
            | "COM8"
            | "COM9"
            | "LPT1"
            | "LPT2"
            | "LPT3"
            | "LPT4"
            | "LPT5"
            | "LPT6"
            | "LPT7"
            | "LPT8"
            | "LPT9"
    )
}
