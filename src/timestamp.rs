//! Timestamp normalization.
//!
//! The API reports times either as epoch seconds (`1700000000.123`) or as
//! date strings (`"2023-11-14T22:13:20.123Z"`). Both are normalized to epoch
//! seconds before comparison.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A timestamp as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Epoch seconds, possibly fractional.
    Seconds(f64),
    /// A date string, or a number encoded as a string.
    Text(String),
}

impl Timestamp {
    /// Returns the timestamp as epoch seconds, or `None` when it cannot be parsed.
    #[must_use]
    pub fn to_epoch_seconds(&self) -> Option<f64> {
        match self {
            Self::Seconds(seconds) if seconds.is_finite() => Some(*seconds),
            Self::Seconds(_) => None,
            Self::Text(text) => parse_text(text),
        }
    }
}

impl From<f64> for Timestamp {
    fn from(seconds: f64) -> Self {
        Self::Seconds(seconds)
    }
}

impl From<&str> for Timestamp {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

#[allow(clippy::cast_precision_loss)]
fn parse_text(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(seconds) = text.parse::<f64>() {
        return seconds.is_finite().then_some(seconds);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis() as f64 / 1000.0);
    }
    // Naive ISO strings without an offset are taken as UTC.
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis() as f64 / 1000.0)
}

/// Normalizes an optional timestamp to epoch seconds.
#[must_use]
pub fn epoch_seconds(timestamp: Option<&Timestamp>) -> Option<f64> {
    timestamp.and_then(Timestamp::to_epoch_seconds)
}
