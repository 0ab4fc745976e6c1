//! Progress bars for listing and download phases.

use std::sync::Arc;

use chat_backup_core::download::BatchObserver;
use chat_backup_core::listing::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

/// Owns the progress bars of a run. When disabled every bar is hidden.
pub(crate) struct ProgressReporter {
    enabled: bool,
    listing: ProgressBar,
}

impl ProgressReporter {
    pub(crate) fn new(enabled: bool) -> Self {
        let listing = if enabled {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg}: listed {pos}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { enabled, listing }
    }

    /// Callback for the paginated listings.
    pub(crate) fn listing_callback(&self) -> ProgressCallback {
        let bar = self.listing.clone();
        Arc::new(move |fetched, total| {
            bar.set_length(total as u64);
            bar.set_position(fetched as u64);
        })
    }

    /// Resets the listing spinner for a new collection.
    pub(crate) fn begin_listing(&self, label: &str) {
        self.listing.reset();
        self.listing.set_message(label.to_string());
    }

    /// Clears the listing spinner once the listing is done.
    pub(crate) fn end_listing(&self) {
        self.listing.finish_and_clear();
    }

    /// Creates a bar for one download batch.
    pub(crate) fn batch(&self, label: &str) -> BatchProgress {
        let bar = if self.enabled {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar.set_message(label.to_string());
            bar
        } else {
            ProgressBar::hidden()
        };
        BatchProgress { bar }
    }
}

/// Batch observer that drives one progress bar.
pub(crate) struct BatchProgress {
    bar: ProgressBar,
}

impl BatchProgress {
    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchObserver for BatchProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(completed as u64);
    }

    fn on_failure(&self, item_id: &str, _message: &str) {
        self.bar.set_message(format!("last failure: {item_id}"));
    }
}
