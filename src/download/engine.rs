//! Bounded-concurrency batch engine.
//!
//! The engine runs a worker over every item of a batch with at most
//! `concurrency` workers in flight. An ordinary failure is collected into
//! [`DownloadStats`] with its message and the batch keeps going. A failure
//! whose [`BatchError::is_fatal`] is true stops the batch: nothing further
//! is started, in-flight workers are cancelled and the error comes back as
//! [`BatchAborted`].
//!
//! # Example
//!
//! ```no_run
//! use chat_backup_core::download::{DownloadEngine, ItemOutcome};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::new(10, Duration::ZERO)?;
//! let ids = vec!["a".to_string(), "b".to_string()];
//! let stats = engine
//!     .run(ids, |_id| async move { Ok::<_, String>(ItemOutcome::Downloaded) }, None)
//!     .await
//!     .map_err(|aborted| aborted.error)?;
//! println!("downloaded {}, failed {}", stats.downloaded(), stats.failed());
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Error type for engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Something the engine can schedule. The id is used in failure reports.
pub trait WorkItem: Send + 'static {
    /// Stable identifier for this item.
    fn item_id(&self) -> &str;
}

impl WorkItem for String {
    fn item_id(&self) -> &str {
        self
    }
}

/// Error a worker returns for one item.
pub trait BatchError: fmt::Display + Send + 'static {
    /// Whether this failure stops the whole batch.
    fn is_fatal(&self) -> bool {
        false
    }

    /// Whether the failure lies with the item itself, so trying it again in
    /// a later run will not help.
    fn is_permanent(&self) -> bool {
        true
    }
}

impl BatchError for String {}

/// How a successful worker finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The item was fetched and written.
    Downloaded,
    /// The item was already up to date locally.
    Skipped,
}

/// A single failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Identifier of the failed item.
    pub item_id: String,
    /// Human-readable failure message.
    pub message: String,
    /// See [`BatchError::is_permanent`]. Panics are never permanent.
    pub permanent: bool,
}

/// A fatal item failure that stopped a batch.
#[derive(Debug)]
pub struct BatchAborted<E> {
    /// The item whose failure stopped the batch.
    pub item_id: String,
    /// The fatal error.
    pub error: E,
    /// Totals for the items that finished before the stop.
    pub stats: DownloadStats,
}

enum Finished<E> {
    Done(ItemOutcome),
    Failed(E),
    Panicked(String),
}

/// Receives progress notifications while a batch runs.
///
/// Both callbacks are invoked from the engine's scheduling loop, one at a
/// time, in completion order.
pub trait BatchObserver: Send + Sync {
    /// Called after each item finishes, with a monotonically increasing count.
    fn on_progress(&self, _completed: usize, _total: usize) {}

    /// Called once per failed item.
    fn on_failure(&self, _item_id: &str, _message: &str) {}
}

/// Totals from one batch run.
///
/// `downloaded + skipped + failed == total` once [`DownloadEngine::run`]
/// returns `Ok`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    total: usize,
    downloaded: usize,
    skipped: usize,
    failed: usize,
    errors: Vec<ItemFailure>,
}

impl DownloadStats {
    /// Creates stats for a batch of `total` items with zero counts.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Number of items in the batch.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of items fetched and written.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded
    }

    /// Number of items skipped as already current.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of items that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Number of items that have finished in any way.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }

    /// Failure details, in completion order.
    #[must_use]
    pub fn errors(&self) -> &[ItemFailure] {
        &self.errors
    }

    fn record_outcome(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Downloaded => self.downloaded += 1,
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }

    fn record_failure(&mut self, failure: ItemFailure) {
        self.failed += 1;
        self.errors.push(failure);
    }
}

/// Runs a worker over a batch with bounded parallelism.
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    concurrency: usize,
    item_delay: Duration,
}

impl DownloadEngine {
    /// Creates an engine.
    ///
    /// `item_delay` is slept after each item is started, so consecutive
    /// starts are spaced at least that far apart.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug")]
    pub fn new(concurrency: usize, item_delay: Duration) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }
        debug!(
            concurrency,
            item_delay_ms = item_delay.as_millis(),
            "creating download engine"
        );
        Ok(Self {
            concurrency,
            item_delay,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the delay applied after each item start.
    #[must_use]
    pub fn item_delay(&self) -> Duration {
        self.item_delay
    }

    /// Processes every item, returning once all of them have finished.
    ///
    /// A worker that returns a non-fatal error or panics is recorded as a
    /// failure and the rest of the batch keeps going.
    ///
    /// # Errors
    ///
    /// Returns [`BatchAborted`] as soon as a worker returns an error whose
    /// [`BatchError::is_fatal`] is true. Workers still in flight are
    /// cancelled and pending items are never started.
    #[instrument(skip_all, fields(total = items.len(), concurrency = self.concurrency))]
    pub async fn run<T, W, Fut, E>(
        &self,
        items: Vec<T>,
        worker: W,
        observer: Option<&dyn BatchObserver>,
    ) -> Result<DownloadStats, BatchAborted<E>>
    where
        T: WorkItem,
        W: Fn(T) -> Fut,
        Fut: Future<Output = Result<ItemOutcome, E>> + Send + 'static,
        E: BatchError,
    {
        let total = items.len();
        let mut stats = DownloadStats::new(total);
        let mut pending = items.into_iter();
        let mut in_flight: JoinSet<(String, Finished<E>)> = JoinSet::new();

        info!("starting batch");

        loop {
            while in_flight.len() < self.concurrency {
                let Some(item) = pending.next() else {
                    break;
                };
                let item_id = item.item_id().to_string();
                let work = AssertUnwindSafe(worker(item)).catch_unwind();
                in_flight.spawn(async move {
                    let finished = match work.await {
                        Ok(Ok(outcome)) => Finished::Done(outcome),
                        Ok(Err(error)) => Finished::Failed(error),
                        Err(panic) => Finished::Panicked(panic_message(&*panic)),
                    };
                    (item_id, finished)
                });
                if !self.item_delay.is_zero() {
                    tokio::time::sleep(self.item_delay).await;
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (item_id, finished) = match joined {
                Ok(finished) => finished,
                Err(join_error) => {
                    warn!(error = %join_error, "worker task ended abnormally");
                    (
                        "<unknown>".to_string(),
                        Finished::Panicked(format!("task failed: {join_error}")),
                    )
                }
            };

            let failure = match finished {
                Finished::Done(outcome) => {
                    stats.record_outcome(outcome);
                    None
                }
                Finished::Failed(error) if error.is_fatal() => {
                    warn!(item_id = %item_id, error = %error, "fatal failure, stopping batch");
                    if let Some(observer) = observer {
                        observer.on_failure(&item_id, &error.to_string());
                    }
                    in_flight.shutdown().await;
                    return Err(BatchAborted {
                        item_id,
                        error,
                        stats,
                    });
                }
                Finished::Failed(error) => Some(ItemFailure {
                    permanent: error.is_permanent(),
                    message: error.to_string(),
                    item_id,
                }),
                Finished::Panicked(message) => Some(ItemFailure {
                    item_id,
                    message,
                    permanent: false,
                }),
            };

            if let Some(failure) = failure {
                warn!(item_id = %failure.item_id, error = %failure.message, "item failed");
                if let Some(observer) = observer {
                    observer.on_failure(&failure.item_id, &failure.message);
                }
                stats.record_failure(failure);
            }
            if let Some(observer) = observer {
                observer.on_progress(stats.completed(), total);
            }
        }

        info!(
            downloaded = stats.downloaded(),
            skipped = stats.skipped(),
            failed = stats.failed(),
            total,
            "batch complete"
        );
        Ok(stats)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}
