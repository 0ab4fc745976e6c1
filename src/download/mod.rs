//! Concurrent batch processing shared by the conversation and file phases.
//!
//! Both phases hand the engine a list of work items and an async worker;
//! the engine bounds parallelism, spaces item starts, and collects
//! per-item failures. Only a failure the worker marks fatal aborts the batch.

mod engine;

pub use engine::{
    BatchAborted, BatchError, BatchObserver, DEFAULT_CONCURRENCY, DownloadEngine, DownloadStats, EngineError, ItemFailure,
    ItemOutcome, MAX_CONCURRENCY, MIN_CONCURRENCY, WorkItem,
};
