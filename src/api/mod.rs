//! Remote API access: HTTP client, error taxonomy, retry policy and wire types.
//!
//! # Example
//!
//! ```no_run
//! use chat_backup_core::api::{ApiClient, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(
//!     "https://chat.example.com/backend-api/",
//!     Some("token".to_string()),
//!     RetryPolicy::default(),
//! )?;
//! let page = client.conversations_page(0, 100).await?;
//! println!("{} conversations", page.total.unwrap_or(page.items.len()));
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod retry;
pub mod types;

pub use client::{
    ApiClient, CONNECT_TIMEOUT_SECS, FILE_STEP_MAX_RETRIES, READ_TIMEOUT_SECS, parse_retry_after,
};
pub use error::ApiError;
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, MAX_RETRY_AFTER, RetryDecision, RetryObserver, RetryPolicy,
    classify_error,
};
pub use types::{
    ConversationDetail, ConversationSummary, CursorPage, FileDownloadInfo, OffsetPage,
    ProjectSummary,
};
