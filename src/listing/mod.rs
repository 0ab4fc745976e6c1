//! Lazy paginated listings.
//!
//! Listings are exposed as `Stream`s that request the next page only once the
//! consumer has drained the previous one. Pages are fetched strictly in
//! sequence, so cursor and offset bookkeeping never race. Dropping a stream
//! stops further requests.
//!
//! Two pagination styles are supported:
//! - [`offset_stream`] walks `(offset, limit)` pages until `offset >= total`
//! - [`cursor_stream`] follows the opaque cursor until the server omits it
//!
//! # Example
//!
//! ```no_run
//! use futures_util::TryStreamExt;
//! use chat_backup_core::api::{ApiClient, RetryPolicy};
//! use chat_backup_core::listing::{ListingOptions, conversation_summaries};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new("https://chat.example.com/backend-api/", None, RetryPolicy::default())?;
//! let summaries: Vec<_> = conversation_summaries(client, ListingOptions::default())
//!     .try_collect()
//!     .await?;
//! println!("listed {}", summaries.len());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream, TryStreamExt};
use tracing::debug;

use crate::api::{ApiClient, ApiError, ConversationSummary, CursorPage, OffsetPage, ProjectSummary};

/// Largest page the server accepts; also the default page size.
pub const MAX_PAGE_SIZE: usize = 100;

/// Progress callback: `(items_fetched_so_far, total_known_or_fetched)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Options shared by both pagination styles.
#[derive(Clone)]
pub struct ListingOptions {
    /// Items requested per page (offset style only).
    pub page_size: usize,
    /// Pause before requesting each page after the first.
    pub page_delay: Duration,
    /// Called after every page.
    pub progress: Option<ProgressCallback>,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            page_delay: Duration::ZERO,
            progress: None,
        }
    }
}

impl fmt::Debug for ListingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListingOptions")
            .field("page_size", &self.page_size)
            .field("page_delay", &self.page_delay)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

struct OffsetState<F> {
    fetch: F,
    offset: usize,
    total: Option<usize>,
    fetched: usize,
    done: bool,
}

/// Streams items from an offset-paginated endpoint.
///
/// `fetch(offset, limit)` is called for each page in ascending order. The
/// walk ends when `offset` reaches the most recently reported total, when a
/// page comes back empty, or (with no total reported) on a short page.
pub fn offset_stream<T, F, Fut>(
    fetch: F,
    options: ListingOptions,
) -> impl Stream<Item = Result<T, ApiError>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<OffsetPage<T>, ApiError>>,
{
    let limit = options.page_size.clamp(1, MAX_PAGE_SIZE);
    let state = OffsetState {
        fetch,
        offset: 0,
        total: None,
        fetched: 0,
        done: false,
    };

    stream::try_unfold(state, move |mut state| {
        let page_delay = options.page_delay;
        let progress = options.progress.clone();
        async move {
            if state.done {
                return Ok(None);
            }
            if let Some(total) = state.total
                && state.offset >= total
            {
                return Ok(None);
            }
            if state.offset > 0 && !page_delay.is_zero() {
                tokio::time::sleep(page_delay).await;
            }

            let page = (state.fetch)(state.offset, limit).await?;
            let count = page.items.len();
            state.fetched += count;
            state.offset += count;
            if page.total.is_some() {
                state.total = page.total;
            }
            if count == 0 || (state.total.is_none() && count < limit) {
                state.done = true;
            }

            debug!(
                offset = state.offset,
                fetched = state.fetched,
                total = ?state.total,
                "fetched listing page"
            );
            if let Some(progress) = progress {
                progress(state.fetched, state.total.unwrap_or(0).max(state.fetched));
            }

            Ok::<_, ApiError>(Some((page.items, state)))
        }
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
}

struct CursorState<F> {
    fetch: F,
    cursor: Option<String>,
    started: bool,
    fetched: usize,
}

/// Streams items from a cursor-paginated endpoint.
///
/// `fetch(cursor)` receives `None` for the first page and the previous
/// page's cursor afterwards. The walk ends when a page carries no cursor.
pub fn cursor_stream<T, F, Fut>(
    fetch: F,
    options: ListingOptions,
) -> impl Stream<Item = Result<T, ApiError>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<CursorPage<T>, ApiError>>,
{
    let state = CursorState {
        fetch,
        cursor: None,
        started: false,
        fetched: 0,
    };

    stream::try_unfold(state, move |mut state| {
        let page_delay = options.page_delay;
        let progress = options.progress.clone();
        async move {
            if state.started && state.cursor.is_none() {
                return Ok(None);
            }
            if state.started && !page_delay.is_zero() {
                tokio::time::sleep(page_delay).await;
            }

            let page = (state.fetch)(state.cursor.take()).await?;
            state.started = true;
            state.fetched += page.items.len();
            state.cursor = page.cursor.filter(|c| !c.is_empty());

            debug!(
                fetched = state.fetched,
                has_more = state.cursor.is_some(),
                "fetched listing page"
            );
            if let Some(progress) = progress {
                progress(state.fetched, state.fetched);
            }

            Ok::<_, ApiError>(Some((page.items, state)))
        }
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
}

/// Streams every conversation summary of the default collection.
pub fn conversation_summaries(
    client: ApiClient,
    options: ListingOptions,
) -> impl Stream<Item = Result<ConversationSummary, ApiError>> {
    offset_stream(
        move |offset, limit| {
            let client = client.clone();
            async move { client.conversations_page(offset, limit).await }
        },
        options,
    )
}

/// Streams every conversation summary of one project.
pub fn project_summaries(
    client: ApiClient,
    project_id: String,
    options: ListingOptions,
) -> impl Stream<Item = Result<ConversationSummary, ApiError>> {
    cursor_stream(
        move |cursor| {
            let client = client.clone();
            let project_id = project_id.clone();
            async move {
                client
                    .project_conversations_page(&project_id, cursor.as_deref())
                    .await
            }
        },
        options,
    )
}

/// Streams every project.
pub fn projects(
    client: ApiClient,
    options: ListingOptions,
) -> impl Stream<Item = Result<ProjectSummary, ApiError>> {
    cursor_stream(
        move |cursor| {
            let client = client.clone();
            async move { client.projects_page(cursor.as_deref()).await }
        },
        options,
    )
}
