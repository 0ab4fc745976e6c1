//! HTTP client for the conversation API.
//!
//! [`ApiClient`] owns a pooled `reqwest` client, the API base URL and the
//! bearer credential. Every call runs through a [`RetryPolicy`]; typed helpers
//! decode responses and turn shape mismatches into [`ApiError::Validation`].

use std::time::{Duration, SystemTime};

use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use super::retry::{MAX_RETRY_AFTER, RetryPolicy};
use super::types::{ConversationSummary, CursorPage, FileDownloadInfo, OffsetPage, ProjectSummary};
use super::ApiError;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes, for large attachments).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Retry budget for the per-file resolve and fetch steps.
pub const FILE_STEP_MAX_RETRIES: u32 = 1;

/// Client for the conversation API.
///
/// Cheap to clone: clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    /// Creates a client with default timeouts.
    ///
    /// `base_url` is the API root; endpoints are resolved relative to it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when `base_url` does not parse, or a
    /// transport error when the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        retry_policy: RetryPolicy,
    ) -> Result<Self, ApiError> {
        Self::with_timeouts(
            base_url,
            token,
            retry_policy,
            CONNECT_TIMEOUT_SECS,
            READ_TIMEOUT_SECS,
        )
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    #[instrument(level = "debug", skip(token, retry_policy))]
    pub fn with_timeouts(
        base_url: &str,
        token: Option<String>,
        retry_policy: RetryPolicy,
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(base_url)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .user_agent(concat!("chat-backup/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(|e| ApiError::transport(base_url.as_str(), e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
            retry_policy,
        })
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the default retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Calls `endpoint` with the default retry policy and returns the parsed JSON body.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] once the retry policy gives up.
    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        self.call_with_policy(endpoint, method, body, &self.retry_policy)
            .await
    }

    /// Calls `endpoint` under an explicit retry policy.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] once `policy` gives up.
    #[instrument(skip(self, body, policy), fields(max_retries = policy.max_retries()))]
    pub async fn call_with_policy(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
        policy: &RetryPolicy,
    ) -> Result<Value, ApiError> {
        policy
            .execute(|| self.send_json_once(endpoint, method.clone(), body))
            .await
    }

    /// GETs `endpoint` and decodes it into `T`.
    ///
    /// # Errors
    ///
    /// Network failures as for [`call`](Self::call); a body that does not match
    /// `T` is an [`ApiError::Validation`] and is not retried.
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.get_json_with_policy(endpoint, &self.retry_policy)
            .await
    }

    /// GETs `endpoint` under an explicit retry policy and decodes it into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`get_json`](Self::get_json).
    pub async fn get_json_with_policy<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        policy: &RetryPolicy,
    ) -> Result<T, ApiError> {
        let value = self
            .call_with_policy(endpoint, Method::GET, None, policy)
            .await?;
        decode(endpoint, value)
    }

    /// Opens `url` (absolute, or relative to the API base) for a streamed
    /// download and returns the response once its status is successful.
    ///
    /// Only the request is retried under `policy`. The caller reads the body
    /// with [`Response::bytes_stream`], so a body that breaks mid-transfer is
    /// not retried. The credential is only attached when `url` shares the
    /// API's origin.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] once `policy` gives up.
    #[instrument(skip(self, policy))]
    pub async fn open_download(&self, url: &str, policy: &RetryPolicy) -> Result<Response, ApiError> {
        let target = self.resolve(url)?;
        let with_credential = target.origin() == self.base_url.origin();
        policy
            .execute(|| {
                self.send_once(target.clone(), Method::GET, None, with_credential, url)
            })
            .await
    }

    // ==================== Endpoints ====================

    /// Fetches one page of the default conversation listing.
    ///
    /// # Errors
    ///
    /// See [`get_json`](Self::get_json).
    pub async fn conversations_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<OffsetPage<ConversationSummary>, ApiError> {
        self.get_json(&format!(
            "conversations?offset={offset}&limit={limit}&order=updated"
        ))
        .await
    }

    /// Fetches one page of a project's conversation listing.
    ///
    /// # Errors
    ///
    /// See [`get_json`](Self::get_json).
    pub async fn project_conversations_page(
        &self,
        project_id: &str,
        cursor: Option<&str>,
    ) -> Result<CursorPage<ConversationSummary>, ApiError> {
        let endpoint = with_cursor(
            &format!("projects/{}/conversations", urlencoding::encode(project_id)),
            cursor,
        );
        self.get_json(&endpoint).await
    }

    /// Fetches one page of the project listing.
    ///
    /// # Errors
    ///
    /// See [`get_json`](Self::get_json).
    pub async fn projects_page(
        &self,
        cursor: Option<&str>,
    ) -> Result<CursorPage<ProjectSummary>, ApiError> {
        self.get_json(&with_cursor("projects", cursor)).await
    }

    /// Fetches a conversation's full detail document as raw JSON.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn conversation(&self, id: &str) -> Result<Value, ApiError> {
        let endpoint = format!("conversation/{}", urlencoding::encode(id));
        self.call(&endpoint, Method::GET, None).await
    }

    /// Resolves short-lived download metadata for a file.
    ///
    /// # Errors
    ///
    /// See [`get_json_with_policy`](Self::get_json_with_policy).
    pub async fn file_download_info(
        &self,
        file_id: &str,
        policy: &RetryPolicy,
    ) -> Result<FileDownloadInfo, ApiError> {
        let endpoint = format!("files/{}/download", urlencoding::encode(file_id));
        self.get_json_with_policy(&endpoint, policy).await
    }

    // ==================== Transport ====================

    fn resolve(&self, endpoint: &str) -> Result<Url, ApiError> {
        match Url::parse(endpoint) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .join(endpoint.trim_start_matches('/'))
                .map_err(|e| ApiError::validation(endpoint, format!("invalid endpoint: {e}"))),
            Err(e) => Err(ApiError::validation(endpoint, format!("invalid URL: {e}"))),
        }
    }

    async fn send_json_once(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = self.resolve(endpoint)?;
        let response = self.send_once(url, method, body, true, endpoint).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::transport(endpoint, e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ApiError::validation(endpoint, e.to_string()))
    }

    async fn send_once(
        &self,
        url: Url,
        method: Method,
        body: Option<&Value>,
        with_credential: bool,
        label: &str,
    ) -> Result<Response, ApiError> {
        let mut request = self.client.request(method, url);
        if with_credential && let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(endpoint = label, "sending request");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::transport(label, "request timed out")
            } else {
                ApiError::transport(label, e.to_string())
            }
        })?;

        check_status(label, response)
    }
}

fn check_status(label: &str, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ApiError::authentication(label, status.as_u16()))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            Err(ApiError::rate_limited(label, retry_after))
        }
        other => Err(ApiError::http_status(
            label,
            other.as_u16(),
            other.canonical_reason().unwrap_or("unexpected status"),
        )),
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::validation(endpoint, e.to_string()))
}

fn with_cursor(path: &str, cursor: Option<&str>) -> String {
    match cursor {
        Some(cursor) => format!("{path}?cursor={}", urlencoding::encode(cursor)),
        None => path.to_string(),
    }
}

fn normalize_base_url(raw: &str) -> Result<Url, ApiError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|e| ApiError::validation(raw, format!("invalid base URL: {e}")))
}

/// Parses a Retry-After header value (delay-seconds or HTTP-date).
///
/// Values above one hour are capped; negative or past values yield `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        return match datetime.duration_since(SystemTime::now()) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            Err(_) => None,
        };
    }

    warn!(value = header_value, "unparseable Retry-After header");
    None
}
