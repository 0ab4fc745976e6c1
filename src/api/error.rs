//! Error types for remote API calls.
//!
//! Every network-facing operation in the crate fails with an [`ApiError`].
//! The variants form the error taxonomy that [`classify_error`](super::classify_error)
//! maps onto retry decisions.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the conversation API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The credential was rejected (HTTP 401/403). Never retried.
    #[error("[AUTH] credential rejected (HTTP {status}) calling {endpoint}")]
    Authentication {
        /// The endpoint that rejected the request.
        endpoint: String,
        /// The HTTP status code (401 or 403).
        status: u16,
    },

    /// The server asked us to slow down (HTTP 429).
    #[error("rate limited calling {endpoint}")]
    RateLimited {
        /// The endpoint that was rate limited.
        endpoint: String,
        /// Server-suggested wait parsed from the Retry-After header, if present.
        retry_after: Option<Duration>,
    },

    /// Transport failure or a non-success HTTP status.
    ///
    /// `status` is `None` when no response was received (DNS, connect, timeout).
    #[error("{}", network_message(.endpoint, .status, .message))]
    Network {
        /// The endpoint or URL that failed.
        endpoint: String,
        /// HTTP status code, when a response was received.
        status: Option<u16>,
        /// Short description of the failure.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {endpoint}: {message}")]
    Validation {
        /// The endpoint whose response failed to decode.
        endpoint: String,
        /// Decoder message.
        message: String,
    },
}

fn network_message(endpoint: &str, status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("HTTP {status} calling {endpoint}: {message}"),
        None => format!("network error calling {endpoint}: {message}"),
    }
}

impl ApiError {
    /// Creates an authentication error.
    pub fn authentication(endpoint: impl Into<String>, status: u16) -> Self {
        Self::Authentication {
            endpoint: endpoint.into(),
            status,
        }
    }

    /// Creates a rate-limit error with an optional Retry-After hint.
    pub fn rate_limited(endpoint: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            endpoint: endpoint.into(),
            retry_after,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(endpoint: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Creates a transport error (no HTTP response received).
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Creates a response-shape validation error.
    pub fn validation(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Returns true for credential rejections.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns true when the remote resource is gone (HTTP 404/410).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Network {
                status: Some(404 | 410),
                ..
            }
        )
    }

    /// Describes the failure without naming the endpoint, so identical
    /// failures on different resources read the same.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Authentication { status, .. } => format!("credential rejected (HTTP {status})"),
            Self::RateLimited { .. } => "rate limited".to_string(),
            Self::Network {
                status: Some(status),
                message,
                ..
            } => format!("HTTP {status}: {message}"),
            Self::Network {
                status: None,
                message,
                ..
            } => format!("network error: {message}"),
            Self::Validation { message, .. } => format!("unexpected response: {message}"),
        }
    }

    /// Returns the Retry-After hint carried by a rate-limit error.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
