//! Error types for the storage module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or writing backup output.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File system error.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be serialized or parsed.
    #[error("invalid JSON at {path}: {source}")]
    Json {
        /// The document path.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A remote-supplied name has no usable path characters.
    #[error("'{name}' cannot be used as a path segment")]
    InvalidName {
        /// The rejected name.
        name: String,
    },
}

impl StorageError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a JSON error.
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid-name error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display_includes_path() {
        let error = StorageError::io(
            "/out/conversations/c1.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = error.to_string();
        assert!(message.contains("/out/conversations/c1.json"));
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_invalid_name_display() {
        assert_eq!(
            StorageError::invalid_name("..").to_string(),
            "'..' cannot be used as a path segment"
        );
    }
}
