//! Error types shared across the engine.
//!
//! Three layers are distinguished:
//!
//! - [`StorageError`]: a cache backend failed. The scheduler logs these and
//!   treats them as a cache miss or a skipped store.
//! - [`DownloadError`]: a network dispatch failed. [`DownloadError::is_transient`]
//!   decides whether the failure feeds the retry path.
//! - [`SpiderError`]: everything surfaced to callers, including terminal request
//!   failures and startup misconfiguration.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by a [`CacheStorage`](crate::storage::CacheStorage) backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The storage root could not be created or opened.
    #[error("cannot open storage root {path:?}: {source}")]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode value: {0}")]
    Encode(String),

    #[error("failed to decode value: {0}")]
    Decode(String),

    #[error("storage database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<rmp_serde::encode::Error> for StorageError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        StorageError::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StorageError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        StorageError::Decode(err.to_string())
    }
}

/// Errors raised by a [`Downloader`](crate::downloader::Downloader).
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    /// The request could not be built or sent as specified. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl DownloadError {
    /// Whether the failure is worth retrying (DNS, connect, timeout, truncated body).
    pub fn is_transient(&self) -> bool {
        !matches!(self, DownloadError::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() || err.is_redirect() {
            DownloadError::InvalidRequest(err.to_string())
        } else if err.is_body() || err.is_decode() {
            DownloadError::Body(err.to_string())
        } else {
            DownloadError::Connect(err.to_string())
        }
    }
}

/// The crate-level error type.
#[derive(Debug, thiserror::Error)]
pub enum SpiderError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A retryable status kept coming back after every allowed retry.
    #[error("Retries exhausted for {url} (last status {status})")]
    RetriesExhausted { url: String, status: u16 },

    #[error("Too many redirects ({count}) for {url}")]
    TooManyRedirects { url: String, count: u32 },

    #[error("Invalid redirect location {location:?} from {url}")]
    InvalidRedirect { url: String, location: String },

    #[error("Middleware error: {0}")]
    MiddlewareError(String),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("General error: {0}")]
    GeneralError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_is_not_transient() {
        assert!(!DownloadError::InvalidRequest("bad header".into()).is_transient());
        assert!(DownloadError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(DownloadError::Connect("refused".into()).is_transient());
    }

    #[test]
    fn error_display_includes_context() {
        let err = SpiderError::RetriesExhausted {
            url: "http://example.com/a".into(),
            status: 503,
        };
        let msg = err.to_string();
        assert!(msg.contains("example.com/a"));
        assert!(msg.contains("503"));
    }
}
