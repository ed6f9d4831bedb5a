//! The [`Response`] handed to response middleware and to the spider.

use crate::request::Request;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A response produced by a network fetch or synthesized from the cache.
#[derive(Debug, Clone)]
pub struct Response {
    /// The URL the response was served for.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Wall time spent fetching; zero for cache hits.
    pub elapsed: Duration,
    /// Whether the body was served from the HTTP cache.
    pub cached: bool,
    request: Arc<Request>,
}

impl Response {
    pub fn new(request: Request, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url: request.url.clone(),
            status,
            headers,
            body,
            elapsed: Duration::ZERO,
            cached: false,
            request: Arc::new(request),
        }
    }

    /// The request that produced this response. Read-only.
    pub fn request_from_response(&self) -> &Request {
        &self.request
    }

    pub(crate) fn shared_request(&self) -> Arc<Request> {
        Arc::clone(&self.request)
    }

    /// Returns the value of a header as a string, if present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Lossy UTF-8 view of the body.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
