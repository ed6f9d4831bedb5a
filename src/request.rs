//! The crawl [`Request`] and URL normalization.
//!
//! A request carries everything the scheduler needs to admit, dispatch, retry
//! and redirect it, plus an opaque `meta` map that user parsing logic can use
//! to pass context from one page to the next.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use url::Url;

/// A request to be scheduled by the crawler.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Number of retries already performed for this request.
    pub retry_times: u32,
    /// Number of redirects already followed for this request.
    pub redirect_times: u32,
    /// Opaque context handed back to the spider with the response.
    pub meta: HashMap<String, Value>,
}

impl Request {
    /// Creates a `GET` request for the given URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            retry_times: 0,
            redirect_times: 0,
            meta: HashMap::new(),
        }
    }

    /// Parses `url` and creates a `GET` request for it.
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Adds a header, ignoring names or values that are not valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// The key used for per-origin limiting: the host plus an explicit port.
    pub fn origin(&self) -> String {
        origin_of(&self.url)
    }

    /// A stable identity for de-duplication and cache keys.
    ///
    /// Derived from the method and the normalized URL only; headers never
    /// contribute.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(normalize_url(&self.url).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Returns `host[:port]` for the URL, or `"unknown"` when it has no host.
pub fn origin_of(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => "unknown".to_string(),
    }
}

/// Canonical string form of a URL: fragment dropped, query pairs sorted.
///
/// Scheme and host casing as well as default ports are already normalized by
/// [`Url`] itself.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    if normalized.query().is_some() {
        let mut pairs: Vec<(String, String)> = normalized
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();
        if pairs.is_empty() {
            normalized.set_query(None);
        } else {
            normalized.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    normalized.to_string()
}
