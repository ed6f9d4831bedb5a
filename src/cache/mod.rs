//! # Cache Module
//!
//! HTTP response caching, consulted by the request handler before every
//! network dispatch.
//!
//! ## Overview
//!
//! - [`CacheEntry`]: an immutable snapshot of one request/response exchange plus
//!   its freshness metadata, serialized as MessagePack.
//! - [`CachePolicy`]: decides what may be cached and when an entry goes stale.
//!   [`DummyPolicy`] caches forever, [`Rfc2616Policy`] follows HTTP freshness
//!   and validator rules.
//! - [`HttpCache`]: binds a policy to a [`CacheStorage`] backend.
//!
//! Entries are keyed by [`Request::fingerprint`], so headers never influence
//! the key. Entries are never patched in place; revalidation writes a new one.

pub mod policy;

pub use policy::{CachePolicy, DummyPolicy, Rfc2616Policy};

use crate::error::StorageError;
use crate::request::Request;
use crate::response::Response;
use crate::storage::CacheStorage;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// Response headers that describe the stored body and must survive a 304 merge.
const BODY_HEADERS: [HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
];

/// Validators and lifetime hints captured when an entry is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Freshness {
    pub etag: Option<String>,
    /// Raw `Last-Modified` value, echoed back in `If-Modified-Since`.
    pub last_modified: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    /// `max-age` in seconds.
    pub max_age: Option<u64>,
    /// `Age` header at storage time, in seconds.
    pub age: u64,
    pub no_cache: bool,
}

impl Freshness {
    fn from_headers(headers: &HeaderMap) -> Self {
        let directives = CacheControl::parse(headers);
        Freshness {
            etag: header_string(headers, header::ETAG),
            last_modified: header_string(headers, header::LAST_MODIFIED),
            date: header_string(headers, header::DATE).and_then(|d| parse_http_date(&d)),
            expires: header_string(headers, header::EXPIRES).and_then(|d| parse_http_date(&d)),
            max_age: directives.max_age,
            age: header_string(headers, header::AGE)
                .and_then(|a| a.trim().parse().ok())
                .unwrap_or(0),
            no_cache: directives.no_cache,
        }
    }

    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified.as_deref().and_then(parse_http_date)
    }
}

/// A stored request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub method: String,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub stored_at: DateTime<Utc>,
    pub freshness: Freshness,
}

impl CacheEntry {
    /// Captures `response` (and the request that produced it) at time `now`.
    pub fn new(request: &Request, response: &Response, now: DateTime<Utc>) -> Self {
        CacheEntry {
            key: request.fingerprint(),
            method: request.method.to_string(),
            url: request.url.to_string(),
            request_headers: headers_to_vec(&request.headers),
            status: response.status.as_u16(),
            headers: headers_to_vec(&response.headers),
            body: response.body.clone(),
            stored_at: now,
            freshness: Freshness::from_headers(&response.headers),
        }
    }

    pub fn encode(&self) -> Result<Bytes, StorageError> {
        Ok(Bytes::from(rmp_serde::to_vec_named(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    pub fn header_map(&self) -> HeaderMap {
        vec_to_headers(&self.headers)
    }

    /// Synthesizes a response for `request` from the stored exchange.
    pub fn to_response(&self, request: Request) -> Result<Response, StorageError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| StorageError::Decode(format!("invalid stored status {}", self.status)))?;
        let mut response = Response::new(request, status, self.header_map(), self.body.clone());
        response.cached = true;
        Ok(response)
    }

    /// Builds the response for a successful revalidation: the stored status and
    /// body with headers refreshed from the `304 Not Modified` reply.
    pub fn revalidated(
        &self,
        request: Request,
        not_modified: &HeaderMap,
    ) -> Result<Response, StorageError> {
        let mut response = self.to_response(request)?;
        for name in not_modified.keys() {
            if BODY_HEADERS.contains(name) {
                continue;
            }
            response.headers.remove(name);
            for value in not_modified.get_all(name) {
                response.headers.append(name.clone(), value.clone());
            }
        }
        Ok(response)
    }
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    /// A stored entry the policy considers fresh.
    Fresh(CacheEntry),
    /// A stored entry that must be revalidated before use.
    Stale(CacheEntry),
    Miss,
}

/// A cache policy bound to a storage backend.
#[derive(Clone)]
pub struct HttpCache {
    storage: Arc<dyn CacheStorage>,
    policy: Arc<dyn CachePolicy>,
}

impl HttpCache {
    pub fn new(storage: Arc<dyn CacheStorage>, policy: Arc<dyn CachePolicy>) -> Self {
        Self { storage, policy }
    }

    pub fn policy(&self) -> &dyn CachePolicy {
        self.policy.as_ref()
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Looks up the entry for `request` and classifies it as fresh or stale.
    pub async fn lookup(
        &self,
        request: &Request,
        now: DateTime<Utc>,
    ) -> Result<CacheLookup, StorageError> {
        let key = request.fingerprint();
        let Some(bytes) = self.storage.get(&key).await? else {
            trace!("Cache miss for {}", request.url);
            return Ok(CacheLookup::Miss);
        };
        let entry = CacheEntry::decode(&bytes)?;
        if self.policy.needs_revalidation(&entry, now) {
            trace!("Cache entry for {} is stale", request.url);
            Ok(CacheLookup::Stale(entry))
        } else {
            trace!("Cache hit for {}", request.url);
            Ok(CacheLookup::Fresh(entry))
        }
    }

    /// Whether a fresh entry exists for `request`.
    pub async fn is_cached(&self, request: &Request, now: DateTime<Utc>) -> Result<bool, StorageError> {
        Ok(matches!(self.lookup(request, now).await?, CacheLookup::Fresh(_)))
    }

    /// Stores `response` if the policy allows it. Returns the written entry.
    pub async fn save(
        &self,
        request: &Request,
        response: &Response,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StorageError> {
        if !self.policy.is_cacheable(response) {
            trace!("Response for {} is not cacheable", request.url);
            return Ok(None);
        }
        let entry = self.policy.store(request, response, now);
        self.storage.set(&entry.key, entry.encode()?).await?;
        trace!("Stored cache entry for {}", request.url);
        Ok(Some(entry))
    }

    pub async fn close(&self) -> Result<(), StorageError> {
        self.storage.close().await
    }
}

/// The subset of `Cache-Control` directives the policies act on.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<u64>,
}

impl CacheControl {
    pub(crate) fn parse(headers: &HeaderMap) -> Self {
        let mut directives = CacheControl::default();
        for value in headers.get_all(header::CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for directive in value.split(',') {
                let mut parts = directive.trim().splitn(2, '=');
                let name = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
                let arg = parts.next().map(|a| a.trim().trim_matches('"'));
                match name.as_str() {
                    "no-store" => directives.no_store = true,
                    "no-cache" => directives.no_cache = true,
                    "max-age" => directives.max_age = arg.and_then(|a| a.parse().ok()),
                    _ => {}
                }
            }
        }
        directives
    }
}

/// Parses an IMF-fixdate such as `Wed, 21 Oct 2015 07:28:00 GMT`.
pub(crate) fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn headers_to_vec(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn vec_to_headers(items: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in items {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::Duration as ChronoDuration;

    fn exchange(url: &str, headers: &[(&'static str, &str)]) -> (Request, Response) {
        let request = Request::get(url).unwrap();
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        let response = Response::new(request.clone(), StatusCode::OK, map, Bytes::from_static(b"body"));
        (request, response)
    }

    #[test]
    fn entry_captures_validators() {
        let (request, response) = exchange(
            "http://example.com/a",
            &[
                ("etag", "\"v1\""),
                ("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
                ("cache-control", "public, max-age=60"),
                ("age", "5"),
            ],
        );
        let entry = CacheEntry::new(&request, &response, Utc::now());
        assert_eq!(entry.key, request.fingerprint());
        assert_eq!(entry.freshness.etag.as_deref(), Some("\"v1\""));
        assert_eq!(entry.freshness.max_age, Some(60));
        assert_eq!(entry.freshness.age, 5);
        assert!(entry.freshness.last_modified_at().is_some());
    }

    #[test]
    fn entry_encoding_is_lossless() {
        let (request, response) = exchange("http://example.com/a", &[("content-type", "text/html")]);
        let entry = CacheEntry::new(&request, &response, Utc::now());
        let decoded = CacheEntry::decode(&entry.encode().unwrap()).unwrap();
        assert_eq!(decoded, entry);
        assert!(CacheEntry::decode(b"garbage").is_err());
    }

    #[test]
    fn revalidation_refreshes_headers_but_keeps_body() {
        let (request, response) = exchange(
            "http://example.com/a",
            &[("etag", "\"v1\""), ("content-length", "4"), ("x-old", "1")],
        );
        let entry = CacheEntry::new(&request, &response, Utc::now());

        let mut not_modified = HeaderMap::new();
        not_modified.insert("etag", HeaderValue::from_static("\"v2\""));
        not_modified.insert("content-length", HeaderValue::from_static("0"));

        let merged = entry.revalidated(request, &not_modified).unwrap();
        assert_eq!(merged.status, StatusCode::OK);
        assert_eq!(merged.body, Bytes::from_static(b"body"));
        assert_eq!(merged.header_str("etag"), Some("\"v2\""));
        assert_eq!(merged.header_str("content-length"), Some("4"));
        assert_eq!(merged.header_str("x-old"), Some("1"));
        assert!(merged.cached);
    }

    #[tokio::test]
    async fn lookup_classifies_entries() {
        let cache = HttpCache::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(Rfc2616Policy::default()),
        );
        let (request, response) = exchange("http://example.com/a", &[("cache-control", "max-age=60")]);
        let now = Utc::now();

        assert!(matches!(cache.lookup(&request, now).await.unwrap(), CacheLookup::Miss));
        assert!(cache.save(&request, &response, now).await.unwrap().is_some());
        assert!(cache.is_cached(&request, now + ChronoDuration::seconds(30)).await.unwrap());
        assert!(matches!(
            cache.lookup(&request, now + ChronoDuration::seconds(61)).await.unwrap(),
            CacheLookup::Stale(_)
        ));
    }

    #[tokio::test]
    async fn uncacheable_response_is_not_stored() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = HttpCache::new(storage.clone(), Arc::new(DummyPolicy));
        let (request, response) = exchange("http://example.com/a", &[("cache-control", "no-store")]);

        assert!(cache.save(&request, &response, Utc::now()).await.unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn corrupt_entry_surfaces_decode_error() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = HttpCache::new(storage.clone(), Arc::new(DummyPolicy));
        let request = Request::get("http://example.com/a").unwrap();
        storage
            .set(&request.fingerprint(), Bytes::from_static(b"\xff\x00"))
            .await
            .unwrap();

        assert!(matches!(
            cache.lookup(&request, Utc::now()).await,
            Err(StorageError::Decode(_))
        ));
    }

    #[test]
    fn cache_control_parsing() {
        let mut headers = HeaderMap::new();
        headers.append(header::CACHE_CONTROL, HeaderValue::from_static("No-Cache, max-age=\"30\""));
        headers.append(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        let cc = CacheControl::parse(&headers);
        assert!(cc.no_cache);
        assert!(cc.no_store);
        assert_eq!(cc.max_age, Some(30));
    }
}
