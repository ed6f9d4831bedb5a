//! Cache policies.
//!
//! A policy is pure: every decision is a function of its arguments, so a
//! single instance can be shared by all in-flight requests.

use super::{CacheControl, CacheEntry};
use crate::request::Request;
use crate::response::Response;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use std::time::Duration;

/// Decides cacheability and freshness of HTTP exchanges.
pub trait CachePolicy: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Whether `response` may be stored.
    fn is_cacheable(&self, response: &Response) -> bool;

    /// Whether `entry` must be revalidated before it is served at `now`.
    fn needs_revalidation(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool;

    /// Builds the entry to store for a cacheable exchange.
    fn store(&self, request: &Request, response: &Response, now: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new(request, response, now)
    }

    /// Validator headers to attach when revalidating `entry`.
    fn conditional_headers(&self, entry: &CacheEntry) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = entry
            .freshness
            .etag
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(header::IF_NONE_MATCH, value);
        }
        if let Some(value) = entry
            .freshness
            .last_modified
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(header::IF_MODIFIED_SINCE, value);
        }
        headers
    }
}

fn is_safe_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

fn forbids_storage(response: &Response) -> bool {
    CacheControl::parse(&response.headers).no_store
        || CacheControl::parse(&response.request_from_response().headers).no_store
}

/// Caches every safe, non-server-error response forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyPolicy;

impl CachePolicy for DummyPolicy {
    fn name(&self) -> &str {
        "dummy"
    }

    fn is_cacheable(&self, response: &Response) -> bool {
        is_safe_method(&response.request_from_response().method)
            && !response.status.is_informational()
            && response.status != StatusCode::NOT_MODIFIED
            && !response.status.is_server_error()
            && !forbids_storage(response)
    }

    fn needs_revalidation(&self, _entry: &CacheEntry, _now: DateTime<Utc>) -> bool {
        false
    }
}

/// Larger delta-seconds values are treated as this many seconds (2^31 - 1).
const MAX_DELTA_SECONDS: u64 = i32::MAX as u64;

fn delta_seconds(value: u64) -> ChronoDuration {
    ChronoDuration::seconds(value.min(MAX_DELTA_SECONDS) as i64)
}

/// Status codes that are cacheable without explicit freshness information.
const HEURISTICALLY_CACHEABLE: [u16; 11] = [200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

/// HTTP freshness and validation rules.
///
/// The freshness lifetime of an entry is, in order of preference: zero when
/// `no-cache` was sent, `max-age`, `Expires - Date`, a fraction of the time
/// since `Last-Modified`, or [`Rfc2616Policy::default_lifetime`].
#[derive(Debug, Clone)]
pub struct Rfc2616Policy {
    /// Lifetime used when the response carries no freshness information.
    pub default_lifetime: Duration,
    /// Fraction of `Date - Last-Modified` used as a heuristic lifetime.
    pub heuristic_fraction: f64,
}

impl Default for Rfc2616Policy {
    fn default() -> Self {
        Self {
            default_lifetime: Duration::ZERO,
            heuristic_fraction: 0.1,
        }
    }
}

impl Rfc2616Policy {
    pub fn new(default_lifetime: Duration) -> Self {
        Self {
            default_lifetime,
            ..Default::default()
        }
    }

    /// How long `entry` stays fresh after it was generated.
    pub fn freshness_lifetime(&self, entry: &CacheEntry) -> ChronoDuration {
        let freshness = &entry.freshness;
        if freshness.no_cache {
            return ChronoDuration::zero();
        }
        if let Some(max_age) = freshness.max_age {
            return delta_seconds(max_age);
        }

        let date = freshness.date.unwrap_or(entry.stored_at);
        if let Some(expires) = freshness.expires {
            return (expires - date).max(ChronoDuration::zero());
        }
        if let Some(last_modified) = freshness.last_modified_at() {
            if last_modified <= date {
                let since_modified = (date - last_modified).num_milliseconds() as f64;
                return ChronoDuration::milliseconds((since_modified * self.heuristic_fraction) as i64);
            }
        }

        ChronoDuration::from_std(self.default_lifetime).unwrap_or_else(|_| ChronoDuration::zero())
    }

    /// Age of `entry` at `now`, including the age it had when stored.
    pub fn current_age(&self, entry: &CacheEntry, now: DateTime<Utc>) -> ChronoDuration {
        let resident = (now - entry.stored_at).max(ChronoDuration::zero());
        resident + delta_seconds(entry.freshness.age)
    }
}

impl CachePolicy for Rfc2616Policy {
    fn name(&self) -> &str {
        "rfc2616"
    }

    fn is_cacheable(&self, response: &Response) -> bool {
        is_safe_method(&response.request_from_response().method)
            && HEURISTICALLY_CACHEABLE.contains(&response.status.as_u16())
            && !forbids_storage(response)
    }

    fn needs_revalidation(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.current_age(entry, now) >= self.freshness_lifetime(entry)
    }
}
