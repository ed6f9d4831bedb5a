//! # Statistics Module
//!
//! Collects and stores metrics about the crawler's operation.
//!
//! ## Overview
//!
//! A single `StatCollector` is created with the crawler and shared with every
//! component that observes something worth counting: the scheduler, the
//! per-request state machine, the cache, the parser workers and the export
//! dispatcher. It lives exactly as long as the crawler that owns it.
//!
//! ## Key Metrics Tracked
//!
//! - **Request Metrics**: enqueued, duplicates skipped, sent, succeeded, failed,
//!   retried, redirected and cancelled requests
//! - **Response Metrics**: received, served from cache, revalidated, status
//!   code distribution and bytes downloaded
//! - **Cache Metrics**: entries stored and storage errors
//! - **Item Metrics**: scraped and exported records
//!
//! ## Example
//!
//! ```rust,ignore
//! let crawler = CrawlerBuilder::new(MySpider).build().await?;
//! let stats = crawler.get_stats();
//! crawler.start_crawl().await?;
//!
//! println!("{}", stats.to_json_string_pretty()?);
//! println!("{}", stats.to_markdown_string());
//! ```

use crate::error::SpiderError;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

// A point-in-time copy of the counters, shared by the report formats.
struct StatsSnapshot {
    requests_enqueued: usize,
    requests_duplicate: usize,
    requests_sent: usize,
    requests_succeeded: usize,
    requests_failed: usize,
    requests_retried: usize,
    requests_redirected: usize,
    requests_cancelled: usize,
    responses_received: usize,
    responses_from_cache: usize,
    responses_revalidated: usize,
    cache_stores: usize,
    storage_errors: usize,
    total_bytes_downloaded: usize,
    items_scraped: usize,
    items_exported: usize,
    parse_errors: usize,
    response_status_counts: BTreeMap<u16, usize>,
    elapsed_duration: Duration,
}

impl StatsSnapshot {
    fn formatted_duration(&self) -> String {
        format!("{:?}", self.elapsed_duration)
    }

    fn per_second(&self, count: usize) -> f64 {
        let seconds = self.elapsed_duration.as_secs_f64();
        if seconds > 0.0 {
            count as f64 / seconds
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;
        const GB: usize = 1024 * MB;

        if self.total_bytes_downloaded >= GB {
            format!("{:.2} GB", self.total_bytes_downloaded as f64 / GB as f64)
        } else if self.total_bytes_downloaded >= MB {
            format!("{:.2} MB", self.total_bytes_downloaded as f64 / MB as f64)
        } else if self.total_bytes_downloaded >= KB {
            format!("{:.2} KB", self.total_bytes_downloaded as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes_downloaded)
        }
    }

    fn status_line(&self, separator: &str, item: impl Fn(u16, usize) -> String) -> String {
        self.response_status_counts
            .iter()
            .map(|(code, count)| item(*code, *count))
            .collect::<Vec<String>>()
            .join(separator)
    }
}

/// Collects and stores various statistics about the crawler's operation.
#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    pub start_time: Instant,

    // Request-related metrics
    pub requests_enqueued: AtomicUsize,
    pub requests_duplicate: AtomicUsize,
    pub requests_sent: AtomicUsize,
    pub requests_succeeded: AtomicUsize,
    pub requests_failed: AtomicUsize,
    pub requests_retried: AtomicUsize,
    pub requests_redirected: AtomicUsize,
    pub requests_cancelled: AtomicUsize,

    // Response-related metrics
    pub responses_received: AtomicUsize,
    pub responses_from_cache: AtomicUsize,
    pub responses_revalidated: AtomicUsize,
    pub response_status_counts: Arc<dashmap::DashMap<u16, usize>>,
    pub total_bytes_downloaded: AtomicUsize,

    // Cache-related metrics
    pub cache_stores: AtomicUsize,
    pub storage_errors: AtomicUsize,

    // Item-related metrics
    pub items_scraped: AtomicUsize,
    pub items_exported: AtomicUsize,
    pub parse_errors: AtomicUsize,
}

impl StatCollector {
    /// Creates a new `StatCollector` with all counters initialized to zero.
    pub fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_enqueued: AtomicUsize::new(0),
            requests_duplicate: AtomicUsize::new(0),
            requests_sent: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            requests_retried: AtomicUsize::new(0),
            requests_redirected: AtomicUsize::new(0),
            requests_cancelled: AtomicUsize::new(0),
            responses_received: AtomicUsize::new(0),
            responses_from_cache: AtomicUsize::new(0),
            responses_revalidated: AtomicUsize::new(0),
            response_status_counts: Arc::new(dashmap::DashMap::new()),
            total_bytes_downloaded: AtomicUsize::new(0),
            cache_stores: AtomicUsize::new(0),
            storage_errors: AtomicUsize::new(0),
            items_scraped: AtomicUsize::new(0),
            items_exported: AtomicUsize::new(0),
            parse_errors: AtomicUsize::new(0),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::SeqCst),
            requests_duplicate: self.requests_duplicate.load(Ordering::SeqCst),
            requests_sent: self.requests_sent.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            requests_retried: self.requests_retried.load(Ordering::SeqCst),
            requests_redirected: self.requests_redirected.load(Ordering::SeqCst),
            requests_cancelled: self.requests_cancelled.load(Ordering::SeqCst),
            responses_received: self.responses_received.load(Ordering::SeqCst),
            responses_from_cache: self.responses_from_cache.load(Ordering::SeqCst),
            responses_revalidated: self.responses_revalidated.load(Ordering::SeqCst),
            cache_stores: self.cache_stores.load(Ordering::SeqCst),
            storage_errors: self.storage_errors.load(Ordering::SeqCst),
            total_bytes_downloaded: self.total_bytes_downloaded.load(Ordering::SeqCst),
            items_scraped: self.items_scraped.load(Ordering::SeqCst),
            items_exported: self.items_exported.load(Ordering::SeqCst),
            parse_errors: self.parse_errors.load(Ordering::SeqCst),
            response_status_counts: self
                .response_status_counts
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            elapsed_duration: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts an enqueue skipped because its fingerprint was already seen.
    pub(crate) fn increment_requests_duplicate(&self) {
        self.requests_duplicate.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts a network dispatch. Cache hits are not sent.
    pub(crate) fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_retried(&self) {
        self.requests_retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_redirected(&self) {
        self.requests_redirected.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_cancelled(&self) {
        self.requests_cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_responses_received(&self) {
        self.responses_received.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_responses_from_cache(&self) {
        self.responses_from_cache.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts a `304 Not Modified` merged into a stale cache entry.
    pub(crate) fn increment_responses_revalidated(&self) {
        self.responses_revalidated.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_response_status(&self, status_code: u16) {
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
    }

    pub(crate) fn add_bytes_downloaded(&self, bytes: usize) {
        self.total_bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn increment_cache_stores(&self) {
        self.cache_stores.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_storage_errors(&self) {
        self.storage_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_items_scraped(&self, count: usize) {
        self.items_scraped.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_exported(&self) {
        self.items_exported.fetch_add(1, Ordering::SeqCst);
    }

    /// A fetched response the spider failed to parse. The request itself was
    /// already counted as succeeded.
    pub(crate) fn increment_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn to_json_string(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Exports the current statistics to a Markdown formatted string.
    pub fn to_markdown_string(&self) -> String {
        let snapshot = self.snapshot();

        let status_codes_list = snapshot.status_line("\n", |code, count| {
            format!("- **{}**: {}", code, count)
        });
        let status_codes_output = if status_codes_list.is_empty() {
            "N/A".to_string()
        } else {
            status_codes_list
        };

        format!(
            r#"# Crawl Statistics Report

- **Duration**: {}
- **Average Speed**: {:.2} req/s, {:.2} resp/s, {:.2} item/s

## Requests
| Metric     | Count |
|------------|-------|
| Enqueued   | {}     |
| Duplicate  | {}     |
| Sent       | {}     |
| Succeeded  | {}     |
| Failed     | {}     |
| Retried    | {}     |
| Redirected | {}     |
| Cancelled  | {}     |

## Responses
| Metric      | Count |
|-------------|-------|
| Received    | {}     |
| From Cache  | {}     |
| Revalidated | {}     |
| Downloaded  | {}     |

## Cache
| Metric         | Count |
|----------------|-------|
| Stored         | {}     |
| Storage Errors | {}     |

## Items
| Metric       | Count |
|--------------|-------|
| Scraped      | {}     |
| Exported     | {}     |
| Parse Errors | {}     |

## Status Codes
{}
"#,
            snapshot.formatted_duration(),
            snapshot.per_second(snapshot.requests_sent),
            snapshot.per_second(snapshot.responses_received),
            snapshot.per_second(snapshot.items_scraped),
            snapshot.requests_enqueued,
            snapshot.requests_duplicate,
            snapshot.requests_sent,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.requests_retried,
            snapshot.requests_redirected,
            snapshot.requests_cancelled,
            snapshot.responses_received,
            snapshot.responses_from_cache,
            snapshot.responses_revalidated,
            snapshot.formatted_bytes(),
            snapshot.cache_stores,
            snapshot.storage_errors,
            snapshot.items_scraped,
            snapshot.items_exported,
            snapshot.parse_errors,
            status_codes_output
        )
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {}", snapshot.formatted_duration())?;
        writeln!(
            f,
            "  speed    : req/s: {:.2}, resp/s: {:.2}, item/s: {:.2}",
            snapshot.per_second(snapshot.requests_sent),
            snapshot.per_second(snapshot.responses_received),
            snapshot.per_second(snapshot.items_scraped)
        )?;
        writeln!(
            f,
            "  requests : enqueued: {}, dup: {}, sent: {}, ok: {}, fail: {}, retry: {}, redirect: {}, cancel: {}",
            snapshot.requests_enqueued,
            snapshot.requests_duplicate,
            snapshot.requests_sent,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.requests_retried,
            snapshot.requests_redirected,
            snapshot.requests_cancelled
        )?;
        writeln!(
            f,
            "  response : received: {}, from_cache: {}, revalidated: {}, downloaded: {}",
            snapshot.responses_received,
            snapshot.responses_from_cache,
            snapshot.responses_revalidated,
            snapshot.formatted_bytes()
        )?;
        writeln!(
            f,
            "  cache    : stored: {}, storage_errors: {}",
            snapshot.cache_stores, snapshot.storage_errors
        )?;
        writeln!(
            f,
            "  items    : scraped: {}, exported: {}, parse_errors: {}",
            snapshot.items_scraped, snapshot.items_exported, snapshot.parse_errors
        )?;

        let status_string = if snapshot.response_status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot.status_line(", ", |code, count| format!("{}: {}", code, count))
        };

        writeln!(f, "  status   : {}\n", status_string)
    }
}
