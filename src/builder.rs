//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for constructing and configuring
//! `Crawler` instances.
//!
//! ## Overview
//!
//! All tunables live in [`CrawlerConfig`], which has sensible defaults and can
//! also be loaded from JSON (every field is optional). The builder adds the
//! components that are not plain data: the downloader, the cache storage and
//! policy, the robots.txt gate, user processors and exporters.
//!
//! ## Default components
//!
//! - Request processors, in order: `AllowedDomainsMiddleware` (when domains are
//!   configured), `RobotsTxtMiddleware` (when a gate is set),
//!   `DefaultHeadersMiddleware`, then user processors.
//! - Response processors, in order: `LogStatsMiddleware` (unless
//!   `log_disabled` is set), then user processors.
//! - A `ReqwestDownloader` when none is given.
//! - A `DummyPolicy` when a cache storage is set without a policy.
//! - A `ConsoleExporter` when no exporter is registered.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! async fn setup_crawler() -> Result<(), SpiderError> {
//!     let crawler = CrawlerBuilder::new(MySpider)
//!         .concurrent_requests(8)
//!         .concurrent_requests_per_domain(2)
//!         .request_delay(Duration::from_millis(250), true)
//!         .cache_storage(DiskStorage::new("./httpcache")?)
//!         .cache_policy(Rfc2616Policy::default())
//!         .add_exporter(JsonLinesExporter::new("items.jsonl"))
//!         .build()
//!         .await?;
//!
//!     crawler.start_crawl().await
//! }
//! ```

use crate::cache::{CachePolicy, DummyPolicy, HttpCache};
use crate::crawler::{Crawler, MiddlewareManager, RequestHandler};
use crate::downloader::{Downloader, DownloaderConfig, ReqwestDownloader};
use crate::error::SpiderError;
use crate::export::{ConsoleExporter, Exporter};
use crate::middleware::{
    AllowedDomainsMiddleware, DefaultHeadersMiddleware, LogStatsMiddleware, RequestProcessor,
    ResponseProcessor, RobotsGate, RobotsTxtMiddleware,
};
use crate::scheduler::Scheduler;
use crate::spider::Spider;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use crate::storage::CacheStorage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = "spider-engine/0.1";

/// Tunables of a crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Hosts the crawl may visit. Empty allows every host.
    pub allowed_domains: Vec<String>,
    /// Maximum requests in flight overall. Must be greater than 0.
    pub concurrent_requests: usize,
    /// Maximum requests in flight per origin. 0 means unlimited.
    pub concurrent_requests_per_domain: usize,
    /// Minimum spacing between network dispatches to one origin.
    pub request_delay: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.5)`.
    pub request_delay_randomize: bool,
    pub retry_http_codes: Vec<u16>,
    /// Retries per request. A negative value disables retrying.
    pub retry_times: i32,
    /// Base of the exponential retry backoff.
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    pub max_redirects: u32,
    /// Per-attempt network timeout.
    pub timeout: Duration,
    pub url_revisit_enabled: bool,
    pub user_agent: String,
    /// Response bodies longer than this are truncated.
    pub max_body_size: usize,
    pub cookies_enabled: bool,
    /// Number of workers running `Spider::parse`. Must be greater than 0.
    pub parser_workers: usize,
    /// Capacity of the channel between dispatch and parsing.
    pub channel_capacity: usize,
    /// Skip the per-response log line of `LogStatsMiddleware`.
    pub log_disabled: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            allowed_domains: Vec::new(),
            concurrent_requests: num_cpus::get().max(16),
            concurrent_requests_per_domain: 8,
            request_delay: Duration::ZERO,
            request_delay_randomize: true,
            retry_http_codes: vec![500, 502, 503, 504, 522, 524, 408],
            retry_times: 2,
            retry_backoff: Duration::from_millis(250),
            max_retry_backoff: Duration::from_secs(30),
            max_redirects: 10,
            timeout: Duration::from_secs(30),
            url_revisit_enabled: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_body_size: 1024 * 1024 * 1024,
            cookies_enabled: true,
            parser_workers: num_cpus::get().clamp(4, 16),
            channel_capacity: 1000,
            log_disabled: false,
        }
    }
}

impl CrawlerConfig {
    /// Parses a JSON document; missing fields take their default.
    pub fn from_json(json: &str) -> Result<Self, SpiderError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks the settings that would make a crawl impossible.
    pub fn validate(&self) -> Result<(), SpiderError> {
        if self.concurrent_requests == 0 {
            return Err(SpiderError::ConfigurationError(
                "concurrent_requests must be greater than 0.".to_string(),
            ));
        }
        if self.parser_workers == 0 {
            return Err(SpiderError::ConfigurationError(
                "parser_workers must be greater than 0.".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(SpiderError::ConfigurationError(
                "channel_capacity must be greater than 0.".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct CrawlerBuilder<S: Spider> {
    crawler_config: CrawlerConfig,
    spider: Option<S>,
    downloader: Option<Arc<dyn Downloader>>,
    cache_storage: Option<Arc<dyn CacheStorage>>,
    cache_policy: Option<Arc<dyn CachePolicy>>,
    robots_gate: Option<Arc<dyn RobotsGate>>,
    request_processors: Vec<Box<dyn RequestProcessor>>,
    response_processors: Vec<Box<dyn ResponseProcessor>>,
    exporters: Vec<Arc<dyn Exporter<S::Item>>>,
}

impl<S: Spider> CrawlerBuilder<S> {
    /// Creates a new `CrawlerBuilder` for a given spider.
    pub fn new(spider: S) -> Self {
        Self {
            crawler_config: CrawlerConfig::default(),
            spider: Some(spider),
            downloader: None,
            cache_storage: None,
            cache_policy: None,
            robots_gate: None,
            request_processors: Vec::new(),
            response_processors: Vec::new(),
            exporters: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: CrawlerConfig) -> Self {
        self.crawler_config = config;
        self
    }

    pub fn allowed_domains<I, D>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        self.crawler_config.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn concurrent_requests(mut self, limit: usize) -> Self {
        self.crawler_config.concurrent_requests = limit;
        self
    }

    pub fn concurrent_requests_per_domain(mut self, limit: usize) -> Self {
        self.crawler_config.concurrent_requests_per_domain = limit;
        self
    }

    pub fn request_delay(mut self, delay: Duration, randomize: bool) -> Self {
        self.crawler_config.request_delay = delay;
        self.crawler_config.request_delay_randomize = randomize;
        self
    }

    pub fn retry_http_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.crawler_config.retry_http_codes = codes.into_iter().collect();
        self
    }

    pub fn retry_times(mut self, times: i32) -> Self {
        self.crawler_config.retry_times = times;
        self
    }

    pub fn retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.crawler_config.retry_backoff = base;
        self.crawler_config.max_retry_backoff = max;
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.crawler_config.max_redirects = max;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.crawler_config.timeout = timeout;
        self
    }

    pub fn url_revisit_enabled(mut self, enabled: bool) -> Self {
        self.crawler_config.url_revisit_enabled = enabled;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.crawler_config.user_agent = user_agent.into();
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.crawler_config.max_body_size = bytes;
        self
    }

    pub fn cookies_enabled(mut self, enabled: bool) -> Self {
        self.crawler_config.cookies_enabled = enabled;
        self
    }

    pub fn max_parser_workers(mut self, workers: usize) -> Self {
        self.crawler_config.parser_workers = workers;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.crawler_config.channel_capacity = capacity;
        self
    }

    pub fn log_disabled(mut self, disabled: bool) -> Self {
        self.crawler_config.log_disabled = disabled;
        self
    }

    /// Sets a custom downloader for the crawler.
    pub fn downloader<D: Downloader>(mut self, downloader: D) -> Self {
        self.downloader = Some(Arc::new(downloader));
        self
    }

    /// Enables the HTTP cache with the given storage.
    pub fn cache_storage<C: CacheStorage>(mut self, storage: C) -> Self {
        self.cache_storage = Some(Arc::new(storage));
        self
    }

    /// Enables the HTTP cache with a storage shared with the caller.
    pub fn shared_cache_storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
        self.cache_storage = Some(storage);
        self
    }

    pub fn cache_policy<P: CachePolicy>(mut self, policy: P) -> Self {
        self.cache_policy = Some(Arc::new(policy));
        self
    }

    pub fn robots_gate(mut self, gate: Arc<dyn RobotsGate>) -> Self {
        self.robots_gate = Some(gate);
        self
    }

    /// Adds a request processor after the built-in ones.
    pub fn add_request_processor<P: RequestProcessor>(mut self, processor: P) -> Self {
        self.request_processors.push(Box::new(processor));
        self
    }

    /// Adds a response processor after the built-in ones.
    pub fn add_response_processor<P: ResponseProcessor>(mut self, processor: P) -> Self {
        self.response_processors.push(Box::new(processor));
        self
    }

    pub fn add_exporter<E: Exporter<S::Item>>(mut self, exporter: E) -> Self {
        self.exporters.push(Arc::new(exporter));
        self
    }

    /// Validates the configuration and assembles the `Crawler`.
    pub async fn build(mut self) -> Result<Crawler<S>, SpiderError> {
        let spider = self.validate_and_get_spider()?;
        let config = Arc::new(self.crawler_config);

        let downloader = match self.downloader {
            Some(downloader) => downloader,
            None => Arc::new(ReqwestDownloader::new(DownloaderConfig {
                user_agent: config.user_agent.clone(),
                cookies_enabled: config.cookies_enabled,
                max_body_size: config.max_body_size,
                ..DownloaderConfig::default()
            })
            .map_err(|e| {
                SpiderError::ConfigurationError(format!("Failed to build downloader: {}", e))
            })?) as Arc<dyn Downloader>,
        };

        let cache = self.cache_storage.map(|storage| {
            let policy = self
                .cache_policy
                .unwrap_or_else(|| Arc::new(DummyPolicy) as Arc<dyn CachePolicy>);
            debug!("HTTP cache enabled with policy {}", policy.name());
            HttpCache::new(storage, policy)
        });

        let mut request_processors: Vec<Box<dyn RequestProcessor>> = Vec::new();
        if !config.allowed_domains.is_empty() {
            request_processors.push(Box::new(AllowedDomainsMiddleware::new(
                config.allowed_domains.iter().cloned(),
            )));
        }
        if let Some(gate) = self.robots_gate {
            request_processors.push(Box::new(RobotsTxtMiddleware::new(
                gate,
                config.user_agent.clone(),
            )));
        }
        request_processors.push(Box::new(DefaultHeadersMiddleware::new(&config.user_agent)?));
        request_processors.extend(self.request_processors);

        let mut response_processors = default_response_processors(&config);
        response_processors.extend(self.response_processors);

        let middlewares = MiddlewareManager::new(request_processors, response_processors);
        debug!(
            "Request processors: {:?}; response processors: {:?}",
            middlewares.request_processor_names(),
            middlewares.response_processor_names()
        );

        let mut exporters = self.exporters;
        if exporters.is_empty() {
            exporters.push(Arc::new(ConsoleExporter::new()));
        }

        let state = CrawlerState::new();
        let stats = Arc::new(StatCollector::new());
        let (scheduler, req_rx) = Scheduler::new(
            config.url_revisit_enabled,
            Arc::clone(&state),
            Arc::clone(&stats),
        );
        let handler = RequestHandler::new(
            Arc::clone(&config),
            middlewares,
            downloader,
            cache.clone(),
            Arc::clone(&scheduler),
            Arc::clone(&stats),
        );

        Ok(Crawler::new(
            config, scheduler, req_rx, state, stats, handler, spider, exporters, cache,
        ))
    }

    fn validate_and_get_spider(&mut self) -> Result<S, SpiderError> {
        self.crawler_config.validate()?;
        self.spider.take().ok_or_else(|| {
            SpiderError::ConfigurationError("Crawler must have a spider.".to_string())
        })
    }
}

fn default_response_processors(config: &CrawlerConfig) -> Vec<Box<dyn ResponseProcessor>> {
    let mut processors: Vec<Box<dyn ResponseProcessor>> = Vec::new();
    if !config.log_disabled {
        processors.push(Box::new(LogStatsMiddleware));
    }
    processors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::NoopSpider;

    #[test]
    fn defaults_match_documented_values() {
        let config = CrawlerConfig::default();
        assert_eq!(config.retry_times, 2);
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.user_agent, "spider-engine/0.1");
        assert_eq!(config.retry_http_codes, vec![500, 502, 503, 504, 522, 524, 408]);
        assert!(!config.url_revisit_enabled);
        assert!(!config.log_disabled);
        assert!(config.parser_workers >= 4);
    }

    #[test]
    fn log_disabled_drops_the_log_stats_processor() {
        let names = |config: &CrawlerConfig| {
            default_response_processors(config)
                .iter()
                .map(|p| p.name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&CrawlerConfig::default()), vec!["LogStatsMiddleware"]);

        let config = CrawlerConfig::from_json(r#"{"log_disabled": true}"#).unwrap();
        assert!(names(&config).is_empty());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config = CrawlerConfig::from_json(
            r#"{"concurrent_requests": 3, "retry_times": -1, "allowed_domains": ["example.com"]}"#,
        )
        .unwrap();
        assert_eq!(config.concurrent_requests, 3);
        assert_eq!(config.retry_times, -1);
        assert_eq!(config.allowed_domains, vec!["example.com"]);
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn zero_global_concurrency_is_rejected() {
        let err = CrawlerBuilder::new(NoopSpider)
            .concurrent_requests(0)
            .build()
            .await
            .err()
            .expect("build must fail");
        assert!(matches!(err, SpiderError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn zero_parser_workers_is_rejected() {
        let result = CrawlerBuilder::new(NoopSpider)
            .max_parser_workers(0)
            .build()
            .await;
        assert!(matches!(result, Err(SpiderError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn zero_per_domain_limit_is_accepted() {
        let crawler = CrawlerBuilder::new(NoopSpider)
            .concurrent_requests_per_domain(0)
            .build()
            .await
            .unwrap();
        assert_eq!(crawler.config().concurrent_requests_per_domain, 0);
    }
}
