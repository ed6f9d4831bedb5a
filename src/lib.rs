//! # spider-engine
//!
//! Execution core of the spider crawling framework.
//!
//! Takes requests from a spider, deduplicates them, admits them under global
//! and per-origin concurrency limits, consults an HTTP cache, dispatches them
//! over the network with retries and redirects, runs the responses through the
//! spider's `parse` and streams the resulting records to exporters.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! #[derive(Debug, Clone, serde::Serialize)]
//! struct Page {
//!     url: String,
//!     status: u16,
//! }
//!
//! struct MySpider;
//!
//! #[async_trait]
//! impl Spider for MySpider {
//!     type Item = Page;
//!
//!     fn start_urls(&self) -> Vec<String> {
//!         vec!["https://example.com".into()]
//!     }
//!
//!     async fn parse(&self, response: Response) -> Result<ParseOutput<Self::Item>, SpiderError> {
//!         let mut output = ParseOutput::new();
//!         output.add_item(Page {
//!             url: response.url.to_string(),
//!             status: response.status.as_u16(),
//!         });
//!         Ok(output)
//!     }
//! }
//!
//! async fn run_crawler() -> Result<(), SpiderError> {
//!     let crawler = CrawlerBuilder::new(MySpider)
//!         .cache_storage(MemoryStorage::new())
//!         .build()
//!         .await?;
//!     crawler.start_crawl().await
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod concurrency;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod export;
pub mod item;
pub mod middleware;
pub mod prelude;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod spider;
pub mod state;
pub mod stats;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use builder::{CrawlerBuilder, CrawlerConfig};
pub use crawler::Crawler;
pub use downloader::{Downloader, ReqwestDownloader};
pub use error::{DownloadError, SpiderError, StorageError};
pub use item::{ParseOutput, ScrapedItem};
pub use request::Request;
pub use response::Response;
pub use scheduler::Scheduler;
pub use spider::Spider;
pub use stats::StatCollector;

pub use async_trait::async_trait;
pub use tokio;
