//! # Spider Module
//!
//! Defines the `Spider` trait: the user's crawl logic.
//!
//! ## Overview
//!
//! A spider says where a crawl starts and what to do with each response. It is
//! shared by every parser worker, so `parse` takes `&self`; keep any mutable
//! state behind interior mutability.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! #[derive(Debug, Clone, serde::Serialize)]
//! struct Title {
//!     url: String,
//!     title: String,
//! }
//!
//! struct TitleSpider;
//!
//! #[async_trait]
//! impl Spider for TitleSpider {
//!     type Item = Title;
//!
//!     fn start_urls(&self) -> Vec<String> {
//!         vec!["https://example.com/".into()]
//!     }
//!
//!     async fn parse(&self, response: Response) -> Result<ParseOutput<Self::Item>, SpiderError> {
//!         let mut output = ParseOutput::new();
//!         // ... extract the title, discover links ...
//!         Ok(output)
//!     }
//! }
//! ```

use crate::error::SpiderError;
use crate::item::{ParseOutput, ScrapedItem};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use tracing::warn;

/// Defines the contract for a web spider.
#[async_trait]
pub trait Spider: Send + Sync + 'static {
    /// The type of record that the spider scrapes.
    type Item: ScrapedItem;

    /// Returns the initial URLs to start crawling from.
    fn start_urls(&self) -> Vec<String> {
        Vec::new()
    }

    /// Generates the initial requests to start crawling.
    fn start_requests(&self) -> Result<Vec<Request>, SpiderError> {
        self.start_urls()
            .iter()
            .map(|url| Request::get(url).map_err(SpiderError::from))
            .collect()
    }

    /// Parses a response and extracts records and new requests.
    async fn parse(&self, response: Response) -> Result<ParseOutput<Self::Item>, SpiderError>;

    /// Called once for every request that ends in a terminal failure.
    async fn handle_failure(&self, request: &Request, error: &SpiderError) {
        warn!("Request {} {} failed: {}", request.method, request.url, error);
    }
}
