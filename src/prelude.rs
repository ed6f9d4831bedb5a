//! A "prelude" for users of the `spider-engine` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so that
//! a spider can be written with a single import.
//!
//! # Example
//!
//! ```
//! use spider_engine::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Crawler,
    CrawlerBuilder,
    CrawlerConfig,
    ParseOutput,
    Request,
    Response,
    // Core traits
    Downloader,
    ScrapedItem,
    Spider,
    // Errors
    SpiderError,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use crate::cache::{CachePolicy, DummyPolicy, Rfc2616Policy};
pub use crate::export::{ConsoleExporter, CsvExporter, Exporter, JsonLinesExporter};
pub use crate::middleware::{MiddlewareAction, RequestProcessor, ResponseProcessor};
pub use crate::storage::{CacheStorage, DiskStorage, LogStorage, MemoryStorage};
pub use std::time::Duration;
