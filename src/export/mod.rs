//! # Export Module
//!
//! Sinks for the records produced by parsing.
//!
//! ## Overview
//!
//! Parser workers send every record into one fan-in channel. A dispatcher task
//! clones each record into a separate unbounded channel per exporter, so a slow
//! exporter only grows its own backlog and never holds up the others or the
//! crawl itself.
//!
//! An exporter receives its channel once, in [`Exporter::export`], and drains it
//! until it is closed. The channel closes only after every request of the crawl
//! has finished and every record has been dispatched, so returning from
//! `export` means the exporter has seen everything. Flush before returning.

mod console;
mod delimited;
mod json_lines;

pub use console::ConsoleExporter;
pub use delimited::CsvExporter;
pub use json_lines::JsonLinesExporter;

use crate::error::SpiderError;
use crate::item::ScrapedItem;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// A destination for scraped records.
#[async_trait]
pub trait Exporter<I: ScrapedItem>: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Consumes records until the channel is closed, then flushes.
    async fn export(&self, items: UnboundedReceiver<I>) -> Result<(), SpiderError>;
}
