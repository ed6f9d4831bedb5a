//! The core Crawler implementation.
//!
//! `Crawler` wires the scheduler, the per-request state machine, the parser
//! workers and the export dispatcher together and runs a crawl to completion.
//!
//! Shutdown is driven by the outstanding-lifecycle count in [`CrawlerState`]:
//! once every accepted request is terminal and every succeeded response has
//! been parsed, the request queue is closed, the parser workers drain, the
//! export channel is closed and every exporter is awaited. Nothing is cut off
//! by a timer.

use crate::builder::CrawlerConfig;
use crate::cache::HttpCache;
use crate::error::SpiderError;
use crate::export::Exporter;
use crate::request::Request;
use crate::scheduler::Scheduler;
use crate::spider::Spider;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use kanal::{bounded_async, AsyncReceiver};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, error, info, trace, warn};

use super::RequestHandler;

/// The central orchestrator of a crawl.
pub struct Crawler<S: Spider> {
    config: Arc<CrawlerConfig>,
    scheduler: Arc<Scheduler>,
    req_rx: AsyncReceiver<Request>,
    state: Arc<CrawlerState>,
    stats: Arc<StatCollector>,
    handler: RequestHandler,
    spider: Arc<S>,
    exporters: Vec<Arc<dyn Exporter<S::Item>>>,
    cache: Option<HttpCache>,
}

impl<S: Spider> Crawler<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<CrawlerConfig>,
        scheduler: Arc<Scheduler>,
        req_rx: AsyncReceiver<Request>,
        state: Arc<CrawlerState>,
        stats: Arc<StatCollector>,
        handler: RequestHandler,
        spider: S,
        exporters: Vec<Arc<dyn Exporter<S::Item>>>,
        cache: Option<HttpCache>,
    ) -> Self {
        Crawler {
            config,
            scheduler,
            req_rx,
            state,
            stats,
            handler,
            spider: Arc::new(spider),
            exporters,
            cache,
        }
    }

    /// Runs the crawl until every request has finished or Ctrl-C is received.
    pub async fn start_crawl(self) -> Result<(), SpiderError> {
        info!(
            "Crawler starting crawl with configuration: concurrent_requests={}, concurrent_requests_per_domain={}, parser_workers={}, exporters={}",
            self.config.concurrent_requests,
            self.config.concurrent_requests_per_domain,
            self.config.parser_workers,
            self.exporters.len()
        );

        let Crawler {
            config,
            scheduler,
            req_rx,
            state,
            stats,
            handler,
            spider,
            exporters,
            cache,
        } = self;

        trace!(
            "Creating response channel with capacity: {}",
            config.channel_capacity
        );
        let (res_tx, res_rx) = bounded_async(config.channel_capacity);
        let (item_tx, item_rx) = unbounded_channel();

        trace!("Spawning item processor task");
        let item_processor_task =
            super::spawn_item_processor_task(item_rx, exporters, Arc::clone(&stats));

        trace!("Spawning parser task");
        let parser_task = super::spawn_parser_task::<S>(
            Arc::clone(&scheduler),
            Arc::clone(&spider),
            Arc::clone(&state),
            res_rx,
            item_tx,
            config.parser_workers,
            Arc::clone(&stats),
        );

        trace!("Spawning downloader task");
        let downloader_task = super::spawn_downloader_task::<S>(
            Arc::clone(&scheduler),
            req_rx,
            handler,
            Arc::clone(&spider),
            Arc::clone(&state),
            res_tx,
        );

        // Seeds are enqueued before waiting so the barrier cannot see an empty
        // crawl that has not started yet.
        enqueue_start_requests(&scheduler, spider.as_ref()).await;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, initiating graceful shutdown.");
            }
            _ = state.wait_idle() => {
                info!("Crawl has become idle, initiating shutdown.");
            }
        };

        trace!("Closing request queue");
        scheduler.shutdown();
        if let Err(e) = downloader_task.await {
            error!("Downloader task failed during shutdown: {}", e);
        }

        // The downloader task owned the last response sender; parsers drain
        // and exit. They own the last item sender, which closes the export
        // fan-in channel once they are done.
        if let Err(e) = parser_task.await {
            error!("Parser task failed during shutdown: {}", e);
        }
        info!("Waiting for exporters to finish...");
        if let Err(e) = item_processor_task.await {
            error!("Export task failed during shutdown: {}", e);
        }
        debug!("All exporters finished");

        if let Some(cache) = &cache {
            if let Err(e) = cache.close().await {
                warn!("Failed to close cache storage: {}", e);
                stats.increment_storage_errors();
            }
        }

        info!(
            "Crawl finished. Stats: requests_enqueued={}, requests_succeeded={}, requests_failed={}, parse_errors={}, items_scraped={}",
            stats.requests_enqueued.load(Ordering::SeqCst),
            stats.requests_succeeded.load(Ordering::SeqCst),
            stats.requests_failed.load(Ordering::SeqCst),
            stats.parse_errors.load(Ordering::SeqCst),
            stats.items_scraped.load(Ordering::SeqCst)
        );
        Ok(())
    }

    /// Returns the `StatCollector` used by this crawler.
    ///
    /// Take it before calling `start_crawl` to read the counters during or
    /// after the crawl.
    pub fn get_stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }
}

async fn enqueue_start_requests<S: Spider>(scheduler: &Scheduler, spider: &S) {
    match spider.start_requests() {
        Ok(requests) => {
            for req in requests {
                if let Err(e) = scheduler.enqueue_request(req).await {
                    error!("Failed to enqueue initial request: {}", e);
                }
            }
        }
        Err(e) => error!("Failed to create start requests: {}", e),
    }
}
