//! # Response Parser Module
//!
//! Runs the spider's `parse` on succeeded responses.
//!
//! ## Overview
//!
//! A fixed pool of workers shares the response channel. Each worker parses one
//! response at a time, enqueues the follow-up requests through the scheduler,
//! sends the records to the export fan-in channel and only then drops the
//! response's [`Lifecycle`]. Follow-ups are therefore counted as outstanding
//! before their parent stops being outstanding.
//!
//! A parse error is a terminal failure of that request alone: it is reported
//! to [`Spider::handle_failure`] and the crawl goes on.

use crate::item::{ParseOutput, ScrapedItem};
use crate::response::Response;
use crate::scheduler::Scheduler;
use crate::spider::Spider;
use crate::state::{CrawlerState, Lifecycle};
use crate::stats::StatCollector;
use kanal::AsyncReceiver;
use log::{debug, error, trace, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;

pub fn spawn_parser_task<S>(
    scheduler: Arc<Scheduler>,
    spider: Arc<S>,
    state: Arc<CrawlerState>,
    res_rx: AsyncReceiver<(Response, Lifecycle)>,
    item_tx: UnboundedSender<S::Item>,
    parser_workers: usize,
    stats: Arc<StatCollector>,
) -> tokio::task::JoinHandle<()>
where
    S: Spider,
{
    let mut workers = JoinSet::new();

    for worker_id in 0..parser_workers {
        let res_rx = res_rx.clone();
        let spider = Arc::clone(&spider);
        let scheduler = Arc::clone(&scheduler);
        let item_tx = item_tx.clone();
        let state = Arc::clone(&state);
        let stats = Arc::clone(&stats);

        workers.spawn(async move {
            trace!("Parser worker {} started", worker_id);
            while let Ok((response, lifecycle)) = res_rx.recv().await {
                debug!("Parsing response from {}", response.url);
                state.parsing_responses.fetch_add(1, Ordering::SeqCst);

                let request = response.shared_request();
                match spider.parse(response).await {
                    Ok(outputs) => {
                        process_crawl_outputs::<S>(outputs, &scheduler, &item_tx, &stats).await;
                    }
                    Err(e) => {
                        error!("Spider parsing error for {}: {}", request.url, e);
                        stats.increment_parse_errors();
                        spider.handle_failure(&request, &e).await;
                    }
                }

                state.parsing_responses.fetch_sub(1, Ordering::SeqCst);
                drop(lifecycle);
            }
            trace!("Parser worker {} finished", worker_id);
        });
    }

    tokio::spawn(async move {
        trace!("Response parser started with {} workers", parser_workers);
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!("A parsing worker task failed: {:?}", e);
            }
        }
        trace!("Response parser finished");
    })
}

/// Enqueues the follow-up requests, then sends the records to export.
pub async fn process_crawl_outputs<S>(
    outputs: ParseOutput<S::Item>,
    scheduler: &Scheduler,
    item_tx: &UnboundedSender<S::Item>,
    stats: &StatCollector,
) where
    S: Spider,
    S::Item: ScrapedItem,
{
    let (items, requests) = outputs.into_parts();
    let items_len = items.len();
    let requests_len = requests.len();

    if requests_len == 0 && items_len == 0 {
        trace!("Spider output contained no requests or items");
        return;
    }
    debug!(
        "Processing {} requests and {} items from spider output.",
        requests_len, items_len
    );

    let mut request_error_total = 0;
    for request in requests {
        if let Err(e) = scheduler.enqueue_request(request).await {
            error!("Failed to enqueue request: {}", e);
            request_error_total += 1;
        }
    }
    if request_error_total > 0 {
        warn!(
            "Failed to enqueue {} of {} requests.",
            request_error_total, requests_len
        );
    }

    stats.add_items_scraped(items_len);
    let mut item_error_total = 0;
    for item in items {
        if item_tx.send(item).is_err() {
            item_error_total += 1;
        }
    }
    if item_error_total > 0 {
        warn!(
            "Failed to send {} of {} scraped items; export channel closed.",
            item_error_total, items_len
        );
    }
}
