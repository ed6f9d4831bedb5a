//! # Scheduler Module
//!
//! The crawl frontier: the queue of requests waiting for admission and the set
//! of fingerprints already seen.
//!
//! ## Overview
//!
//! Every new request enters the crawl through [`Scheduler::enqueue_request`].
//! Unless URL revisiting is enabled, the first enqueue of a fingerprint marks
//! it seen and later enqueues of the same fingerprint are skipped. The check
//! and the mark are one atomic `DashSet::insert`, so two parser workers racing
//! on the same link cannot both get it through.
//!
//! Accepting a request opens its lifecycle in [`CrawlerState`]; the lifecycle
//! is closed by whoever moves the request to a terminal state. Retries and
//! redirects continue the same lifecycle inside the request's task and never
//! pass through the frontier again.
//!
//! ## Example
//!
//! ```rust,ignore
//! let (scheduler, requests) = Scheduler::new(false, state, stats);
//!
//! scheduler.enqueue_request(Request::get("https://example.com")?).await?;
//! let next = requests.recv().await?;
//! ```

use crate::error::SpiderError;
use crate::request::Request;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use dashmap::DashSet;
use kanal::{unbounded_async, AsyncReceiver, AsyncSender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

pub struct Scheduler {
    tx_req: AsyncSender<Request>,
    seen: DashSet<String>,
    url_revisit_enabled: bool,
    pending_requests: AtomicUsize,
    pub(crate) is_shutting_down: AtomicBool,
    state: Arc<CrawlerState>,
    stats: Arc<StatCollector>,
}

impl Scheduler {
    /// Creates a new `Scheduler` and the receiver the dispatch loop pulls from.
    pub fn new(
        url_revisit_enabled: bool,
        state: Arc<CrawlerState>,
        stats: Arc<StatCollector>,
    ) -> (Arc<Self>, AsyncReceiver<Request>) {
        let (tx_req, rx_req) = unbounded_async();

        let scheduler = Arc::new(Scheduler {
            tx_req,
            seen: DashSet::new(),
            url_revisit_enabled,
            pending_requests: AtomicUsize::new(0),
            is_shutting_down: AtomicBool::new(false),
            state,
            stats,
        });

        (scheduler, rx_req)
    }

    /// Enqueues a new request.
    ///
    /// Returns `Ok(false)` when the request was skipped as a duplicate or
    /// because the crawl is shutting down.
    pub async fn enqueue_request(&self, request: Request) -> Result<bool, SpiderError> {
        if self.is_shutting_down.load(Ordering::SeqCst) {
            debug!("Scheduler is shutting down, dropping request: {}", request.url);
            return Ok(false);
        }

        if !self.url_revisit_enabled && !self.seen.insert(request.fingerprint()) {
            trace!("Request already seen, skipping: {}", request.url);
            self.stats.increment_requests_duplicate();
            return Ok(false);
        }

        trace!("Enqueuing request: {}", request.url);
        self.state.begin_request();
        self.pending_requests.fetch_add(1, Ordering::SeqCst);

        let url = request.url.clone();
        if self.tx_req.send(request).await.is_err() {
            self.pending_requests.fetch_sub(1, Ordering::SeqCst);
            self.state.finish_request();
            return Err(SpiderError::GeneralError(format!(
                "Scheduler request channel closed, request dropped: {}",
                url
            )));
        }

        self.stats.increment_requests_enqueued();
        Ok(true)
    }

    /// Records that the dispatch loop took a request off the queue.
    pub(crate) fn mark_dequeued(&self) {
        self.pending_requests.fetch_sub(1, Ordering::SeqCst);
    }

    /// Marks a fingerprint as seen without enqueueing anything.
    ///
    /// Used for redirect targets so that later links to the same URL are not
    /// fetched a second time.
    pub fn mark_seen(&self, fingerprint: String) {
        if !self.url_revisit_enabled {
            self.seen.insert(fingerprint);
        }
    }

    pub fn has_been_seen(&self, fingerprint: &str) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Stops accepting requests and closes the queue.
    ///
    /// The dispatch loop sees the closed channel and exits once its in-flight
    /// requests have finished.
    pub fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "Scheduler shutting down with {} pending requests.",
            self.pending_requests.load(Ordering::SeqCst)
        );
        let _ = self.tx_req.close();
    }

    /// Number of requests enqueued but not yet picked up by the dispatch loop.
    #[inline]
    pub fn len(&self) -> usize {
        self.pending_requests.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
