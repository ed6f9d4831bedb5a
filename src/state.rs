//! Module for tracking the operational state of the crawler.
//!
//! `CrawlerState` counts request lifecycles that have been accepted by the
//! scheduler but are not finished yet. A lifecycle is finished when the request
//! is cancelled or failed, or when it succeeded and its response has been
//! parsed, its follow-up requests enqueued and its records sent to export.
//! Follow-ups are enqueued before their parent finishes, so the count can only
//! reach zero once the whole crawl graph is exhausted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared state of the crawler's actors.
#[derive(Debug, Default)]
pub struct CrawlerState {
    /// Lifecycles accepted by the scheduler and not yet finished.
    outstanding: AtomicUsize,
    /// Requests currently between admission and a response (or terminal state).
    pub in_flight_requests: AtomicUsize,
    /// Responses currently being parsed.
    pub parsing_responses: AtomicUsize,
    idle: Notify,
}

impl CrawlerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn begin_request(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finish_request(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "finish_request without begin_request");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }

    /// Resolves once no lifecycle is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a wake between the check and the
            // await is not lost.
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// One open request lifecycle. Finishes it when dropped.
///
/// Holding the guard instead of calling `finish_request` by hand keeps the
/// count right when a task panics or a channel drops its messages.
#[derive(Debug)]
pub struct Lifecycle {
    state: Arc<CrawlerState>,
}

impl Lifecycle {
    /// Takes ownership of a lifecycle the scheduler already opened.
    pub(crate) fn resume(state: &Arc<CrawlerState>) -> Self {
        Self {
            state: Arc::clone(state),
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.state.finish_request();
    }
}
