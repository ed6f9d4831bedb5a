//! Contains the per-request state machine and the dispatch loop.
//!
//! Every request pulled from the scheduler gets its own task. The task walks
//! the request through
//!
//! ```text
//! Queued -> Admitted -> Dispatched -> Succeeded | Cancelled | Failed
//!                                  -> Retrying | Redirected -> Queued
//! ```
//!
//! Retrying and redirected requests go back to `Queued` inside the same task:
//! the admission token is dropped, the backoff (if any) is slept, and the
//! token is acquired again. The dedup check is never repeated for them.
//!
//! A succeeded response is handed to the parser workers. Cancelled and failed
//! requests finish their lifecycle here.

use crate::builder::CrawlerConfig;
use crate::cache::{CacheEntry, CacheLookup, HttpCache};
use crate::concurrency::{AdmissionControl, AdmissionToken, OriginThrottle};
use crate::crawler::MiddlewareManager;
use crate::downloader::Downloader;
use crate::error::{DownloadError, SpiderError};
use crate::middleware::MiddlewareAction;
use crate::request::Request;
use crate::response::Response;
use crate::scheduler::Scheduler;
use crate::spider::Spider;
use crate::state::{CrawlerState, Lifecycle};
use crate::stats::StatCollector;

use chrono::Utc;
use http::header::{self, HeaderMap};
use http::{Method, StatusCode};
use kanal::{AsyncReceiver, AsyncSender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    Admitted,
    Dispatched,
    Retrying,
    Redirected,
    Succeeded,
    Cancelled,
    Failed,
}

/// The terminal result of [`RequestHandler::handle`].
#[derive(Debug)]
pub enum RequestOutcome {
    Succeeded(Response),
    Cancelled { request: Request, reason: String },
    Failed { request: Request, error: SpiderError },
}

impl RequestOutcome {
    pub fn state(&self) -> RequestState {
        match self {
            RequestOutcome::Succeeded(_) => RequestState::Succeeded,
            RequestOutcome::Cancelled { .. } => RequestState::Cancelled,
            RequestOutcome::Failed { .. } => RequestState::Failed,
        }
    }
}

// Result of one pass through Admitted -> Dispatched.
enum Step {
    Done(RequestOutcome),
    Retry(Duration),
    Redirect,
}

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Drives single requests from `Queued` to a terminal state.
#[derive(Clone)]
pub struct RequestHandler {
    config: Arc<CrawlerConfig>,
    admission: Arc<AdmissionControl>,
    throttle: Arc<OriginThrottle>,
    middlewares: MiddlewareManager,
    downloader: Arc<dyn Downloader>,
    cache: Option<HttpCache>,
    scheduler: Arc<Scheduler>,
    stats: Arc<StatCollector>,
}

impl RequestHandler {
    pub fn new(
        config: Arc<CrawlerConfig>,
        middlewares: MiddlewareManager,
        downloader: Arc<dyn Downloader>,
        cache: Option<HttpCache>,
        scheduler: Arc<Scheduler>,
        stats: Arc<StatCollector>,
    ) -> Self {
        Self {
            admission: Arc::new(AdmissionControl::new(
                config.concurrent_requests,
                config.concurrent_requests_per_domain,
            )),
            throttle: Arc::new(OriginThrottle::new(
                config.request_delay,
                config.request_delay_randomize,
            )),
            config,
            middlewares,
            downloader,
            cache,
            scheduler,
            stats,
        }
    }

    pub fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    /// Runs `request` until it succeeds, is cancelled or fails.
    pub async fn handle(&self, mut request: Request) -> RequestOutcome {
        loop {
            trace!("{:?} {}", RequestState::Queued, request.url);
            let token = self.admission.acquire(&request.origin()).await;
            trace!("{:?} {}", RequestState::Admitted, request.url);

            match self.dispatch(&mut request, token).await {
                Step::Done(outcome) => {
                    trace!("{:?} {}", outcome.state(), request.url);
                    return outcome;
                }
                Step::Retry(delay) => {
                    trace!(
                        "{:?} {} (attempt {}, backoff {:?})",
                        RequestState::Retrying,
                        request.url,
                        request.retry_times,
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Step::Redirect => {
                    trace!("{:?} {}", RequestState::Redirected, request.url);
                }
            }
        }
    }

    // Holds the admission token for exactly one pass; it is released when this
    // returns, before any backoff sleep.
    async fn dispatch(&self, request: &mut Request, _token: AdmissionToken) -> Step {
        match self.middlewares.process_request(request).await {
            Ok(MiddlewareAction::Continue) => {}
            Ok(MiddlewareAction::Cancel(reason)) => return self.cancelled(request, reason),
            Err(e) => return self.failed(request, e),
        }

        let mut stale: Option<CacheEntry> = None;
        if let Some(cache) = &self.cache {
            match cache.lookup(request, Utc::now()).await {
                Ok(CacheLookup::Fresh(entry)) => {
                    trace!("{:?} {} (from cache)", RequestState::Dispatched, request.url);
                    return match entry.to_response(request.clone()) {
                        Ok(response) => {
                            self.stats.increment_responses_from_cache();
                            self.finish_response(request, response).await
                        }
                        Err(e) => {
                            self.storage_error(request, &e.to_string());
                            self.fetch(request, None).await
                        }
                    };
                }
                Ok(CacheLookup::Stale(entry)) => stale = Some(entry),
                Ok(CacheLookup::Miss) => {}
                Err(e) => self.storage_error(request, &e.to_string()),
            }
        }

        self.fetch(request, stale).await
    }

    async fn fetch(&self, request: &mut Request, stale: Option<CacheEntry>) -> Step {
        let mut outgoing = request.clone();
        if let (Some(entry), Some(cache)) = (&stale, &self.cache) {
            for (name, value) in cache.policy().conditional_headers(entry).iter() {
                outgoing.headers.insert(name.clone(), value.clone());
            }
        }

        self.throttle.wait(&request.origin()).await;
        trace!("{:?} {}", RequestState::Dispatched, request.url);
        self.stats.increment_requests_sent();

        let timeout = self.config.timeout;
        let result = match tokio::time::timeout(timeout, self.downloader.download(&outgoing)).await
        {
            Ok(result) => result,
            Err(_) => Err(DownloadError::Timeout(timeout)),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_transient() => {
                debug!("Transient download error for {}: {}", request.url, e);
                return match self.schedule_retry(request) {
                    Some(delay) => Step::Retry(delay),
                    None => self.failed(request, SpiderError::Download(e)),
                };
            }
            Err(e) => return self.failed(request, SpiderError::Download(e)),
        };

        self.stats.increment_responses_received();
        self.stats.record_response_status(response.status.as_u16());
        self.stats.add_bytes_downloaded(response.body.len());

        if response.status == StatusCode::NOT_MODIFIED {
            if let (Some(cache), Some(entry)) = (&self.cache, stale) {
                return self.revalidated(request, entry, cache, &response.headers).await;
            }
        }

        let status = response.status.as_u16();
        if self.config.retry_http_codes.contains(&status) {
            debug!("Retryable status {} for {}", status, request.url);
            return match self.schedule_retry(request) {
                Some(delay) => Step::Retry(delay),
                None => self.failed(
                    request,
                    SpiderError::RetriesExhausted {
                        url: request.url.to_string(),
                        status,
                    },
                ),
            };
        }

        if REDIRECT_STATUSES.contains(&status) {
            if let Some(location) = response.header_str(header::LOCATION.as_str()) {
                let location = location.to_string();
                return match self.follow_redirect(request, response.status, &location) {
                    Ok(()) => Step::Redirect,
                    Err(e) => self.failed(request, e),
                };
            }
        }

        match self.finish_response(request, response).await {
            Step::Done(RequestOutcome::Succeeded(response)) => {
                self.store(request, &response).await;
                Step::Done(RequestOutcome::Succeeded(response))
            }
            other => other,
        }
    }

    async fn revalidated(
        &self,
        request: &mut Request,
        entry: CacheEntry,
        cache: &HttpCache,
        not_modified: &HeaderMap,
    ) -> Step {
        self.stats.increment_responses_revalidated();
        let response = match entry.revalidated(request.clone(), not_modified) {
            Ok(response) => response,
            Err(e) => {
                self.storage_error(request, &e.to_string());
                return self.failed(request, SpiderError::Storage(e));
            }
        };
        debug!("Revalidated cache entry for {}", request.url);

        match self.finish_response(request, response).await {
            Step::Done(RequestOutcome::Succeeded(response)) => {
                match cache.save(request, &response, Utc::now()).await {
                    Ok(Some(_)) => self.stats.increment_cache_stores(),
                    Ok(None) => {}
                    Err(e) => self.storage_error(request, &e.to_string()),
                }
                Step::Done(RequestOutcome::Succeeded(response))
            }
            other => other,
        }
    }

    // Runs the response processors and produces the terminal step.
    async fn finish_response(&self, request: &Request, mut response: Response) -> Step {
        match self.middlewares.process_response(&mut response).await {
            Ok(MiddlewareAction::Continue) => {
                self.stats.increment_requests_succeeded();
                Step::Done(RequestOutcome::Succeeded(response))
            }
            Ok(MiddlewareAction::Cancel(reason)) => self.cancelled(request, reason),
            Err(e) => self.failed(request, e),
        }
    }

    async fn store(&self, request: &Request, response: &Response) {
        let Some(cache) = &self.cache else {
            return;
        };
        match cache.save(request, response, Utc::now()).await {
            Ok(Some(_)) => self.stats.increment_cache_stores(),
            Ok(None) => {}
            Err(e) => self.storage_error(request, &e.to_string()),
        }
    }

    /// Bumps the retry count and returns the backoff, or `None` when the
    /// request has no retries left.
    fn schedule_retry(&self, request: &mut Request) -> Option<Duration> {
        let max = self.config.retry_times;
        if max < 0 || i64::from(request.retry_times) >= i64::from(max) {
            return None;
        }
        request.retry_times += 1;
        self.stats.increment_requests_retried();
        Some(self.backoff_for(request.retry_times))
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.config
            .retry_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.config.max_retry_backoff)
            .min(self.config.max_retry_backoff)
    }

    fn follow_redirect(
        &self,
        request: &mut Request,
        status: StatusCode,
        location: &str,
    ) -> Result<(), SpiderError> {
        if request.redirect_times >= self.config.max_redirects {
            return Err(SpiderError::TooManyRedirects {
                url: request.url.to_string(),
                count: request.redirect_times,
            });
        }

        let target = request
            .url
            .join(location)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| SpiderError::InvalidRedirect {
                url: request.url.to_string(),
                location: location.to_string(),
            })?;

        let is_safe = request.method == Method::GET || request.method == Method::HEAD;
        let downgrade = match status.as_u16() {
            303 => request.method != Method::HEAD,
            301 | 302 => !is_safe,
            _ => false,
        };
        if downgrade {
            request.method = Method::GET;
            request.body = None;
            request.headers.remove(header::CONTENT_TYPE);
            request.headers.remove(header::CONTENT_LENGTH);
        }

        if target.host_str() != request.url.host_str() {
            request.headers.remove(header::AUTHORIZATION);
            request.headers.remove(header::COOKIE);
        }

        debug!(
            "Redirecting ({}) {} -> {}",
            status.as_u16(),
            request.url,
            target
        );
        request.url = target;
        request.redirect_times += 1;
        self.stats.increment_requests_redirected();
        self.scheduler.mark_seen(request.fingerprint());
        Ok(())
    }

    fn cancelled(&self, request: &Request, reason: String) -> Step {
        debug!("Request cancelled: {} ({})", request.url, reason);
        self.stats.increment_requests_cancelled();
        Step::Done(RequestOutcome::Cancelled {
            request: request.clone(),
            reason,
        })
    }

    fn failed(&self, request: &Request, error: SpiderError) -> Step {
        self.stats.increment_requests_failed();
        Step::Done(RequestOutcome::Failed {
            request: request.clone(),
            error,
        })
    }

    fn storage_error(&self, request: &Request, message: &str) {
        warn!("Cache storage error for {}: {}", request.url, message);
        self.stats.increment_storage_errors();
    }
}

/// Pulls requests from the scheduler and runs each in its own task.
///
/// Succeeded responses go to `res_tx` together with their [`Lifecycle`], which
/// the parser drops once the response is fully handled. Cancelled and failed
/// requests finish their lifecycle here. Returns once the request channel is closed and every
/// spawned request has finished.
pub fn spawn_downloader_task<S>(
    scheduler: Arc<Scheduler>,
    req_rx: AsyncReceiver<Request>,
    handler: RequestHandler,
    spider: Arc<S>,
    state: Arc<CrawlerState>,
    res_tx: AsyncSender<(Response, Lifecycle)>,
) -> tokio::task::JoinHandle<()>
where
    S: Spider,
{
    tokio::spawn(async move {
        trace!("Downloader task started");
        let mut tasks = JoinSet::new();

        while let Ok(request) = req_rx.recv().await {
            scheduler.mark_dequeued();
            let lifecycle = Lifecycle::resume(&state);
            state.in_flight_requests.fetch_add(1, Ordering::SeqCst);

            let handler = handler.clone();
            let spider = Arc::clone(&spider);
            let state = Arc::clone(&state);
            let res_tx = res_tx.clone();

            tasks.spawn(async move {
                match handler.handle(request).await {
                    RequestOutcome::Succeeded(response) => {
                        trace!("Sending response for URL: {}", response.url);
                        if res_tx.send((response, lifecycle)).await.is_err() {
                            error!("Response channel closed, cannot send response for parsing.");
                        }
                    }
                    RequestOutcome::Cancelled { .. } => drop(lifecycle),
                    RequestOutcome::Failed { request, error } => {
                        spider.handle_failure(&request, &error).await;
                        drop(lifecycle);
                    }
                }
                state.in_flight_requests.fetch_sub(1, Ordering::SeqCst);
            });

            while let Some(res) = tasks.try_join_next() {
                if let Err(e) = res {
                    error!("A download task failed: {:?}", e);
                }
            }
        }

        trace!("Waiting for active download tasks to complete");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!("A download task failed: {:?}", e);
            }
        }
        trace!("Downloader task finished");
    })
}
