//! Test doubles shared by the unit tests.

use crate::downloader::Downloader;
use crate::error::{DownloadError, SpiderError, StorageError};
use crate::export::Exporter;
use crate::item::{ParseOutput, ScrapedItem};
use crate::request::Request;
use crate::response::Response;
use crate::spider::Spider;
use crate::storage::{CacheStorage, MemoryStorage};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Builds a response for `request` with the given status, headers and body.
pub fn respond(
    request: &Request,
    status: u16,
    headers: &[(&'static str, &str)],
    body: &str,
) -> Response {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(*name, HeaderValue::from_str(value).unwrap());
    }
    Response::new(
        request.clone(),
        StatusCode::from_u16(status).unwrap(),
        map,
        Bytes::from(body.to_string()),
    )
}

type Handler = dyn Fn(&Request, usize) -> Result<Response, DownloadError> + Send + Sync;

/// A scripted [`Downloader`].
///
/// The handler receives the request and how many times its URL was fetched
/// before. The double records every request it saw and the peak concurrency,
/// overall and per origin.
pub struct MockDownloader {
    handler: Box<Handler>,
    delay: Duration,
    calls_per_url: DashMap<String, usize>,
    seen: Mutex<Vec<Request>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    in_flight_per_origin: DashMap<String, usize>,
    max_in_flight_per_origin: AtomicUsize,
}

impl MockDownloader {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Request, usize) -> Result<Response, DownloadError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            calls_per_url: DashMap::new(),
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            in_flight_per_origin: DashMap::new(),
            max_in_flight_per_origin: AtomicUsize::new(0),
        }
    }

    /// Answers every request with `200 OK` and an empty body.
    pub fn ok() -> Self {
        Self::new(|request, _| Ok(respond(request, 200, &[], "")))
    }

    /// Holds every download for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn seen(&self) -> Vec<Request> {
        self.seen.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight_per_origin(&self) -> usize {
        self.max_in_flight_per_origin.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, request: &Request) -> Result<Response, DownloadError> {
        let origin = request.origin();
        let url = request.url.to_string();
        self.seen.lock().push(request.clone());
        let previous_calls = {
            let mut count = self.calls_per_url.entry(url).or_insert(0);
            *count += 1;
            *count - 1
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let now_for_origin = {
            let mut count = self.in_flight_per_origin.entry(origin.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.max_in_flight_per_origin
            .fetch_max(now_for_origin, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        if let Some(mut count) = self.in_flight_per_origin.get_mut(&origin) {
            *count -= 1;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.handler)(request, previous_calls)
    }
}

/// An exporter that appends every record to a shared vector.
pub struct CollectingExporter<I> {
    sink: Arc<Mutex<Vec<I>>>,
}

impl<I> CollectingExporter<I> {
    pub fn with_sink(sink: Arc<Mutex<Vec<I>>>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<I: ScrapedItem> Exporter<I> for CollectingExporter<I> {
    fn name(&self) -> &str {
        "CollectingExporter"
    }

    async fn export(&self, mut items: UnboundedReceiver<I>) -> Result<(), SpiderError> {
        while let Some(item) = items.recv().await {
            self.sink.lock().push(item);
        }
        Ok(())
    }
}

/// A [`MemoryStorage`] that counts operations and can be switched to fail.
#[derive(Default)]
pub struct CountingStorage {
    inner: MemoryStorage,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub failing: AtomicBool,
}

impl CountingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("storage offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for CountingStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        self.check()?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.inner.delete(key).await
    }
}

/// A spider with no seeds that produces nothing.
pub struct NoopSpider;

#[async_trait]
impl Spider for NoopSpider {
    type Item = String;

    async fn parse(&self, _response: Response) -> Result<ParseOutput<Self::Item>, SpiderError> {
        Ok(ParseOutput::new())
    }
}

/// A spider that walks a fixed link graph.
///
/// Every parsed response yields its URL as a record plus the configured
/// follow-ups. Responses whose URL is in `broken` fail to parse. Terminal
/// failures are recorded in `failures`.
#[derive(Default)]
pub struct LinkSpider {
    pub seeds: Vec<String>,
    pub links: HashMap<String, Vec<String>>,
    pub broken: Vec<String>,
    pub failures: Arc<Mutex<Vec<String>>>,
}

impl LinkSpider {
    pub fn new(seeds: &[&str]) -> Self {
        Self {
            seeds: seeds.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn link(mut self, from: &str, to: &[&str]) -> Self {
        self.links
            .insert(from.to_string(), to.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn broken(mut self, url: &str) -> Self {
        self.broken.push(url.to_string());
        self
    }
}

#[async_trait]
impl Spider for LinkSpider {
    type Item = String;

    fn start_urls(&self) -> Vec<String> {
        self.seeds.clone()
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput<Self::Item>, SpiderError> {
        let url = response.url.to_string();
        if self.broken.contains(&url) {
            return Err(SpiderError::GeneralError(format!("cannot parse {}", url)));
        }
        let mut output = ParseOutput::new();
        if let Some(links) = self.links.get(&url) {
            for link in links {
                output.add_request(Request::get(link)?);
            }
        }
        output.add_item(url);
        Ok(output)
    }

    async fn handle_failure(&self, request: &Request, _error: &SpiderError) {
        self.failures.lock().push(request.url.to_string());
    }
}

#[async_trait]
impl Downloader for Arc<MockDownloader> {
    async fn download(&self, request: &Request) -> Result<Response, DownloadError> {
        self.as_ref().download(request).await
    }
}
