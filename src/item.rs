//! Records produced by parsing, and the [`ParseOutput`] container.

use crate::request::Request;
use serde::Serialize;
use std::fmt::Debug;

/// A record extracted from a response and streamed to the exporters.
///
/// Implemented for every type that is serializable, cloneable and can move
/// between tasks; records are cloned once per exporter.
pub trait ScrapedItem: Serialize + Clone + Debug + Send + Sync + 'static {}

impl<T> ScrapedItem for T where T: Serialize + Clone + Debug + Send + Sync + 'static {}

/// The items and follow-up requests produced by one call to
/// [`Spider::parse`](crate::spider::Spider::parse).
#[derive(Debug)]
pub struct ParseOutput<I> {
    items: Vec<I>,
    requests: Vec<Request>,
}

impl<I> ParseOutput<I> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            requests: Vec::new(),
        }
    }

    pub fn add_item(&mut self, item: I) {
        self.items.push(item);
    }

    pub fn add_items(&mut self, items: impl IntoIterator<Item = I>) {
        self.items.extend(items);
    }

    pub fn add_request(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn add_requests(&mut self, requests: impl IntoIterator<Item = Request>) {
        self.requests.extend(requests);
    }

    pub fn into_parts(self) -> (Vec<I>, Vec<Request>) {
        (self.items, self.requests)
    }
}

impl<I> Default for ParseOutput<I> {
    fn default() -> Self {
        Self::new()
    }
}
