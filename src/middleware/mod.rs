//! # Middleware Module
//!
//! Request and response processors that run around every dispatch.
//!
//! ## Overview
//!
//! Request processors run in registration order before a request is served
//! from the cache or sent over the network. Response processors run in
//! registration order on every response, cached or fetched. Either kind may
//! edit its argument in place and may return [`MiddlewareAction::Cancel`] to end
//! the request quietly: cancellation is an expected outcome (a filtered domain,
//! a robots.txt denial), not an error.
//!
//! Processors run again on every retry and redirect of the same request, so
//! they must be idempotent.
//!
//! ## Built-in processors
//!
//! - [`AllowedDomainsMiddleware`]: drops requests to hosts outside an allow-list
//! - [`RobotsTxtMiddleware`]: consults a [`RobotsGate`]
//! - [`DefaultHeadersMiddleware`]: fills in `User-Agent`, `Accept`, `Accept-Charset`
//! - [`LogStatsMiddleware`]: logs every crawled response

mod allowed_domains;
mod default_headers;
mod log_stats;
mod robots;

pub use allowed_domains::AllowedDomainsMiddleware;
pub use default_headers::DefaultHeadersMiddleware;
pub use log_stats::LogStatsMiddleware;
pub use robots::{RobotsGate, RobotsTxtMiddleware};

use crate::error::SpiderError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;

/// What the pipeline should do after a processor ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareAction {
    /// Hand the (possibly edited) value to the next processor.
    Continue,
    /// Stop here and move the request to its cancelled state.
    Cancel(String),
}

/// Runs before dispatch and may edit or cancel the request.
#[async_trait]
pub trait RequestProcessor: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn process_request(&self, request: &mut Request) -> Result<MiddlewareAction, SpiderError>;
}

/// Runs after a response is available and may edit it or cancel the request.
#[async_trait]
pub trait ResponseProcessor: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn process_response(&self, response: &mut Response) -> Result<MiddlewareAction, SpiderError>;
}
