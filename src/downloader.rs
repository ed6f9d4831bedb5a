//! # Downloader Module
//!
//! The network side of a dispatch.
//!
//! A [`Downloader`] performs exactly one HTTP exchange per call. It never
//! follows redirects and never retries: both are decisions of the per-request
//! state machine, which needs to see every intermediate status. The per-attempt
//! timeout is also enforced by the caller.

use crate::error::DownloadError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Performs one network exchange for a request.
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    async fn download(&self, request: &Request) -> Result<Response, DownloadError>;
}

/// Settings for [`ReqwestDownloader`].
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub user_agent: String,
    pub cookies_enabled: bool,
    /// Bodies longer than this are truncated.
    pub max_body_size: usize,
    pub connect_timeout: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::builder::DEFAULT_USER_AGENT.to_string(),
            cookies_enabled: true,
            max_body_size: 1024 * 1024 * 1024,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A [`Downloader`] backed by a shared `reqwest::Client`.
pub struct ReqwestDownloader {
    client: reqwest::Client,
    max_body_size: usize,
}

impl ReqwestDownloader {
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent)
            .cookie_store(config.cookies_enabled)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            max_body_size: config.max_body_size,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Downloader for ReqwestDownloader {
    async fn download(&self, request: &Request) -> Result<Response, DownloadError> {
        let started = Instant::now();

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let mut res = builder.send().await?;
        let status = res.status();
        let headers: HeaderMap = std::mem::take(res.headers_mut());

        let mut body = BytesMut::new();
        while let Some(chunk) = res.chunk().await? {
            let remaining = self.max_body_size.saturating_sub(body.len());
            if chunk.len() > remaining {
                body.extend_from_slice(&chunk[..remaining]);
                warn!(
                    "Response body for {} exceeds {} bytes, truncating",
                    request.url, self.max_body_size
                );
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let mut response = Response::new(request.clone(), status, headers, Bytes::from(body));
        response.elapsed = started.elapsed();
        debug!(
            "Downloaded {} ({}) in {:?}",
            request.url, status, response.elapsed
        );
        Ok(response)
    }
}
