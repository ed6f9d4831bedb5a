use super::{MiddlewareAction, RequestProcessor};
use crate::error::SpiderError;
use crate::request::Request;
use async_trait::async_trait;
use http::header::{self, HeaderName, HeaderValue};

/// Sets default headers on requests that do not already carry them.
#[derive(Debug, Clone)]
pub struct DefaultHeadersMiddleware {
    defaults: Vec<(HeaderName, HeaderValue)>,
}

impl DefaultHeadersMiddleware {
    /// Defaults for `User-Agent`, `Accept` and `Accept-Charset`.
    pub fn new(user_agent: &str) -> Result<Self, SpiderError> {
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| SpiderError::ConfigurationError(format!("invalid user agent: {}", e)))?;
        Ok(Self {
            defaults: vec![
                (
                    header::ACCEPT,
                    HeaderValue::from_static(
                        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                    ),
                ),
                (header::ACCEPT_CHARSET, HeaderValue::from_static("utf-8")),
                (header::USER_AGENT, user_agent),
            ],
        })
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.defaults.retain(|(existing, _)| *existing != name);
        self.defaults.push((name, value));
        self
    }
}

#[async_trait]
impl RequestProcessor for DefaultHeadersMiddleware {
    fn name(&self) -> &str {
        "DefaultHeadersMiddleware"
    }

    async fn process_request(&self, request: &mut Request) -> Result<MiddlewareAction, SpiderError> {
        for (name, value) in &self.defaults {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        Ok(MiddlewareAction::Continue)
    }
}
