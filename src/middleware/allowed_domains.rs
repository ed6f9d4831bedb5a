use super::{MiddlewareAction, RequestProcessor};
use crate::error::SpiderError;
use crate::request::Request;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

/// Cancels requests whose host is not in the allow-list.
///
/// Hosts are compared exactly: a subdomain is a different host. An empty list
/// allows everything.
#[derive(Debug, Clone, Default)]
pub struct AllowedDomainsMiddleware {
    allowed: HashSet<String>,
}

impl AllowedDomainsMiddleware {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: domains
                .into_iter()
                .map(|d| d.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&host.to_ascii_lowercase())
    }
}

#[async_trait]
impl RequestProcessor for AllowedDomainsMiddleware {
    fn name(&self) -> &str {
        "AllowedDomainsMiddleware"
    }

    async fn process_request(&self, request: &mut Request) -> Result<MiddlewareAction, SpiderError> {
        let host = request.url.host_str().unwrap_or_default();
        if self.is_allowed(host) {
            return Ok(MiddlewareAction::Continue);
        }
        debug!("Domain not allowed: {}", host);
        Ok(MiddlewareAction::Cancel(format!("domain not allowed: {}", host)))
    }
}
