use super::{MiddlewareAction, RequestProcessor};
use crate::error::SpiderError;
use crate::request::Request;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// External robots.txt decision. Fetching and parsing the file is up to the
/// implementor.
#[async_trait]
pub trait RobotsGate: Send + Sync + 'static {
    async fn is_allowed(&self, url: &Url, user_agent: &str) -> bool;
}

/// Cancels requests the [`RobotsGate`] denies.
pub struct RobotsTxtMiddleware {
    gate: Arc<dyn RobotsGate>,
    user_agent: String,
}

impl RobotsTxtMiddleware {
    pub fn new(gate: Arc<dyn RobotsGate>, user_agent: impl Into<String>) -> Self {
        Self {
            gate,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl RequestProcessor for RobotsTxtMiddleware {
    fn name(&self) -> &str {
        "RobotsTxtMiddleware"
    }

    async fn process_request(&self, request: &mut Request) -> Result<MiddlewareAction, SpiderError> {
        if self.gate.is_allowed(&request.url, &self.user_agent).await {
            Ok(MiddlewareAction::Continue)
        } else {
            debug!("Forbidden by robots.txt: {}", request.url);
            Ok(MiddlewareAction::Cancel(format!(
                "forbidden by robots.txt: {}",
                request.url
            )))
        }
    }
}
