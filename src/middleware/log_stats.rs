use super::{MiddlewareAction, ResponseProcessor};
use crate::error::SpiderError;
use crate::response::Response;
use async_trait::async_trait;
use tracing::info;

/// Logs one line per crawled response.
#[derive(Debug, Clone, Default)]
pub struct LogStatsMiddleware;

#[async_trait]
impl ResponseProcessor for LogStatsMiddleware {
    fn name(&self) -> &str {
        "LogStatsMiddleware"
    }

    async fn process_response(&self, response: &mut Response) -> Result<MiddlewareAction, SpiderError> {
        let request = response.request_from_response();
        info!(
            "Crawled: ({}) <{} {}>{}",
            response.status.as_u16(),
            request.method,
            request.url,
            if response.cached { " (cached)" } else { "" }
        );
        Ok(MiddlewareAction::Continue)
    }
}
