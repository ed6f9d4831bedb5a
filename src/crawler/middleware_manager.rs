//! Middleware manager shared by every in-flight request.
//!
//! The processor chains are fixed once the crawler is built, so they live
//! behind an `Arc` and are read concurrently without locking.

use crate::error::SpiderError;
use crate::middleware::{MiddlewareAction, RequestProcessor, ResponseProcessor};
use crate::request::Request;
use crate::response::Response;
use std::sync::Arc;
use tracing::trace;

/// Runs the request and response processor chains in registration order.
#[derive(Clone, Default)]
pub struct MiddlewareManager {
    request_processors: Arc<Vec<Box<dyn RequestProcessor>>>,
    response_processors: Arc<Vec<Box<dyn ResponseProcessor>>>,
}

impl MiddlewareManager {
    pub fn new(
        request_processors: Vec<Box<dyn RequestProcessor>>,
        response_processors: Vec<Box<dyn ResponseProcessor>>,
    ) -> Self {
        Self {
            request_processors: Arc::new(request_processors),
            response_processors: Arc::new(response_processors),
        }
    }

    /// Stops at the first processor that cancels or errors.
    pub async fn process_request(
        &self,
        request: &mut Request,
    ) -> Result<MiddlewareAction, SpiderError> {
        for processor in self.request_processors.iter() {
            match processor.process_request(request).await? {
                MiddlewareAction::Continue => {}
                action @ MiddlewareAction::Cancel(_) => {
                    trace!("{} cancelled {}", processor.name(), request.url);
                    return Ok(action);
                }
            }
        }
        Ok(MiddlewareAction::Continue)
    }

    /// Stops at the first processor that cancels or errors.
    pub async fn process_response(
        &self,
        response: &mut Response,
    ) -> Result<MiddlewareAction, SpiderError> {
        for processor in self.response_processors.iter() {
            match processor.process_response(response).await? {
                MiddlewareAction::Continue => {}
                action @ MiddlewareAction::Cancel(_) => {
                    trace!("{} cancelled response for {}", processor.name(), response.url);
                    return Ok(action);
                }
            }
        }
        Ok(MiddlewareAction::Continue)
    }

    pub fn request_processor_names(&self) -> Vec<&str> {
        self.request_processors.iter().map(|p| p.name()).collect()
    }

    pub fn response_processor_names(&self) -> Vec<&str> {
        self.response_processors.iter().map(|p| p.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        cancel: bool,
    }

    #[async_trait]
    impl RequestProcessor for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn process_request(
            &self,
            request: &mut Request,
        ) -> Result<MiddlewareAction, SpiderError> {
            self.log.lock().push(self.name);
            request.meta.insert(self.name.to_string(), serde_json::Value::Bool(true));
            if self.cancel {
                Ok(MiddlewareAction::Cancel(self.name.to_string()))
            } else {
                Ok(MiddlewareAction::Continue)
            }
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        cancel: bool,
    ) -> Box<dyn RequestProcessor> {
        Box::new(Recorder {
            name,
            log: log.clone(),
            cancel,
        })
    }

    #[tokio::test]
    async fn runs_in_registration_order_and_edits_in_place() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = MiddlewareManager::new(
            vec![recorder("first", &log, false), recorder("second", &log, false)],
            Vec::new(),
        );
        let mut request = Request::get("http://example.com/").unwrap();

        let action = manager.process_request(&mut request).await.unwrap();

        assert_eq!(action, MiddlewareAction::Continue);
        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert!(request.meta.contains_key("first"));
        assert!(request.meta.contains_key("second"));
    }

    #[tokio::test]
    async fn cancel_short_circuits_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = MiddlewareManager::new(
            vec![
                recorder("first", &log, true),
                recorder("second", &log, false),
            ],
            Vec::new(),
        );
        let mut request = Request::get("http://example.com/").unwrap();

        let action = manager.process_request(&mut request).await.unwrap();

        assert_eq!(action, MiddlewareAction::Cancel("first".into()));
        assert_eq!(*log.lock(), vec!["first"]);
    }

    #[tokio::test]
    async fn empty_chains_continue() {
        let manager = MiddlewareManager::default();
        let mut request = Request::get("http://example.com/").unwrap();
        assert_eq!(
            manager.process_request(&mut request).await.unwrap(),
            MiddlewareAction::Continue
        );
        assert!(manager.request_processor_names().is_empty());
    }
}
