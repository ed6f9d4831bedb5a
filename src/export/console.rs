use super::Exporter;
use crate::error::SpiderError;
use crate::item::ScrapedItem;
use async_trait::async_trait;
use log::info;
use tokio::sync::mpsc::UnboundedReceiver;

/// Logs every record as JSON at `info` level.
///
/// Used when no other exporter is registered.
#[derive(Debug, Clone, Default)]
pub struct ConsoleExporter;

impl ConsoleExporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<I: ScrapedItem> Exporter<I> for ConsoleExporter {
    fn name(&self) -> &str {
        "ConsoleExporter"
    }

    async fn export(&self, mut items: UnboundedReceiver<I>) -> Result<(), SpiderError> {
        let mut count = 0usize;
        while let Some(item) = items.recv().await {
            info!("Scraped item: {}", serde_json::to_string(&item)?);
            count += 1;
        }
        info!("ConsoleExporter finished after {} items", count);
        Ok(())
    }
}
