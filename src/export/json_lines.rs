use super::Exporter;
use crate::error::SpiderError;
use crate::item::ScrapedItem;
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::UnboundedReceiver;

/// Appends one JSON document per line to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesExporter {
    path: PathBuf,
}

impl JsonLinesExporter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<I: ScrapedItem> Exporter<I> for JsonLinesExporter {
    fn name(&self) -> &str {
        "JsonLinesExporter"
    }

    async fn export(&self, mut items: UnboundedReceiver<I>) -> Result<(), SpiderError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut writer = BufWriter::new(file);
        debug!("JsonLinesExporter writing to {}", self.path.display());

        let mut count = 0usize;
        while let Some(item) = items.recv().await {
            let mut line = serde_json::to_vec(&item)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            count += 1;
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        info!(
            "JsonLinesExporter wrote {} items to {}",
            count,
            self.path.display()
        );
        Ok(())
    }
}
