use super::Exporter;
use crate::error::SpiderError;
use crate::item::ScrapedItem;
use async_trait::async_trait;
use csv::{Terminator, WriterBuilder};
use log::{debug, info};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::UnboundedReceiver;

const DEFAULT_FILE_NAME: &str = "out.csv";

/// Appends one CSV row per record to a file.
///
/// A record serialized as a JSON array yields one field per element. An
/// object yields its values, sorted as strings. Any other value is written as
/// a single field.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    path: PathBuf,
    delimiter: u8,
    use_crlf: bool,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_NAME)
    }
}

impl CsvExporter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter: b',',
            use_crlf: false,
        }
    }

    /// Field separator, `,` by default.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Ends rows with `\r\n` instead of `\n`.
    pub fn with_crlf(mut self, use_crlf: bool) -> Self {
        self.use_crlf = use_crlf;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode_row(&self, fields: &[String]) -> Result<Vec<u8>, SpiderError> {
        let terminator = if self.use_crlf {
            Terminator::CRLF
        } else {
            Terminator::Any(b'\n')
        };
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .terminator(terminator)
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(fields)?;
        writer
            .into_inner()
            .map_err(|e| SpiderError::IoError(e.into_error()))
    }
}

fn field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn row_fields(record: &Value) -> Vec<String> {
    match record {
        Value::Array(values) => values.iter().map(field).collect(),
        Value::Object(map) => {
            let mut values: Vec<String> = map.values().map(field).collect();
            values.sort();
            values
        }
        scalar => vec![field(scalar)],
    }
}

#[async_trait]
impl<I: ScrapedItem> Exporter<I> for CsvExporter {
    fn name(&self) -> &str {
        "CsvExporter"
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
        debug!("CsvExporter writing to {}", self.path.display());

        let mut count = 0usize;
        while let Some(item) = items.recv().await {
            let record = serde_json::to_value(&item)?;
            let row = self.encode_row(&row_fields(&record))?;
            writer.write_all(&row).await?;
            count += 1;
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        info!("CsvExporter wrote {} rows to {}", count, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc::unbounded_channel;

    async fn export_all<I: ScrapedItem>(exporter: &CsvExporter, items: Vec<I>) -> anyhow::Result<()> {
        let (tx, rx) = unbounded_channel();
        for item in items {
            tx.send(item)?;
        }
        drop(tx);
        Exporter::<I>::export(exporter, rx).await?;
        Ok(())
    }

    #[tokio::test]
    async fn sequences_become_rows_and_runs_append() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out/items.csv");
        let exporter = CsvExporter::new(&path);

        export_all(&exporter, vec![vec!["a", "b,c"], vec!["d", "e"]]).await?;
        export_all(&exporter, vec![vec!["f"]]).await?;

        let contents = tokio::fs::read_to_string(&path).await?;
        assert_eq!(contents, "a,\"b,c\"\nd,e\nf\n");
        Ok(())
    }

    #[tokio::test]
    async fn delimiter_and_crlf_are_honoured() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("items.csv");
        let exporter = CsvExporter::new(&path).with_delimiter(b';').with_crlf(true);

        export_all(&exporter, vec![vec![1, 2, 3]]).await?;

        assert_eq!(tokio::fs::read_to_string(&path).await?, "1;2;3\r\n");
        Ok(())
    }

    #[derive(Debug, Clone, Serialize)]
    struct Page {
        url: String,
        title: Option<String>,
    }

    #[tokio::test]
    async fn map_values_are_sorted_and_scalars_are_single_fields() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let maps = CsvExporter::new(dir.path().join("maps.csv"));
        let mut record = BTreeMap::new();
        record.insert("a", "zeta");
        record.insert("b", "alpha");
        export_all(&maps, vec![record]).await?;
        assert_eq!(tokio::fs::read_to_string(maps.path()).await?, "alpha,zeta\n");

        let pages = CsvExporter::new(dir.path().join("pages.csv"));
        export_all(
            &pages,
            vec![Page {
                url: "http://a.test/".into(),
                title: None,
            }],
        )
        .await?;
        assert_eq!(tokio::fs::read_to_string(pages.path()).await?, ",http://a.test/\n");

        let scalars = CsvExporter::new(dir.path().join("scalars.csv"));
        export_all(&scalars, vec!["only".to_string()]).await?;
        assert_eq!(tokio::fs::read_to_string(scalars.path()).await?, "only\n");
        Ok(())
    }

    #[test]
    fn default_file_name() {
        assert_eq!(CsvExporter::default().path(), Path::new("out.csv"));
    }
}
