//! Report sinks and the manager that fans blocks out to them.

use crate::config::OutputConfig;
use crate::core::{ReportBlock, ReportSink};
use crate::formatting::{formatter_for, TextFormatter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Writes formatted blocks to standard output.
pub struct StdoutReport {
    formatter: Box<dyn TextFormatter>,
}

impl StdoutReport {
    pub fn new(formatter: Box<dyn TextFormatter>) -> Self {
        Self { formatter }
    }
}

#[async_trait]
impl ReportSink for StdoutReport {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn write_block(&self, block: &ReportBlock) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        let mut text = self.formatter.format_block(block);
        text.push('\n');
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

/// Appends formatted blocks to a file. Existing content is never truncated.
pub struct FileReport {
    path: PathBuf,
    formatter: Box<dyn TextFormatter>,
    file: Mutex<tokio::fs::File>,
}

impl FileReport {
    pub async fn open(path: impl AsRef<Path>, formatter: Box<dyn TextFormatter>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open report file {}", path.display()))?;
        Ok(Self {
            path,
            formatter,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportSink for FileReport {
    fn name(&self) -> &str {
        "file"
    }

    async fn write_block(&self, block: &ReportBlock) -> Result<()> {
        let mut text = self.formatter.format_block(block);
        text.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Builds the sink named by the output configuration: the report file when
/// one is set, otherwise stdout.
pub async fn build_sinks(config: &OutputConfig) -> Result<Vec<Arc<dyn ReportSink>>> {
    let formatter = formatter_for(config.format);
    let sink: Arc<dyn ReportSink> = match &config.report_path {
        Some(path) => {
            info!(path = %path.display(), format = ?config.format, "Appending reports to file");
            Arc::new(FileReport::open(path, formatter).await?)
        }
        None => {
            debug!(format = ?config.format, "Writing reports to stdout");
            Arc::new(StdoutReport::new(formatter))
        }
    };
    Ok(vec![sink])
}

/// Hands every block to every configured sink.
///
/// A failing sink is logged and skipped; the others still receive the block.
pub struct ReportManager {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl ReportManager {
    pub fn new(sinks: Vec<Arc<dyn ReportSink>>) -> Self {
        Self { sinks }
    }

    pub async fn publish(&self, block: &ReportBlock) {
        for sink in &self.sinks {
            match sink.write_block(block).await {
                Ok(()) => debug!(sink = sink.name(), key = %block.key(), "Report block written"),
                Err(e) => error!(sink = sink.name(), key = %block.key(), error = %e, "Failed to write report block"),
            }
        }
    }
}
