pub mod location;
pub mod parser;

use crate::core::{ComparisonRecord, Measure, MetricPair, ReportBlock, SummaryRecord, WindowKey};
use crate::internal_metrics::Metrics;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use location::ReferenceLocation;
pub use parser::{parse_reference, METRIC_FIELDS, ReferenceParseError, ReferenceRecord};

#[derive(Error, Debug)]
pub enum CorrelateError {
    #[error("no reference file at {}", path.display())]
    Missing { path: PathBuf },

    #[error("malformed reference file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: ReferenceParseError,
    },

    #[error("cannot read reference file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The summary field a reference metric is compared against.
pub fn local_counterpart(summary: &SummaryRecord, reference_field: &str) -> Option<Measure> {
    let measure = match reference_field {
        "general_cpu_usage" => summary.cpu_percent,
        "client_cpu_usage" => summary.group_cpu_percent,
        "general_io_usage_r" => summary.disk_read_kb,
        "general_io_usage_w" => summary.disk_write_kb,
        "client_io_usage_r" => summary.group_read_kb,
        "client_io_usage_w" => summary.group_write_kb,
        "general_net_usage_r" => summary.net_in_kb,
        "general_net_usage_w" => summary.net_out_kb,
        "general_ram_usage" => summary.memory_percent,
        "client_ram_usage" => summary.group_memory_percent,
        "general_ram_usage_m" => summary.memory_mb,
        "client_ram_usage_m" => summary.group_memory_mb,
        _ => return None,
    };
    Some(measure)
}

/// Looks up reference files in one directory by window key.
#[derive(Debug, Clone)]
pub struct ReferenceCorrelator {
    dir: PathBuf,
}

impl ReferenceCorrelator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &WindowKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    /// Pairs a summary with the reference file that shares its key.
    pub async fn correlate(&self, summary: &SummaryRecord) -> Result<ComparisonRecord, CorrelateError> {
        let path = self.path_for(&summary.key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CorrelateError::Missing { path });
            }
            Err(source) => return Err(CorrelateError::Io { path, source }),
        };
        let reference =
            parse_reference(&content).map_err(|source| CorrelateError::Malformed { path: path.clone(), source })?;
        Ok(compare(summary, reference, path))
    }
}

/// Builds the side-by-side record. Every mapped field is listed, with
/// `None` where the reference file does not carry it.
pub fn compare(summary: &SummaryRecord, reference: ReferenceRecord, path: PathBuf) -> ComparisonRecord {
    let pairs = METRIC_FIELDS
        .iter()
        .filter_map(|name| {
            Some(MetricPair {
                name: name.to_string(),
                local: local_counterpart(summary, name)?,
                reference: reference.metric(name),
            })
        })
        .collect();

    ComparisonRecord {
        key: summary.key.clone(),
        reference_path: path,
        timestamp_before: reference.timestamp_before,
        timestamp_after: reference.timestamp_after,
        pairs,
        extra: reference.extra,
        summary: summary.clone(),
    }
}

#[derive(Debug)]
struct Pending {
    summary: SummaryRecord,
    attempts: u32,
}

/// Summaries waiting for their reference file.
///
/// The external writer can lag behind the sampler, so a missing file is
/// retried each time the queue is polled. A summary is reported on its own
/// once `max_attempts` lookups have failed, or immediately if its file is
/// malformed.
pub struct CorrelationQueue {
    correlator: ReferenceCorrelator,
    max_attempts: u32,
    pending: VecDeque<Pending>,
    metrics: Arc<Metrics>,
}

impl CorrelationQueue {
    pub fn new(correlator: ReferenceCorrelator, max_attempts: u32, metrics: Arc<Metrics>) -> Self {
        Self {
            correlator,
            max_attempts: max_attempts.max(1),
            pending: VecDeque::new(),
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn submit(&mut self, summary: SummaryRecord) {
        self.pending.push_back(Pending { summary, attempts: 0 });
    }

    /// Tries every pending summary once, returning the blocks that settled.
    pub async fn poll(&mut self) -> Vec<ReportBlock> {
        self.attempt_all(false).await
    }

    /// Tries every pending summary one last time and settles all of them.
    pub async fn drain(&mut self) -> Vec<ReportBlock> {
        self.attempt_all(true).await
    }

    async fn attempt_all(&mut self, last_chance: bool) -> Vec<ReportBlock> {
        let mut settled = Vec::new();
        let mut still_pending = VecDeque::with_capacity(self.pending.len());

        while let Some(mut entry) = self.pending.pop_front() {
            entry.attempts += 1;
            match self.correlator.correlate(&entry.summary).await {
                Ok(comparison) => {
                    debug!(key = %entry.summary.key, attempts = entry.attempts, "Reference matched");
                    self.metrics.references_matched_total.increment(1);
                    settled.push(ReportBlock::Compared(comparison));
                }
                Err(CorrelateError::Malformed { path, source }) => {
                    warn!(key = %entry.summary.key, path = %path.display(), error = %source, "Malformed reference file, reporting local values only");
                    self.metrics.references_malformed_total.increment(1);
                    settled.push(ReportBlock::LocalOnly(entry.summary));
                }
                Err(e) => {
                    if let CorrelateError::Io { .. } = e {
                        warn!(key = %entry.summary.key, error = %e, "Reference lookup failed");
                    }
                    if last_chance || entry.attempts >= self.max_attempts {
                        info!(key = %entry.summary.key, attempts = entry.attempts, "No reference file appeared, reporting local values only");
                        self.metrics.references_missing_total.increment(1);
                        settled.push(ReportBlock::LocalOnly(entry.summary));
                    } else {
                        debug!(key = %entry.summary.key, attempts = entry.attempts, "Reference not written yet");
                        still_pending.push_back(entry);
                    }
                }
            }
        }

        self.pending = still_pending;
        settled
    }
}
