// src/formatting.rs

use crate::config::OutputFormat;
use crate::core::{ComparisonRecord, Measure, ReportBlock, SummaryRecord};
use crate::reference::{local_counterpart, METRIC_FIELDS};
use serde_json::{json, Map, Value};

/// Separator line that terminates every plain-text block.
pub const BLOCK_SEPARATOR: &str = "---------";

/// A trait for rendering one report block as text.
pub trait TextFormatter: Send + Sync {
    fn format_block(&self, block: &ReportBlock) -> String;
}

pub fn formatter_for(format: OutputFormat) -> Box<dyn TextFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::PlainText => Box::new(PlainTextFormatter),
    }
}

/// The append-only text layout: the window key, then one `name value`
/// line per metric, then the separator.
///
/// Local values are prefixed `local_` and reference values `ref_`, both
/// followed by the reference field name, so a pair sorts together.
pub struct PlainTextFormatter;

impl PlainTextFormatter {
    fn header(summary: &SummaryRecord, lines: &mut Vec<String>) {
        lines.push(summary.key.to_string());
        lines.push(format!("samples {}", summary.samples));
        lines.push(format!("invalid_samples {}", summary.invalid_samples));
    }

    fn compared(record: &ComparisonRecord) -> Vec<String> {
        let mut lines = Vec::new();
        Self::header(&record.summary, &mut lines);
        if let Some(ts) = &record.timestamp_before {
            lines.push(format!("timestamp_before {}", ts));
        }
        if let Some(ts) = &record.timestamp_after {
            lines.push(format!("timestamp_after {}", ts));
        }
        for pair in &record.pairs {
            lines.push(format!("local_{} {}", pair.name, measure_text(pair.local)));
            let reference = pair.reference.map_or_else(|| "n/a".to_string(), |v| v.to_string());
            lines.push(format!("ref_{} {}", pair.name, reference));
        }
        for (name, value) in &record.extra {
            lines.push(format!("ref_{} {}", name, value));
        }
        lines
    }

    fn local_only(summary: &SummaryRecord) -> Vec<String> {
        let mut lines = Vec::new();
        Self::header(summary, &mut lines);
        for name in METRIC_FIELDS {
            if let Some(local) = local_counterpart(summary, name) {
                lines.push(format!("local_{} {}", name, measure_text(local)));
            }
        }
        lines
    }
}

impl TextFormatter for PlainTextFormatter {
    fn format_block(&self, block: &ReportBlock) -> String {
        let mut lines = match block {
            ReportBlock::Compared(record) => Self::compared(record),
            ReportBlock::LocalOnly(summary) => Self::local_only(summary),
        };
        lines.push(BLOCK_SEPARATOR.to_string());
        lines.join("\n")
    }
}

/// One JSON object per block, on a single line.
pub struct JsonFormatter;

impl TextFormatter for JsonFormatter {
    fn format_block(&self, block: &ReportBlock) -> String {
        let value = match block {
            ReportBlock::Compared(record) => {
                let mut metrics = Map::new();
                for pair in &record.pairs {
                    metrics.insert(
                        pair.name.clone(),
                        json!({ "local": pair.local, "reference": pair.reference }),
                    );
                }
                let extra: Map<String, Value> = record
                    .extra
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                json!({
                    "key": record.key,
                    "reference": record.reference_path,
                    "samples": record.summary.samples,
                    "invalid_samples": record.summary.invalid_samples,
                    "timestamp_before": record.timestamp_before,
                    "timestamp_after": record.timestamp_after,
                    "metrics": metrics,
                    "extra": extra,
                })
            }
            ReportBlock::LocalOnly(summary) => {
                let mut metrics = Map::new();
                for name in METRIC_FIELDS {
                    if let Some(local) = local_counterpart(summary, name) {
                        metrics.insert(name.to_string(), json!({ "local": local, "reference": null }));
                    }
                }
                json!({
                    "key": summary.key,
                    "reference": null,
                    "samples": summary.samples,
                    "invalid_samples": summary.invalid_samples,
                    "metrics": metrics,
                })
            }
        };
        value.to_string()
    }
}

fn measure_text(measure: Measure) -> String {
    match measure {
        Measure::Value(v) => v.to_string(),
        Measure::Undefined(_) => "n/a".to_string(),
    }
}
