//! Parser for externally written reference files.
//!
//! Two layouts are accepted: a flat JSON object, or one `name value` pair
//! per line. Fields are looked up by name, never by position. Metric
//! fields must be numeric (a JSON number or a numeric string); fields this
//! parser does not know are kept verbatim so they can be reported.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// The only reference schema this parser understands. Files without a
/// `schema_version` field are assumed to use it.
pub const SUPPORTED_SCHEMA_VERSION: u64 = 1;

pub const SCHEMA_VERSION_FIELD: &str = "schema_version";
pub const TIMESTAMP_BEFORE_FIELD: &str = "timestamp_before";
pub const TIMESTAMP_AFTER_FIELD: &str = "timestamp_after";

/// Numeric fields of the reference schema, in report order.
pub const METRIC_FIELDS: [&str; 12] = [
    "general_cpu_usage",
    "client_cpu_usage",
    "general_io_usage_r",
    "general_io_usage_w",
    "client_io_usage_r",
    "client_io_usage_w",
    "general_net_usage_r",
    "general_net_usage_w",
    "general_ram_usage",
    "client_ram_usage",
    "general_ram_usage_m",
    "client_ram_usage_m",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferenceParseError {
    #[error("reference file is empty")]
    Empty,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("line {line}: expected 'name value', got '{content}'")]
    MalformedLine { line: usize, content: String },

    #[error("field '{field}' is not a number: {value}")]
    InvalidNumber { field: String, value: String },

    #[error("unsupported schema version {0} (expected {SUPPORTED_SCHEMA_VERSION})")]
    UnsupportedSchema(String),

    #[error("field '{0}' appears more than once")]
    DuplicateField(String),

    #[error("no known metric fields present")]
    NoMetrics,
}

/// One parsed reference file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceRecord {
    pub timestamp_before: Option<String>,
    pub timestamp_after: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    /// Fields outside the schema, carried verbatim.
    pub extra: Vec<(String, String)>,
}

impl ReferenceRecord {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Parses a reference file, choosing the layout from its first character.
pub fn parse_reference(content: &str) -> Result<ReferenceRecord, ReferenceParseError> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Err(ReferenceParseError::Empty);
    }
    let fields = if trimmed.starts_with('{') {
        json_fields(trimmed)?
    } else {
        line_fields(content)?
    };
    build(fields)
}

fn json_fields(content: &str) -> Result<Vec<(String, String)>, ReferenceParseError> {
    let map: serde_json::Map<String, Value> =
        serde_json::from_str(content).map_err(|e| ReferenceParseError::InvalidJson(e.to_string()))?;
    Ok(map
        .into_iter()
        .map(|(name, value)| {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (name, text)
        })
        .collect())
}

fn line_fields(content: &str) -> Result<Vec<(String, String)>, ReferenceParseError> {
    let mut fields = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.chars().all(|c| c == '-') {
            continue;
        }
        let (name, value) = line
            .split_once(char::is_whitespace)
            .map(|(n, v)| (n, v.trim()))
            .filter(|(_, v)| !v.is_empty())
            .ok_or_else(|| ReferenceParseError::MalformedLine {
                line: idx + 1,
                content: line.to_string(),
            })?;
        fields.push((name.to_string(), value.to_string()));
    }
    Ok(fields)
}

fn build(fields: Vec<(String, String)>) -> Result<ReferenceRecord, ReferenceParseError> {
    let mut record = ReferenceRecord::default();
    let mut seen = std::collections::BTreeSet::new();

    for (name, value) in fields {
        if !seen.insert(name.clone()) {
            return Err(ReferenceParseError::DuplicateField(name));
        }
        match name.as_str() {
            SCHEMA_VERSION_FIELD => {
                if value.trim().parse::<u64>().ok() != Some(SUPPORTED_SCHEMA_VERSION) {
                    return Err(ReferenceParseError::UnsupportedSchema(value));
                }
            }
            TIMESTAMP_BEFORE_FIELD => record.timestamp_before = Some(value),
            TIMESTAMP_AFTER_FIELD => record.timestamp_after = Some(value),
            metric if METRIC_FIELDS.contains(&metric) => {
                let number = value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| ReferenceParseError::InvalidNumber {
                        field: name.clone(),
                        value: value.clone(),
                    })?;
                record.metrics.insert(name, number);
            }
            _ => record.extra.push((name, value)),
        }
    }

    if record.metrics.is_empty() {
        return Err(ReferenceParseError::NoMetrics);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_reference() {
        let content = r#"{
            "timestamp_before": "2024-01-01 00:00:00",
            "timestamp_after": "2024-01-01 00:01:00",
            "general_cpu_usage": 12.5,
            "client_cpu_usage": "3.25",
            "general_net_usage_r": 2048,
            "backup_task": 17
        }"#;
        let record = parse_reference(content).unwrap();
        assert_eq!(record.timestamp_before.as_deref(), Some("2024-01-01 00:00:00"));
        assert_eq!(record.metric("general_cpu_usage"), Some(12.5));
        assert_eq!(record.metric("client_cpu_usage"), Some(3.25));
        assert_eq!(record.metric("general_net_usage_r"), Some(2048.0));
        assert_eq!(record.metric("client_ram_usage"), None);
        assert_eq!(record.extra, vec![("backup_task".to_string(), "17".to_string())]);
    }

    #[test]
    fn test_parse_line_reference() {
        let content = "# written by the backup agent\n\
                       schema_version 1\n\
                       timestamp_before 2024-01-01 00:00:00\n\
                       general_ram_usage 41.5\n\
                       client_ram_usage_m 512\n\
                       ---------\n";
        let record = parse_reference(content).unwrap();
        assert_eq!(record.timestamp_before.as_deref(), Some("2024-01-01 00:00:00"));
        assert_eq!(record.metric("general_ram_usage"), Some(41.5));
        assert_eq!(record.metric("client_ram_usage_m"), Some(512.0));
        assert!(record.extra.is_empty());
    }

    #[test]
    fn test_rejects_non_numeric_metric() {
        let err = parse_reference("general_cpu_usage high\n").unwrap_err();
        assert_eq!(
            err,
            ReferenceParseError::InvalidNumber {
                field: "general_cpu_usage".to_string(),
                value: "high".to_string()
            }
        );
        assert!(parse_reference(r#"{"general_cpu_usage": "NaN"}"#).is_err());
    }

    #[test]
    fn test_rejects_shifted_or_unknown_layouts() {
        assert!(matches!(
            parse_reference("general_cpu_usage\n"),
            Err(ReferenceParseError::MalformedLine { line: 1, .. })
        ));
        assert_eq!(
            parse_reference("schema_version 2\ngeneral_cpu_usage 1\n"),
            Err(ReferenceParseError::UnsupportedSchema("2".to_string()))
        );
        assert!(matches!(
            parse_reference(r#"{"general_cpu_usage": 1"#),
            Err(ReferenceParseError::InvalidJson(_))
        ));
        assert_eq!(parse_reference("   \n"), Err(ReferenceParseError::Empty));
        assert_eq!(
            parse_reference("backup_task 17\n"),
            Err(ReferenceParseError::NoMetrics)
        );
        assert_eq!(
            parse_reference("general_cpu_usage 1\ngeneral_cpu_usage 2\n"),
            Err(ReferenceParseError::DuplicateField("general_cpu_usage".to_string()))
        );
    }
}
