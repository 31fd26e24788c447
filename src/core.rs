//! Core domain types and service traits for StatWatch
//!
//! This module defines the counter snapshots, derived records and summaries
//! that flow through the sampling pipeline, together with the trait
//! contracts for the platform metrics provider and the report sinks.

use crate::platform::ProbeError;
use crate::process::discover_descendants;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Format of the timestamp-derived key shared with reference files.
pub const WINDOW_KEY_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

const BYTES_PER_KB: f64 = 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// =============================================================================
// Raw counters
// =============================================================================

/// Cumulative system CPU time, in clock ticks, as accounted by the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// Total accounted CPU time. Guest time is already folded into `user`
    /// and `nice` by the kernel and is not counted twice.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Time spent doing work: total minus idle and iowait.
    pub fn busy(&self) -> u64 {
        self.total().saturating_sub(self.idle + self.iowait)
    }
}

/// Point-in-time system memory figures, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryStats {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    /// Used memory as a percentage of total memory, `None` if total is zero.
    pub fn used_percent(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some(self.used_bytes() as f64 / self.total_bytes as f64 * 100.0)
    }
}

/// Cumulative network byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetCounters {
    pub received_bytes: u64,
    pub sent_bytes: u64,
}

/// Cumulative block I/O byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

impl std::ops::Add for IoCounters {
    type Output = IoCounters;

    fn add(self, rhs: IoCounters) -> IoCounters {
        IoCounters {
            read_bytes: self.read_bytes + rhs.read_bytes,
            write_bytes: self.write_bytes + rhs.write_bytes,
        }
    }
}

impl std::ops::Add for NetCounters {
    type Output = NetCounters;

    fn add(self, rhs: NetCounters) -> NetCounters {
        NetCounters {
            received_bytes: self.received_bytes + rhs.received_bytes,
            sent_bytes: self.sent_bytes + rhs.sent_bytes,
        }
    }
}

/// A single reading of one counter family.
///
/// A failed probe is recorded as `Degraded` rather than failing the whole
/// snapshot. Its value reads as zero, but the delta engine refuses to
/// compute a rate across a degraded reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading<T> {
    Present(T),
    Degraded,
}

impl<T: Copy + Default> Reading<T> {
    pub fn value(&self) -> T {
        match self {
            Reading::Present(v) => *v,
            Reading::Degraded => T::default(),
        }
    }

    pub fn present(&self) -> Option<T> {
        match self {
            Reading::Present(v) => Some(*v),
            Reading::Degraded => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Reading::Degraded)
    }
}

impl<T> From<Result<T, ProbeError>> for Reading<T> {
    fn from(result: Result<T, ProbeError>) -> Self {
        match result {
            Ok(v) => Reading::Present(v),
            Err(_) => Reading::Degraded,
        }
    }
}

/// Summed counters for the tracked process group at one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroupCounters {
    /// utime + stime of every member, in clock ticks.
    pub cpu_ticks: u64,
    pub io: IoCounters,
    pub resident_bytes: u64,
    /// Number of processes enumerated in the group.
    pub members: usize,
    /// Members that exited before their counters could be read.
    pub vanished: usize,
}

/// One tick's raw cumulative counter readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub taken_at: DateTime<Local>,
    pub cpu: Reading<CpuTimes>,
    pub memory: Reading<MemoryStats>,
    pub network: Reading<NetCounters>,
    pub disk: Reading<IoCounters>,
    pub group: Reading<GroupCounters>,
}

impl Snapshot {
    pub fn key(&self) -> WindowKey {
        WindowKey::from_timestamp(&self.taken_at)
    }

    /// Names of the counter families that degraded in this snapshot.
    pub fn degraded_families(&self) -> Vec<&'static str> {
        let mut families = Vec::new();
        if self.cpu.is_degraded() {
            families.push("cpu");
        }
        if self.memory.is_degraded() {
            families.push("memory");
        }
        if self.network.is_degraded() {
            families.push("network");
        }
        if self.disk.is_degraded() {
            families.push("disk");
        }
        if self.group.is_degraded() {
            families.push("group");
        }
        families
    }
}

// =============================================================================
// Derived values
// =============================================================================

/// Why a derived field has no value for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Undefined {
    /// The CPU-time denominator did not advance.
    ZeroElapsed,
    /// A cumulative counter went backwards (wraparound, reboot, member exit).
    CounterReset,
    /// The reading was degraded on one side of the delta.
    Unavailable,
}

/// A derived metric value or the sentinel that replaces it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measure {
    Value(f64),
    Undefined(Undefined),
}

impl Measure {
    pub fn value(&self) -> Option<f64> {
        match self {
            Measure::Value(v) => Some(*v),
            Measure::Undefined(_) => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Measure::Value(_))
    }

    /// Wraps a gauge value, treating non-finite input as unavailable.
    pub fn gauge(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Measure::Value(v),
            _ => Measure::Undefined(Undefined::Unavailable),
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measure::Value(v) => write!(f, "{}", v),
            Measure::Undefined(_) => write!(f, "n/a"),
        }
    }
}

impl Serialize for Measure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Measure::Value(v) => serializer.serialize_f64(*v),
            Measure::Undefined(_) => serializer.serialize_none(),
        }
    }
}

/// Timestamp-derived identifier shared by summaries and reference files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct WindowKey(String);

impl WindowKey {
    pub fn from_timestamp(ts: &DateTime<Local>) -> Self {
        Self(ts.format(WINDOW_KEY_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WindowKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-tick rates and gauges computed from two adjacent snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedRecord {
    pub key: WindowKey,
    #[serde(skip)]
    pub taken_at: DateTime<Local>,
    pub cpu_percent: Measure,
    pub group_cpu_percent: Measure,
    pub net_in_kb: Measure,
    pub net_out_kb: Measure,
    pub disk_read_kb: Measure,
    pub disk_write_kb: Measure,
    pub group_read_kb: Measure,
    pub group_write_kb: Measure,
    pub memory_percent: Measure,
    pub memory_mb: Measure,
    pub group_memory_percent: Measure,
    pub group_memory_mb: Measure,
}

impl DerivedRecord {
    /// True if any field carries a sentinel instead of a value.
    pub fn is_partially_invalid(&self) -> bool {
        self.fields().iter().any(|(_, m)| !m.is_defined())
    }

    pub fn fields(&self) -> [(&'static str, Measure); 12] {
        [
            ("cpu_percent", self.cpu_percent),
            ("group_cpu_percent", self.group_cpu_percent),
            ("net_in_kb", self.net_in_kb),
            ("net_out_kb", self.net_out_kb),
            ("disk_read_kb", self.disk_read_kb),
            ("disk_write_kb", self.disk_write_kb),
            ("group_read_kb", self.group_read_kb),
            ("group_write_kb", self.group_write_kb),
            ("memory_percent", self.memory_percent),
            ("memory_mb", self.memory_mb),
            ("group_memory_percent", self.group_memory_percent),
            ("group_memory_mb", self.group_memory_mb),
        ]
    }
}

/// The reduction of one closed window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    /// Key of the window's anchor (first) record.
    pub key: WindowKey,
    #[serde(skip)]
    pub started_at: DateTime<Local>,
    #[serde(skip)]
    pub ended_at: DateTime<Local>,
    pub samples: usize,
    pub invalid_samples: usize,
    /// Mean over the window.
    pub cpu_percent: Measure,
    /// Mean over the window.
    pub group_cpu_percent: Measure,
    /// Total KB moved across the window.
    pub net_in_kb: Measure,
    pub net_out_kb: Measure,
    pub disk_read_kb: Measure,
    pub disk_write_kb: Measure,
    pub group_read_kb: Measure,
    pub group_write_kb: Measure,
    /// Gauges from the last record of the window.
    pub memory_percent: Measure,
    pub memory_mb: Measure,
    pub group_memory_percent: Measure,
    pub group_memory_mb: Measure,
}

/// A reference metric paired with its locally computed counterpart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPair {
    pub name: String,
    pub local: Measure,
    pub reference: Option<f64>,
}

/// Side-by-side view of a summary and its reference file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRecord {
    pub key: WindowKey,
    pub reference_path: PathBuf,
    pub timestamp_before: Option<String>,
    pub timestamp_after: Option<String>,
    pub pairs: Vec<MetricPair>,
    /// Reference fields with no local counterpart, carried verbatim.
    pub extra: Vec<(String, String)>,
    #[serde(skip)]
    pub summary: SummaryRecord,
}

/// A unit of output handed to the report sinks.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportBlock {
    /// A summary matched with its reference file.
    Compared(ComparisonRecord),
    /// A summary whose reference never appeared, or with correlation disabled.
    LocalOnly(SummaryRecord),
}

impl ReportBlock {
    pub fn key(&self) -> &WindowKey {
        match self {
            ReportBlock::Compared(c) => &c.key,
            ReportBlock::LocalOnly(s) => &s.key,
        }
    }
}

// =============================================================================
// Platform description
// =============================================================================

/// Which network interface or block device a counter refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceSelector {
    /// Sum over every eligible device.
    All,
    Named(String),
}

impl FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("device name must not be empty".to_string());
        }
        if s.eq_ignore_ascii_case("all") {
            Ok(DeviceSelector::All)
        } else {
            Ok(DeviceSelector::Named(s.to_string()))
        }
    }
}

impl TryFrom<String> for DeviceSelector {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceSelector> for String {
    fn from(value: DeviceSelector) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::All => f.write_str("all"),
            DeviceSelector::Named(name) => f.write_str(name),
        }
    }
}

/// A process and its parent, as seen in one enumeration of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessLink {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Reads cumulative counters from the host.
///
/// Every call may fail independently; callers degrade the affected reading
/// instead of aborting the tick.
pub trait MetricsProvider: Send + Sync {
    /// Cumulative system-wide CPU times.
    fn system_cpu_times(&self) -> Result<CpuTimes, ProbeError>;

    /// Current system memory figures.
    fn system_memory(&self) -> Result<MemoryStats, ProbeError>;

    /// Cumulative byte counters for one interface, or all non-loopback ones.
    fn network_counters(&self, interface: &DeviceSelector) -> Result<NetCounters, ProbeError>;

    /// Cumulative byte counters for one block device, or all whole disks.
    fn disk_counters(&self, device: &DeviceSelector) -> Result<IoCounters, ProbeError>;

    /// A fresh enumeration of the process table.
    fn process_links(&self) -> Result<Vec<ProcessLink>, ProbeError>;

    /// CPU time (utime + stime) of one process, in clock ticks.
    fn process_cpu_ticks(&self, pid: u32) -> Result<u64, ProbeError>;

    /// Cumulative storage I/O of one process.
    fn process_io_counters(&self, pid: u32) -> Result<IoCounters, ProbeError>;

    /// Resident set size of one process, in bytes.
    fn process_resident_memory(&self, pid: u32) -> Result<u64, ProbeError>;

    /// The root process plus all its current descendants.
    ///
    /// # Returns
    /// * `Err(ProbeError::Vanished)` if `root` is not in the process table
    fn process_tree(&self, root: u32) -> Result<BTreeSet<u32>, ProbeError> {
        let links = self.process_links()?;
        if !links.iter().any(|l| l.pid == root) {
            return Err(ProbeError::Vanished(root));
        }
        Ok(discover_descendants(root, &links))
    }

    /// Processes whose name contains `name`.
    fn find_processes(&self, name: &str) -> Result<Vec<ProcessLink>, ProbeError> {
        Ok(self
            .process_links()?
            .into_iter()
            .filter(|l| l.name.contains(name))
            .collect())
    }
}

/// Receives finished report blocks.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// A unique, descriptive name for the sink (e.g., "stdout", "file").
    fn name(&self) -> &str;

    /// Appends one block to the sink.
    async fn write_block(&self, block: &ReportBlock) -> Result<()>;
}

/// Converts a byte count into KB.
pub(crate) fn bytes_to_kb(bytes: f64) -> f64 {
    bytes / BYTES_PER_KB
}

/// Converts a byte count into MB.
pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}
