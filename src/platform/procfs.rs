//! Named-field parsers for the `/proc` files that carry cumulative CPU and
//! block-device counters.
//!
//! Each parser maps columns to the field names documented in proc(5) and
//! fails with `ProbeError::Parse` when a line is shorter than the layout it
//! expects, instead of reading whatever happens to sit in that column.

use super::ProbeError;
use crate::core::{CpuTimes, DeviceSelector, IoCounters};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Layout of the aggregate `cpu` line in `/proc/stat`.
const CPU_STAT_FIELDS: [&str; 8] = [
    "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal",
];

/// 1-based positions in `/proc/<pid>/stat`.
const PID_STAT_UTIME: usize = 14;
const PID_STAT_STIME: usize = 15;
/// The first field after the parenthesised command name.
const PID_STAT_FIRST_AFTER_COMM: usize = 3;

/// Columns of `/proc/diskstats` (0-based) and the minimum line width.
const DISKSTATS_NAME: usize = 2;
const DISKSTATS_SECTORS_READ: usize = 5;
const DISKSTATS_SECTORS_WRITTEN: usize = 9;
const DISKSTATS_MIN_COLUMNS: usize = 14;

/// The kernel reports diskstats sectors in 512-byte units regardless of
/// the device's real sector size.
const SECTOR_BYTES: u64 = 512;

/// Per-device counters from `/proc/diskstats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskStat {
    pub name: String,
    pub sectors_read: u64,
    pub sectors_written: u64,
}

impl DiskStat {
    pub fn io(&self) -> IoCounters {
        IoCounters {
            read_bytes: self.sectors_read * SECTOR_BYTES,
            write_bytes: self.sectors_written * SECTOR_BYTES,
        }
    }
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_stat(content: &str) -> Result<CpuTimes, ProbeError> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| ProbeError::parse("/proc/stat", "no aggregate cpu line"))?;

    let values: Vec<&str> = line.split_whitespace().skip(1).collect();
    if values.len() < CPU_STAT_FIELDS.len() {
        return Err(ProbeError::parse(
            "/proc/stat",
            format!(
                "cpu line has {} fields, expected at least {} ({})",
                values.len(),
                CPU_STAT_FIELDS.len(),
                CPU_STAT_FIELDS.join(" ")
            ),
        ));
    }

    let mut parsed = [0u64; 8];
    for (slot, (name, raw)) in parsed
        .iter_mut()
        .zip(CPU_STAT_FIELDS.iter().zip(values.iter()))
    {
        *slot = raw.parse().map_err(|_| {
            ProbeError::parse("/proc/stat", format!("field '{}' is not a counter: {}", name, raw))
        })?;
    }
    let [user, nice, system, idle, iowait, irq, softirq, steal] = parsed;

    Ok(CpuTimes {
        user,
        nice,
        system,
        idle,
        iowait,
        irq,
        softirq,
        steal,
    })
}

/// Parses utime + stime, in clock ticks, from `/proc/<pid>/stat`.
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last closing parenthesis.
pub fn parse_process_cpu_ticks(pid: u32, content: &str) -> Result<u64, ProbeError> {
    let source = format!("/proc/{}/stat", pid);
    let (_, rest) = content
        .rsplit_once(')')
        .ok_or_else(|| ProbeError::parse(&source, "missing command name"))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();

    let field = |position: usize, name: &str| -> Result<u64, ProbeError> {
        let raw = fields
            .get(position - PID_STAT_FIRST_AFTER_COMM)
            .ok_or_else(|| ProbeError::parse(&source, format!("missing field '{}'", name)))?;
        raw.parse()
            .map_err(|_| ProbeError::parse(&source, format!("field '{}' is not a counter: {}", name, raw)))
    };

    Ok(field(PID_STAT_UTIME, "utime")? + field(PID_STAT_STIME, "stime")?)
}

/// Parses every line of `/proc/diskstats`.
pub fn parse_diskstats(content: &str) -> Result<Vec<DiskStat>, ProbeError> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < DISKSTATS_MIN_COLUMNS {
                return Err(ProbeError::parse(
                    "/proc/diskstats",
                    format!("line has {} columns, expected at least {}", cols.len(), DISKSTATS_MIN_COLUMNS),
                ));
            }
            let counter = |idx: usize, name: &str| -> Result<u64, ProbeError> {
                cols[idx].parse().map_err(|_| {
                    ProbeError::parse(
                        "/proc/diskstats",
                        format!("'{}' of {} is not a counter: {}", name, cols[DISKSTATS_NAME], cols[idx]),
                    )
                })
            };
            Ok(DiskStat {
                name: cols[DISKSTATS_NAME].to_string(),
                sectors_read: counter(DISKSTATS_SECTORS_READ, "sectors_read")?,
                sectors_written: counter(DISKSTATS_SECTORS_WRITTEN, "sectors_written")?,
            })
        })
        .collect()
}

/// True for whole-disk block devices; partitions, loop and dm devices are
/// excluded so their traffic is not counted twice.
pub fn is_whole_disk(name: &str) -> bool {
    static WHOLE_DISK: OnceLock<Regex> = OnceLock::new();
    WHOLE_DISK
        .get_or_init(|| {
            Regex::new(r"^(?:[shv]d[a-z]+|xvd[a-z]+|nvme\d+n\d+|mmcblk\d+)$")
                .expect("whole-disk pattern is valid")
        })
        .is_match(name)
}

/// Sums the counters of the selected devices.
pub fn select_disk_io(stats: &[DiskStat], device: &DeviceSelector) -> Result<IoCounters, ProbeError> {
    match device {
        DeviceSelector::All => Ok(stats
            .iter()
            .filter(|s| is_whole_disk(&s.name))
            .fold(IoCounters::default(), |acc, s| acc + s.io())),
        DeviceSelector::Named(name) => stats
            .iter()
            .find(|s| &s.name == name)
            .map(DiskStat::io)
            .ok_or_else(|| ProbeError::unavailable(format!("disk '{}'", name), "not listed in /proc/diskstats")),
    }
}

/// Reader for a procfs mount, rooted at a configurable path.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cpu_times(&self) -> Result<CpuTimes, ProbeError> {
        let path = self.root.join("stat");
        let content = std::fs::read_to_string(&path).map_err(|e| ProbeError::from_io(&path, e))?;
        parse_cpu_stat(&content)
    }

    pub fn process_cpu_ticks(&self, pid: u32) -> Result<u64, ProbeError> {
        let path = self.root.join(pid.to_string()).join("stat");
        let content =
            std::fs::read_to_string(&path).map_err(|e| ProbeError::from_pid_io(pid, &path, e))?;
        parse_process_cpu_ticks(pid, &content)
    }

    pub fn disk_counters(&self, device: &DeviceSelector) -> Result<IoCounters, ProbeError> {
        let path = self.root.join("diskstats");
        let content = std::fs::read_to_string(&path).map_err(|e| ProbeError::from_io(&path, e))?;
        select_disk_io(&parse_diskstats(&content)?, device)
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}
