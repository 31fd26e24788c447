//! Host introspection.
//!
//! The sampling pipeline only talks to the `MetricsProvider` trait. This
//! module holds the Linux implementation, backed by `sysinfo` for memory,
//! networks and the process table, and by explicit `/proc` parsers for the
//! cumulative CPU and block-device counters `sysinfo` does not expose.

pub mod host;
pub mod procfs;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::io;
use std::path::Path;
use thiserror::Error;

pub use crate::core::MetricsProvider;
pub use host::HostProvider;

/// Failure of a single counter probe.
///
/// None of these abort a tick on their own; see `Reading` and the process
/// aggregator for how each one degrades.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("process {0} no longer exists")]
    Vanished(u32),

    #[error("permission denied reading {0}")]
    PermissionDenied(String),

    #[error("{what} is not available: {reason}")]
    Unavailable { what: String, reason: String },

    #[error("failed to parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },
}

impl ProbeError {
    pub fn unavailable(what: impl Into<String>, reason: impl Into<String>) -> Self {
        ProbeError::Unavailable {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        ProbeError::Parse {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Maps an I/O error on a per-process file. A missing file means the
    /// process is gone.
    pub(crate) fn from_pid_io(pid: u32, path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ProbeError::Vanished(pid),
            io::ErrorKind::PermissionDenied => {
                ProbeError::PermissionDenied(path.display().to_string())
            }
            _ => ProbeError::unavailable(path.display().to_string(), err.to_string()),
        }
    }

    pub(crate) fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => {
                ProbeError::PermissionDenied(path.display().to_string())
            }
            _ => ProbeError::unavailable(path.display().to_string(), err.to_string()),
        }
    }
}
