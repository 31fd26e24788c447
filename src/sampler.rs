//! The snapshot source: one complete reading of every counter family per tick.

use crate::config::TargetConfig;
use crate::core::{DeviceSelector, MetricsProvider, Reading, Snapshot};
use crate::platform::ProbeError;
use crate::process::{select_root, ProcessAggregator};
use chrono::{DateTime, Local};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Conditions that stop the sampling loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    #[error("no running process matches '{0}'")]
    TargetNotFound(String),

    #[error("tracked process {0} has exited")]
    TargetGone(u32),

    #[error("no target process configured; set target.process_name or target.pid")]
    NoTarget,

    #[error("cannot enumerate processes: {0}")]
    ProcessTable(ProbeError),

    #[error("sampling task failed: {0}")]
    TaskFailed(String),
}

/// Resolves the configured target to the pid of the group root.
///
/// An explicit pid wins over a name; it must exist in the process table.
pub fn resolve_target(provider: &dyn MetricsProvider, target: &TargetConfig) -> Result<u32, SampleError> {
    if let Some(pid) = target.pid {
        let links = provider.process_links().map_err(SampleError::ProcessTable)?;
        if !links.iter().any(|l| l.pid == pid) {
            return Err(SampleError::TargetGone(pid));
        }
        return Ok(pid);
    }

    let name = target.process_name.as_deref().ok_or(SampleError::NoTarget)?;
    let candidates = provider.find_processes(name).map_err(SampleError::ProcessTable)?;
    let root = select_root(&candidates).ok_or_else(|| SampleError::TargetNotFound(name.to_string()))?;
    info!(
        pid = root,
        name,
        candidates = candidates.len(),
        "Resolved target process"
    );
    Ok(root)
}

/// Produces snapshots from a metrics provider.
pub struct SnapshotSource {
    provider: Arc<dyn MetricsProvider>,
    aggregator: ProcessAggregator,
    interface: DeviceSelector,
    disk: DeviceSelector,
}

impl SnapshotSource {
    pub fn new(
        provider: Arc<dyn MetricsProvider>,
        root: u32,
        interface: DeviceSelector,
        disk: DeviceSelector,
    ) -> Self {
        Self {
            provider,
            aggregator: ProcessAggregator::new(root),
            interface,
            disk,
        }
    }

    pub fn root(&self) -> u32 {
        self.aggregator.root()
    }

    /// Takes a snapshot stamped with the current local time.
    pub fn sample(&self) -> Result<Snapshot, SampleError> {
        self.sample_at(Local::now())
    }

    /// Takes a snapshot stamped with `taken_at`.
    ///
    /// A failing counter family degrades that family only. The only error
    /// is the tracked root disappearing, which ends the run.
    pub fn sample_at(&self, taken_at: DateTime<Local>) -> Result<Snapshot, SampleError> {
        let provider = self.provider.as_ref();

        let group = match self.aggregator.aggregate(provider) {
            Ok(group) => Reading::Present(group),
            Err(ProbeError::Vanished(pid)) if pid == self.root() => {
                return Err(SampleError::TargetGone(pid));
            }
            Err(e) => {
                debug!(error = %e, "Process group unreadable this tick");
                Reading::Degraded
            }
        };

        let snapshot = Snapshot {
            taken_at,
            cpu: logged("cpu", provider.system_cpu_times()),
            memory: logged("memory", provider.system_memory()),
            network: logged("network", provider.network_counters(&self.interface)),
            disk: logged("disk", provider.disk_counters(&self.disk)),
            group,
        };
        Ok(snapshot)
    }
}

fn logged<T>(family: &'static str, result: Result<T, ProbeError>) -> Reading<T> {
    if let Err(e) = &result {
        debug!(family, error = %e, "Counter family degraded this tick");
    }
    result.into()
}
