//! The `MetricsProvider` used in production.

use super::procfs::ProcFs;
use super::ProbeError;
use crate::core::{
    CpuTimes, DeviceSelector, IoCounters, MemoryStats, MetricsProvider, NetCounters, ProcessLink,
};
use std::sync::{Mutex, MutexGuard};
use sysinfo::{Networks, Pid, System};
use tracing::trace;

const LOOPBACK_PREFIX: &str = "lo";

/// Reads host counters through `sysinfo` and `/proc`.
///
/// `sysinfo` needs `&mut` access to refresh its caches, so both handles sit
/// behind a mutex. The sampler is the only caller and never contends.
pub struct HostProvider {
    system: Mutex<System>,
    networks: Mutex<Networks>,
    procfs: ProcFs,
}

impl HostProvider {
    /// Creates a provider reading CPU and disk counters below `procfs_root`.
    pub fn new(procfs: ProcFs) -> Self {
        Self {
            system: Mutex::new(System::new()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            procfs,
        }
    }

    /// The host name used to locate reference files.
    pub fn host_name() -> Option<String> {
        System::host_name()
    }

    fn system(&self) -> Result<MutexGuard<'_, System>, ProbeError> {
        self.system
            .lock()
            .map_err(|_| ProbeError::unavailable("process table", "sysinfo state poisoned"))
    }

    fn refreshed_process<T>(
        &self,
        pid: u32,
        read: impl FnOnce(&sysinfo::Process) -> T,
    ) -> Result<T, ProbeError> {
        let mut system = self.system()?;
        let sys_pid = Pid::from_u32(pid);
        if !system.refresh_process(sys_pid) {
            return Err(ProbeError::Vanished(pid));
        }
        system
            .process(sys_pid)
            .map(read)
            .ok_or(ProbeError::Vanished(pid))
    }
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new(ProcFs::default())
    }
}

impl MetricsProvider for HostProvider {
    fn system_cpu_times(&self) -> Result<CpuTimes, ProbeError> {
        self.procfs.cpu_times()
    }

    fn system_memory(&self) -> Result<MemoryStats, ProbeError> {
        let mut system = self.system()?;
        system.refresh_memory();
        let stats = MemoryStats {
            total_bytes: system.total_memory(),
            available_bytes: system.available_memory(),
        };
        if stats.total_bytes == 0 {
            return Err(ProbeError::unavailable("memory", "total memory reported as zero"));
        }
        Ok(stats)
    }

    fn network_counters(&self, interface: &DeviceSelector) -> Result<NetCounters, ProbeError> {
        let mut networks = self
            .networks
            .lock()
            .map_err(|_| ProbeError::unavailable("networks", "sysinfo state poisoned"))?;
        networks.refresh_list();

        let counters = |data: &sysinfo::NetworkData| NetCounters {
            received_bytes: data.total_received(),
            sent_bytes: data.total_transmitted(),
        };

        match interface {
            DeviceSelector::All => Ok(networks
                .iter()
                .filter(|(name, _)| !name.starts_with(LOOPBACK_PREFIX))
                .fold(NetCounters::default(), |acc, (_, data)| acc + counters(data))),
            DeviceSelector::Named(wanted) => networks
                .iter()
                .find(|(name, _)| name.as_str() == wanted.as_str())
                .map(|(_, data)| counters(data))
                .ok_or_else(|| ProbeError::unavailable(format!("interface '{}'", wanted), "not present")),
        }
    }

    fn disk_counters(&self, device: &DeviceSelector) -> Result<IoCounters, ProbeError> {
        self.procfs.disk_counters(device)
    }

    fn process_links(&self) -> Result<Vec<ProcessLink>, ProbeError> {
        let mut system = self.system()?;
        system.refresh_processes();
        let links: Vec<ProcessLink> = system
            .processes()
            .iter()
            // Threads are listed beside processes, parented to their owner.
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| ProcessLink {
                pid: pid.as_u32(),
                parent: process.parent().map(|p| p.as_u32()),
                name: process.name().to_string(),
            })
            .collect();
        trace!(processes = links.len(), "Enumerated process table");
        Ok(links)
    }

    fn process_cpu_ticks(&self, pid: u32) -> Result<u64, ProbeError> {
        self.procfs.process_cpu_ticks(pid)
    }

    fn process_io_counters(&self, pid: u32) -> Result<IoCounters, ProbeError> {
        self.refreshed_process(pid, |p| {
            let usage = p.disk_usage();
            IoCounters {
                read_bytes: usage.total_read_bytes,
                write_bytes: usage.total_written_bytes,
            }
        })
    }

    fn process_resident_memory(&self, pid: u32) -> Result<u64, ProbeError> {
        self.refreshed_process(pid, |p| p.memory())
    }
}
