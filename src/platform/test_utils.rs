use crate::core::{
    CpuTimes, DeviceSelector, IoCounters, MemoryStats, MetricsProvider, NetCounters, ProcessLink,
};
use crate::platform::ProbeError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// A process in the fake host's process table.
#[derive(Debug, Clone, Default)]
pub struct FakeProcess {
    pub parent: Option<u32>,
    pub name: String,
    pub cpu_ticks: u64,
    pub io: IoCounters,
    pub resident_bytes: u64,
}

/// The scripted state of the fake host. A `None` family fails its probe.
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    pub cpu: Option<CpuTimes>,
    pub memory: Option<MemoryStats>,
    pub network: Option<NetCounters>,
    pub disk: Option<IoCounters>,
    pub processes: BTreeMap<u32, FakeProcess>,
    /// Processes that are listed in the table but exit before their
    /// counters are read.
    pub exit_before_read: BTreeSet<u32>,
}

/// Fake metrics provider for testing
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    host: Arc<Mutex<FakeHost>>,
    calls: Arc<Mutex<BTreeMap<&'static str, u32>>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A healthy host with one target process named `name`.
    pub fn with_target(pid: u32, name: &str) -> Self {
        let provider = Self::new();
        provider.update(|host| {
            host.cpu = Some(CpuTimes::default());
            host.memory = Some(MemoryStats {
                total_bytes: 8 * 1024 * 1024 * 1024,
                available_bytes: 4 * 1024 * 1024 * 1024,
            });
            host.network = Some(NetCounters::default());
            host.disk = Some(IoCounters::default());
        });
        provider.add_process(pid, None, name);
        provider
    }

    /// Mutates the scripted host state.
    pub fn update(&self, f: impl FnOnce(&mut FakeHost)) {
        f(&mut self.host.lock().unwrap());
    }

    pub fn add_process(&self, pid: u32, parent: Option<u32>, name: &str) {
        self.update(|host| {
            host.processes.insert(
                pid,
                FakeProcess {
                    parent,
                    name: name.to_string(),
                    ..Default::default()
                },
            );
        });
    }

    pub fn set_process(&self, pid: u32, cpu_ticks: u64, io: IoCounters, resident_bytes: u64) {
        self.update(|host| {
            if let Some(p) = host.processes.get_mut(&pid) {
                p.cpu_ticks = cpu_ticks;
                p.io = io;
                p.resident_bytes = resident_bytes;
            }
        });
    }

    pub fn remove_process(&self, pid: u32) {
        self.update(|host| {
            host.processes.remove(&pid);
        });
    }

    /// Advances every system counter by the given amounts.
    pub fn advance(&self, busy_ticks: u64, idle_ticks: u64, net_in: u64, disk_read: u64) {
        self.update(|host| {
            if let Some(cpu) = host.cpu.as_mut() {
                cpu.user += busy_ticks;
                cpu.idle += idle_ticks;
            }
            if let Some(net) = host.network.as_mut() {
                net.received_bytes += net_in;
            }
            if let Some(disk) = host.disk.as_mut() {
                disk.read_bytes += disk_read;
            }
        });
    }

    /// Number of times a probe was called.
    pub fn call_count(&self, probe: &str) -> u32 {
        self.calls.lock().unwrap().get(probe).copied().unwrap_or(0)
    }

    fn record(&self, probe: &'static str) {
        *self.calls.lock().unwrap().entry(probe).or_insert(0) += 1;
    }

    fn member<T>(&self, pid: u32, read: impl FnOnce(&FakeProcess) -> T) -> Result<T, ProbeError> {
        let host = self.host.lock().unwrap();
        if host.exit_before_read.contains(&pid) {
            return Err(ProbeError::Vanished(pid));
        }
        host.processes.get(&pid).map(read).ok_or(ProbeError::Vanished(pid))
    }
}

fn scripted<T: Copy>(value: Option<T>, what: &str) -> Result<T, ProbeError> {
    value.ok_or_else(|| ProbeError::unavailable(what, "scripted failure"))
}

impl MetricsProvider for FakeProvider {
    fn system_cpu_times(&self) -> Result<CpuTimes, ProbeError> {
        self.record("system_cpu_times");
        scripted(self.host.lock().unwrap().cpu, "cpu")
    }

    fn system_memory(&self) -> Result<MemoryStats, ProbeError> {
        self.record("system_memory");
        scripted(self.host.lock().unwrap().memory, "memory")
    }

    fn network_counters(&self, _interface: &DeviceSelector) -> Result<NetCounters, ProbeError> {
        self.record("network_counters");
        scripted(self.host.lock().unwrap().network, "network")
    }

    fn disk_counters(&self, _device: &DeviceSelector) -> Result<IoCounters, ProbeError> {
        self.record("disk_counters");
        scripted(self.host.lock().unwrap().disk, "disk")
    }

    fn process_links(&self) -> Result<Vec<ProcessLink>, ProbeError> {
        self.record("process_links");
        let host = self.host.lock().unwrap();
        Ok(host
            .processes
            .iter()
            .map(|(pid, p)| ProcessLink {
                pid: *pid,
                parent: p.parent,
                name: p.name.clone(),
            })
            .collect())
    }

    fn process_cpu_ticks(&self, pid: u32) -> Result<u64, ProbeError> {
        self.member(pid, |p| p.cpu_ticks)
    }

    fn process_io_counters(&self, pid: u32) -> Result<IoCounters, ProbeError> {
        self.member(pid, |p| p.io)
    }

    fn process_resident_memory(&self, pid: u32) -> Result<u64, ProbeError> {
        self.member(pid, |p| p.resident_bytes)
    }
}
