//! Process-group tracking.
//!
//! The tracked group is the target process plus every transitive
//! descendant. Membership is rediscovered on every tick because children
//! come and go between samples; nothing about the tree is kept across ticks.

use crate::core::{GroupCounters, IoCounters, MetricsProvider, ProcessLink};
use crate::platform::ProbeError;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::debug;

/// Returns `root` and all of its transitive descendants in `links`.
///
/// Links that would form a cycle (pid reuse racing with enumeration) are
/// visited at most once.
pub fn discover_descendants(root: u32, links: &[ProcessLink]) -> BTreeSet<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for link in links {
        if let Some(parent) = link.parent {
            if parent != link.pid {
                children.entry(parent).or_default().push(link.pid);
            }
        }
    }

    let mut members = BTreeSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for &child in children.get(&pid).map(Vec::as_slice).unwrap_or_default() {
            if members.insert(child) {
                queue.push_back(child);
            }
        }
    }
    members
}

/// Picks the target among processes whose name matched.
///
/// Forking servers show up many times under the same name; the top-most
/// match (one whose parent did not match) is the one to track, with the
/// lowest pid breaking ties.
pub fn select_root(candidates: &[ProcessLink]) -> Option<u32> {
    let pids: BTreeSet<u32> = candidates.iter().map(|c| c.pid).collect();
    candidates
        .iter()
        .filter(|c| c.parent.map_or(true, |p| !pids.contains(&p)))
        .map(|c| c.pid)
        .min()
}

/// Sums per-process counters over a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessAggregator {
    root: u32,
}

struct MemberCounters {
    cpu_ticks: u64,
    io: IoCounters,
    resident_bytes: u64,
}

impl ProcessAggregator {
    pub fn new(root: u32) -> Self {
        Self { root }
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    /// Enumerates the group afresh and sums its counters.
    ///
    /// A member that cannot be read contributes nothing for this tick; the
    /// remaining members are still summed.
    ///
    /// # Returns
    /// * `Err(ProbeError::Vanished)` if the root itself is no longer listed
    /// * `Err` if the process table could not be enumerated at all
    pub fn aggregate(&self, provider: &dyn MetricsProvider) -> Result<GroupCounters, ProbeError> {
        let members = provider.process_tree(self.root)?;
        let mut group = GroupCounters {
            members: members.len(),
            ..Default::default()
        };

        for pid in members {
            match read_member(provider, pid) {
                Ok(m) => {
                    group.cpu_ticks += m.cpu_ticks;
                    group.io = group.io + m.io;
                    group.resident_bytes += m.resident_bytes;
                }
                Err(ProbeError::Vanished(pid)) => {
                    debug!(pid, root = self.root, "Group member exited before it could be read");
                    group.vanished += 1;
                }
                Err(e) => {
                    debug!(pid, root = self.root, error = %e, "Group member unreadable, counting as zero");
                }
            }
        }
        Ok(group)
    }
}

fn read_member(provider: &dyn MetricsProvider, pid: u32) -> Result<MemberCounters, ProbeError> {
    Ok(MemberCounters {
        cpu_ticks: provider.process_cpu_ticks(pid)?,
        io: provider.process_io_counters(pid)?,
        resident_bytes: provider.process_resident_memory(pid)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test_utils::FakeProvider;

    fn link(pid: u32, parent: Option<u32>, name: &str) -> ProcessLink {
        ProcessLink {
            pid,
            parent,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_discover_descendants_is_transitive() {
        let links = vec![
            link(1, None, "init"),
            link(100, Some(1), "client"),
            link(101, Some(100), "worker"),
            link(102, Some(101), "compress"),
            link(200, Some(1), "other"),
            link(201, Some(200), "other-child"),
        ];
        let members = discover_descendants(100, &links);
        assert_eq!(members, BTreeSet::from([100, 101, 102]));
    }

    #[test]
    fn test_discover_descendants_survives_cycles() {
        let links = vec![link(5, Some(6), "a"), link(6, Some(5), "b"), link(7, Some(7), "self")];
        assert_eq!(discover_descendants(5, &links), BTreeSet::from([5, 6]));
        assert_eq!(discover_descendants(7, &links), BTreeSet::from([7]));
    }

    #[test]
    fn test_select_root_prefers_top_most_match() {
        let candidates = vec![
            link(300, Some(250), "rubackup_client"),
            link(250, Some(1), "rubackup_client"),
            link(400, Some(1), "rubackup_client_helper"),
        ];
        assert_eq!(select_root(&candidates), Some(250));
        assert_eq!(select_root(&[]), None);
    }

    #[test]
    fn test_aggregate_sums_group_members() {
        let provider = FakeProvider::with_target(100, "client");
        provider.add_process(101, Some(100), "worker");
        provider.add_process(500, None, "unrelated");
        provider.set_process(100, 40, IoCounters { read_bytes: 1000, write_bytes: 10 }, 4096);
        provider.set_process(101, 60, IoCounters { read_bytes: 2000, write_bytes: 20 }, 8192);
        provider.set_process(500, 999, IoCounters { read_bytes: 9, write_bytes: 9 }, 9);

        let group = ProcessAggregator::new(100).aggregate(&provider).unwrap();
        assert_eq!(group.members, 2);
        assert_eq!(group.cpu_ticks, 100);
        assert_eq!(group.io, IoCounters { read_bytes: 3000, write_bytes: 30 });
        assert_eq!(group.resident_bytes, 12288);
        assert_eq!(group.vanished, 0);
    }

    #[test]
    fn test_aggregate_skips_child_that_exited_mid_tick() {
        let provider = FakeProvider::with_target(100, "client");
        provider.add_process(101, Some(100), "worker");
        provider.set_process(100, 40, IoCounters { read_bytes: 1000, write_bytes: 10 }, 4096);
        provider.set_process(101, 60, IoCounters { read_bytes: 2000, write_bytes: 20 }, 8192);
        provider.update(|host| {
            host.exit_before_read.insert(101);
        });

        let group = ProcessAggregator::new(100).aggregate(&provider).unwrap();
        assert_eq!(group.members, 2);
        assert_eq!(group.vanished, 1);
        assert_eq!(group.cpu_ticks, 40);
        assert_eq!(group.io, IoCounters { read_bytes: 1000, write_bytes: 10 });
        assert_eq!(group.resident_bytes, 4096);
    }

    #[test]
    fn test_aggregate_fails_when_root_is_gone() {
        let provider = FakeProvider::with_target(100, "client");
        provider.remove_process(100);
        let err = ProcessAggregator::new(100).aggregate(&provider).unwrap_err();
        assert_eq!(err, ProbeError::Vanished(100));
    }
}
