//! Conversion of cumulative counters into per-tick rates.
//!
//! Every field of a `DerivedRecord` is computed independently. A field whose
//! inputs are unusable (a degraded reading, a counter that went backwards,
//! a CPU clock that did not advance) carries an `Undefined` sentinel, so a
//! record is never rejected wholesale because of one bad counter.

use crate::core::{
    bytes_to_kb, bytes_to_mb, CpuTimes, DerivedRecord, GroupCounters, Measure, Reading, Snapshot,
    Undefined,
};

/// Derives one record from two adjacent snapshots.
///
/// Returns `None` when there is no `previous` snapshot to measure against.
pub fn derive(current: &Snapshot, previous: Option<&Snapshot>) -> Option<DerivedRecord> {
    let previous = previous?;

    let elapsed = cpu_elapsed(&current.cpu, &previous.cpu);
    let group = pair(&current.group, &previous.group);
    let net = pair(&current.network, &previous.network);
    let disk = pair(&current.disk, &previous.disk);

    let cpu_percent = elapsed.and_then(|total| {
        let (cur, prev) = pair(&current.cpu, &previous.cpu)?;
        let busy = counter_delta(cur.busy(), prev.busy())?;
        Ok(busy / total * 100.0)
    });
    let group_cpu_percent = elapsed.and_then(|total| {
        let (cur, prev) = group?;
        Ok(counter_delta(cur.cpu_ticks, prev.cpu_ticks)? / total * 100.0)
    });

    let rate = |cur: u64, prev: u64| counter_delta(cur, prev).map(bytes_to_kb);

    let memory = current.memory.present();
    let group_now = current.group.present();

    Some(DerivedRecord {
        key: current.key(),
        taken_at: current.taken_at,
        cpu_percent: measure(cpu_percent),
        group_cpu_percent: measure(group_cpu_percent),
        net_in_kb: measure(net.and_then(|(c, p)| rate(c.received_bytes, p.received_bytes))),
        net_out_kb: measure(net.and_then(|(c, p)| rate(c.sent_bytes, p.sent_bytes))),
        disk_read_kb: measure(disk.and_then(|(c, p)| rate(c.read_bytes, p.read_bytes))),
        disk_write_kb: measure(disk.and_then(|(c, p)| rate(c.write_bytes, p.write_bytes))),
        group_read_kb: measure(group.and_then(|(c, p)| rate(c.io.read_bytes, p.io.read_bytes))),
        group_write_kb: measure(
            group.and_then(|(c, p)| rate(c.io.write_bytes, p.io.write_bytes)),
        ),
        memory_percent: Measure::gauge(memory.and_then(|m| m.used_percent())),
        memory_mb: Measure::gauge(memory.map(|m| bytes_to_mb(m.used_bytes()))),
        group_memory_percent: group_memory_percent(memory.map(|m| m.total_bytes), group_now),
        group_memory_mb: Measure::gauge(group_now.map(|g| bytes_to_mb(g.resident_bytes))),
    })
}

/// The CPU-time denominator shared by the system and group percentages.
fn cpu_elapsed(current: &Reading<CpuTimes>, previous: &Reading<CpuTimes>) -> Result<f64, Undefined> {
    let (cur, prev) = pair(current, previous)?;
    let total = counter_delta(cur.total(), prev.total())?;
    if total == 0.0 {
        return Err(Undefined::ZeroElapsed);
    }
    Ok(total)
}

/// Resident memory of the group as a share of total system memory.
fn group_memory_percent(total_bytes: Option<u64>, group: Option<GroupCounters>) -> Measure {
    match (total_bytes, group) {
        (Some(total), Some(group)) if total > 0 => {
            Measure::Value(group.resident_bytes as f64 / total as f64 * 100.0)
        }
        _ => Measure::Undefined(Undefined::Unavailable),
    }
}

fn pair<T: Copy + Default>(current: &Reading<T>, previous: &Reading<T>) -> Result<(T, T), Undefined> {
    match (current.present(), previous.present()) {
        (Some(cur), Some(prev)) => Ok((cur, prev)),
        _ => Err(Undefined::Unavailable),
    }
}

/// Difference of two cumulative counter readings.
fn counter_delta(current: u64, previous: u64) -> Result<f64, Undefined> {
    current
        .checked_sub(previous)
        .map(|d| d as f64)
        .ok_or(Undefined::CounterReset)
}

fn measure(result: Result<f64, Undefined>) -> Measure {
    match result {
        Ok(v) => Measure::Value(v),
        Err(reason) => Measure::Undefined(reason),
    }
}
