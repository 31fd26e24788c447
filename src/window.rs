//! Tumbling windows over derived records.

use crate::core::{DerivedRecord, Measure, SummaryRecord, Undefined, WindowKey};
use chrono::{DateTime, Local};
use std::mem;

/// How a column of per-tick values collapses into one summary value.
#[derive(Debug, Clone, Copy)]
enum Reduction {
    Mean,
    Sum,
    Latest,
}

/// Buffers derived records and closes a window every `window_length` of them.
///
/// Windows do not overlap: the buffer is emptied when a window closes.
#[derive(Debug)]
pub struct WindowAggregator {
    window_length: usize,
    buffer: Vec<DerivedRecord>,
}

impl WindowAggregator {
    /// A zero length is treated as one record per window.
    pub fn new(window_length: usize) -> Self {
        let window_length = window_length.max(1);
        Self {
            window_length,
            buffer: Vec::with_capacity(window_length),
        }
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    /// Records buffered towards the next window.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a record, returning the closed window once the buffer is full.
    pub fn admit(&mut self, record: DerivedRecord) -> Option<Window> {
        self.buffer.push(record);
        if self.buffer.len() < self.window_length {
            return None;
        }
        let records = mem::replace(&mut self.buffer, Vec::with_capacity(self.window_length));
        Window::new(records)
    }
}

/// A closed window of consecutive derived records.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    key: WindowKey,
    started_at: DateTime<Local>,
    ended_at: DateTime<Local>,
    records: Vec<DerivedRecord>,
}

impl Window {
    /// Wraps a non-empty run of records; the first one anchors the key.
    pub fn new(records: Vec<DerivedRecord>) -> Option<Self> {
        let first = records.first()?;
        let last = records.last()?;
        Some(Self {
            key: first.key.clone(),
            started_at: first.taken_at,
            ended_at: last.taken_at,
            records,
        })
    }

    pub fn key(&self) -> &WindowKey {
        &self.key
    }

    pub fn records(&self) -> &[DerivedRecord] {
        &self.records
    }

    /// Collapses the window into one summary.
    ///
    /// Utilization percentages are averaged, byte rates are summed into
    /// period totals and gauges take the latest value. Sentinels are
    /// skipped; a column with no values at all stays a sentinel.
    pub fn reduce(&self) -> SummaryRecord {
        SummaryRecord {
            key: self.key.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            samples: self.records.len(),
            invalid_samples: self.records.iter().filter(|r| r.is_partially_invalid()).count(),
            cpu_percent: self.column(|r| r.cpu_percent, Reduction::Mean),
            group_cpu_percent: self.column(|r| r.group_cpu_percent, Reduction::Mean),
            net_in_kb: self.column(|r| r.net_in_kb, Reduction::Sum),
            net_out_kb: self.column(|r| r.net_out_kb, Reduction::Sum),
            disk_read_kb: self.column(|r| r.disk_read_kb, Reduction::Sum),
            disk_write_kb: self.column(|r| r.disk_write_kb, Reduction::Sum),
            group_read_kb: self.column(|r| r.group_read_kb, Reduction::Sum),
            group_write_kb: self.column(|r| r.group_write_kb, Reduction::Sum),
            memory_percent: self.column(|r| r.memory_percent, Reduction::Latest),
            memory_mb: self.column(|r| r.memory_mb, Reduction::Latest),
            group_memory_percent: self.column(|r| r.group_memory_percent, Reduction::Latest),
            group_memory_mb: self.column(|r| r.group_memory_mb, Reduction::Latest),
        }
    }

    fn column(&self, field: fn(&DerivedRecord) -> Measure, how: Reduction) -> Measure {
        reduce_column(self.records.iter().map(field), how)
    }
}

fn reduce_column(column: impl Iterator<Item = Measure>, how: Reduction) -> Measure {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut latest = None;
    let mut last_reason = Undefined::Unavailable;

    for measure in column {
        match measure {
            Measure::Value(v) => {
                count += 1;
                sum += v;
                latest = Some(v);
            }
            Measure::Undefined(reason) => last_reason = reason,
        }
    }

    if count == 0 {
        return Measure::Undefined(last_reason);
    }
    match how {
        Reduction::Mean => Measure::Value(sum / count as f64),
        Reduction::Sum => Measure::Value(sum),
        Reduction::Latest => latest.map_or(Measure::Undefined(last_reason), Measure::Value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(offset: i64, cpu: f64, net_in_kb: f64, memory_mb: f64) -> DerivedRecord {
        let taken_at = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset);
        DerivedRecord {
            key: WindowKey::from_timestamp(&taken_at),
            taken_at,
            cpu_percent: Measure::Value(cpu),
            group_cpu_percent: Measure::Value(cpu / 2.0),
            net_in_kb: Measure::Value(net_in_kb),
            net_out_kb: Measure::Value(1.5),
            disk_read_kb: Measure::Value(0.25),
            disk_write_kb: Measure::Value(0.0),
            group_read_kb: Measure::Value(0.125),
            group_write_kb: Measure::Value(0.0),
            memory_percent: Measure::Value(memory_mb / 100.0),
            memory_mb: Measure::Value(memory_mb),
            group_memory_percent: Measure::Value(1.0),
            group_memory_mb: Measure::Value(64.0),
        }
    }

    fn fill(aggregator: &mut WindowAggregator, records: Vec<DerivedRecord>) -> Vec<Window> {
        records.into_iter().filter_map(|r| aggregator.admit(r)).collect()
    }

    #[test]
    fn test_window_of_five_averages_cpu() {
        let mut aggregator = WindowAggregator::new(5);
        let records = [10.0, 20.0, 30.0, 40.0, 50.0]
            .iter()
            .enumerate()
            .map(|(i, cpu)| record(i as i64, *cpu, 100.0, 2000.0 + i as f64))
            .collect();
        let windows = fill(&mut aggregator, records);
        assert_eq!(windows.len(), 1);

        let summary = windows[0].reduce();
        assert_eq!(summary.cpu_percent, Measure::Value(30.0));
        assert_eq!(summary.group_cpu_percent, Measure::Value(15.0));
        assert_eq!(summary.net_in_kb, Measure::Value(500.0));
        assert_eq!(summary.memory_mb, Measure::Value(2004.0));
        assert_eq!(summary.key.as_str(), "2024-01-01-00-00-00");
        assert_eq!(summary.samples, 5);
        assert_eq!(summary.invalid_samples, 0);
    }

    #[test]
    fn test_means_and_sums_match_synthetic_values() {
        let cpus = [12.5, 7.25, 99.0, 0.0, 33.3, 41.1, 0.1];
        let nets = [0.5, 1024.0, 3.75, 0.0, 12.0, 7.0, 1e6];
        let mut aggregator = WindowAggregator::new(cpus.len());
        let records = cpus
            .iter()
            .zip(nets.iter())
            .enumerate()
            .map(|(i, (c, n))| record(i as i64, *c, *n, 1.0))
            .collect();
        let window = fill(&mut aggregator, records).pop().unwrap();
        let summary = window.reduce();

        let mean: f64 = cpus.iter().sum::<f64>() / cpus.len() as f64;
        let total: f64 = nets.iter().sum();
        assert!((summary.cpu_percent.value().unwrap() - mean).abs() < 1e-9);
        assert!((summary.net_in_kb.value().unwrap() - total).abs() < 1e-9);
        assert!((summary.net_out_kb.value().unwrap() - 1.5 * cpus.len() as f64).abs() < 1e-9);
    }

    #[test]
    fn test_windows_tumble_without_overlap() {
        let mut aggregator = WindowAggregator::new(3);
        let records = (0..7).map(|i| record(i, i as f64, 1.0, 1.0)).collect();
        let windows = fill(&mut aggregator, records);

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].key().as_str(), "2024-01-01-00-00-00");
        assert_eq!(windows[1].key().as_str(), "2024-01-01-00-00-03");
        assert_eq!(windows[1].reduce().cpu_percent, Measure::Value(4.0));
        assert_eq!(aggregator.buffered(), 1);
    }

    #[test]
    fn test_sentinels_are_skipped_not_averaged() {
        let mut aggregator = WindowAggregator::new(4);
        let mut records: Vec<DerivedRecord> = (0..4).map(|i| record(i, 40.0, 10.0, 1.0)).collect();
        records[1].cpu_percent = Measure::Undefined(Undefined::ZeroElapsed);
        records[2].net_in_kb = Measure::Undefined(Undefined::CounterReset);
        records[3].memory_mb = Measure::Undefined(Undefined::Unavailable);
        for r in records.iter_mut() {
            r.group_write_kb = Measure::Undefined(Undefined::Unavailable);
        }

        let summary = fill(&mut aggregator, records).pop().unwrap().reduce();
        assert_eq!(summary.cpu_percent, Measure::Value(40.0));
        assert_eq!(summary.net_in_kb, Measure::Value(30.0));
        assert_eq!(summary.memory_mb, Measure::Value(1.0));
        assert_eq!(summary.group_write_kb, Measure::Undefined(Undefined::Unavailable));
        assert_eq!(summary.invalid_samples, 4);
    }

    #[test]
    fn test_reduce_is_idempotent() {
        let mut aggregator = WindowAggregator::new(2);
        let records = vec![record(0, 10.0, 5.0, 1.0), record(1, 20.0, 6.0, 2.0)];
        let window = fill(&mut aggregator, records).pop().unwrap();
        assert_eq!(window.reduce(), window.reduce());
    }

    #[test]
    fn test_zero_length_closes_every_record() {
        let mut aggregator = WindowAggregator::new(0);
        assert_eq!(aggregator.window_length(), 1);
        assert!(aggregator.admit(record(0, 1.0, 1.0, 1.0)).is_some());
        assert!(Window::new(Vec::new()).is_none());
    }
}
