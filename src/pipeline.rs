//! The tick loop: sample, derive, window, correlate, report.

use crate::core::{DerivedRecord, ReportBlock, Snapshot};
use crate::delta::derive;
use crate::internal_metrics::Metrics;
use crate::outputs::ReportManager;
use crate::reference::CorrelationQueue;
use crate::sampler::{SampleError, SnapshotSource};
use crate::window::{Window, WindowAggregator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Everything one tick needs from the ticks before it.
#[derive(Debug)]
pub struct PipelineState {
    previous: Option<Snapshot>,
    window: WindowAggregator,
}

/// What a single tick produced.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// `None` on the first tick, which only establishes a baseline.
    pub record: Option<DerivedRecord>,
    /// Set when the record completed a window.
    pub window: Option<Window>,
}

impl PipelineState {
    pub fn new(window_length: usize) -> Self {
        Self {
            previous: None,
            window: WindowAggregator::new(window_length),
        }
    }

    /// Records buffered towards the next window.
    pub fn buffered(&self) -> usize {
        self.window.buffered()
    }

    /// Feeds one snapshot through the delta engine and the window aggregator.
    pub fn advance(mut self, snapshot: Snapshot) -> (Self, TickOutcome) {
        let record = derive(&snapshot, self.previous.as_ref());
        let window = record.clone().and_then(|r| self.window.admit(r));
        self.previous = Some(snapshot);
        (self, TickOutcome { record, window })
    }
}

/// Totals logged when the sampler stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub records: u64,
    pub windows: u64,
    pub compared: u64,
    pub local_only: u64,
    /// Records of the incomplete window dropped at shutdown.
    pub discarded_records: usize,
}

/// Owns the tick loop and everything it writes to.
pub struct Sampler {
    source: Arc<SnapshotSource>,
    tick_interval: Duration,
    window_length: usize,
    max_windows: Option<u64>,
    correlation: Option<CorrelationQueue>,
    reports: ReportManager,
    metrics: Arc<Metrics>,
}

impl Sampler {
    pub fn new(
        source: SnapshotSource,
        tick_interval: Duration,
        window_length: usize,
        reports: ReportManager,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source: Arc::new(source),
            tick_interval,
            window_length,
            max_windows: None,
            correlation: None,
            reports,
            metrics,
        }
    }

    /// Stops the loop once this many windows have closed.
    pub fn with_max_windows(mut self, windows: Option<u64>) -> Self {
        self.max_windows = windows;
        self
    }

    /// Pairs every summary with its reference file before reporting.
    pub fn with_correlation(mut self, queue: CorrelationQueue) -> Self {
        self.correlation = Some(queue);
        self
    }

    /// Runs until the window limit is reached, the target exits, or
    /// shutdown is signalled.
    ///
    /// Pending correlations are always settled and reported before this
    /// returns, including on a fatal error.
    #[instrument(skip_all, fields(root = self.source.root()))]
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> Result<RunSummary, SampleError> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = PipelineState::new(self.window_length);
        let mut summary = RunSummary::default();

        info!(
            interval_seconds = self.tick_interval.as_secs(),
            window_length = self.window_length,
            "Sampler started"
        );

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Sampler received shutdown signal.");
                    break Ok(());
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let source = self.source.clone();
                    let sampled = tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            info!("Shutdown during a tick, dropping it.");
                            break Ok(());
                        }
                        joined = tokio::task::spawn_blocking(move || source.sample()) => joined,
                    };
                    let snapshot = match sampled {
                        Ok(Ok(snapshot)) => snapshot,
                        Ok(Err(e)) => break Err(e),
                        Err(e) => break Err(SampleError::TaskFailed(e.to_string())),
                    };

                    let (next, outcome) = self.observe(state, snapshot, &mut summary);
                    state = next;
                    if let Some(window) = outcome.window {
                        self.close_window(window, &mut summary).await;
                    }
                    self.metrics.tick_duration_seconds.record(started.elapsed().as_secs_f64());

                    if self.max_windows.is_some_and(|max| summary.windows >= max) {
                        info!(windows = summary.windows, "Window limit reached.");
                        break Ok(());
                    }
                }
            }
        };

        self.finish(state, &mut summary).await;
        result.map(|()| summary)
    }

    fn observe(
        &self,
        state: PipelineState,
        snapshot: Snapshot,
        summary: &mut RunSummary,
    ) -> (PipelineState, TickOutcome) {
        summary.ticks += 1;
        self.metrics.ticks_total.increment(1);
        for family in snapshot.degraded_families() {
            self.metrics.increment_degraded_reading(family);
        }
        if let Some(group) = snapshot.group.present() {
            self.metrics.process_group_size.set(group.members as f64);
            if group.vanished > 0 {
                debug!(vanished = group.vanished, "Group members exited mid-tick");
                self.metrics.processes_vanished_total.increment(group.vanished as u64);
            }
        }

        let (state, outcome) = state.advance(snapshot);
        if let Some(record) = &outcome.record {
            summary.records += 1;
            self.metrics.derived_records_total.increment(1);
            if record.is_partially_invalid() {
                debug!(key = %record.key, "Tick produced undefined metrics");
            }
        }
        (state, outcome)
    }

    async fn close_window(&mut self, window: Window, summary: &mut RunSummary) {
        let record = window.reduce();
        summary.windows += 1;
        self.metrics.windows_closed_total.increment(1);
        info!(
            key = %record.key,
            samples = record.samples,
            invalid_samples = record.invalid_samples,
            "Window closed"
        );

        let blocks = match self.correlation.as_mut() {
            Some(queue) => {
                queue.submit(record);
                queue.poll().await
            }
            None => vec![ReportBlock::LocalOnly(record)],
        };
        self.publish(blocks, summary).await;
    }

    async fn finish(&mut self, state: PipelineState, summary: &mut RunSummary) {
        summary.discarded_records = state.buffered();
        if summary.discarded_records > 0 {
            warn!(
                records = summary.discarded_records,
                "Discarding incomplete window"
            );
        }

        if let Some(queue) = self.correlation.as_mut() {
            if !queue.is_empty() {
                info!(pending = queue.len(), "Settling pending reference lookups");
            }
            let blocks = queue.drain().await;
            self.publish(blocks, summary).await;
        }

        info!(
            ticks = summary.ticks,
            windows = summary.windows,
            compared = summary.compared,
            local_only = summary.local_only,
            "Sampler finished"
        );
    }

    async fn publish(&self, blocks: Vec<ReportBlock>, summary: &mut RunSummary) {
        for block in blocks {
            match &block {
                ReportBlock::Compared(_) => summary.compared += 1,
                ReportBlock::LocalOnly(_) => summary.local_only += 1,
            }
            self.reports.publish(&block).await;
        }
    }
}
