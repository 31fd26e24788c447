//! # Internal Metrics Module
//!
//! Self-observability for the sampler: how many ticks ran, how many
//! readings degraded, how windows and reference lookups turned out.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: Installs the global recorder chosen by the
//!   configuration and constructs the `Metrics` handle.
//!
//! - **`Metrics`**: A cloneable struct of pre-registered handles that the
//!   pipeline updates directly.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum` server exposing
//!   `/metrics` for Prometheus to scrape.
//!
//! - **`LoggingRecorder`**: (Defined in `logging_recorder.rs`) A recorder that
//!   periodically logs its counters instead of serving them.

use crate::config::MetricsConfig;
use crate::internal_metrics::logging_recorder::LoggingRecorder;
use crate::internal_metrics::server::MetricsServer;
use crate::task_manager::TaskManager;
use metrics::{Counter, Gauge, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

pub mod logging_recorder;
pub mod server;

/// The public API for the metrics system.
#[derive(Clone)]
pub struct Metrics {
    pub ticks_total: Counter,
    pub derived_records_total: Counter,
    pub processes_vanished_total: Counter,
    pub windows_closed_total: Counter,
    pub references_matched_total: Counter,
    pub references_missing_total: Counter,
    pub references_malformed_total: Counter,
    pub tick_duration_seconds: Histogram,
    pub process_group_size: Gauge,
    degraded_readings: Vec<(&'static str, Counter)>,
}

/// Counter families a snapshot can report as degraded.
const READING_FAMILIES: [&str; 5] = ["cpu", "memory", "network", "disk", "group"];

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Registers descriptions with the global recorder and returns handles.
    pub fn new() -> Self {
        metrics::describe_counter!("ticks_total", Unit::Count, "Sampling ticks that produced a snapshot.");
        metrics::describe_counter!("derived_records_total", Unit::Count, "Per-tick derived records admitted to the window.");
        metrics::describe_counter!("degraded_readings_total", Unit::Count, "Counter families that could not be read, labeled by family.");
        metrics::describe_counter!("processes_vanished_total", Unit::Count, "Group members that exited before their counters were read.");
        metrics::describe_counter!("windows_closed_total", Unit::Count, "Windows reduced into a summary record.");
        metrics::describe_counter!("references_matched_total", Unit::Count, "Summaries paired with a reference file.");
        metrics::describe_counter!("references_missing_total", Unit::Count, "Summaries reported without a reference after all attempts.");
        metrics::describe_counter!("references_malformed_total", Unit::Count, "Reference files that failed to parse.");
        metrics::describe_histogram!("tick_duration_seconds", Unit::Seconds, "Time taken to sample and process one tick.");
        metrics::describe_gauge!("process_group_size", Unit::Count, "Processes in the tracked group at the last tick.");

        Self {
            ticks_total: metrics::counter!("ticks_total"),
            derived_records_total: metrics::counter!("derived_records_total"),
            processes_vanished_total: metrics::counter!("processes_vanished_total"),
            windows_closed_total: metrics::counter!("windows_closed_total"),
            references_matched_total: metrics::counter!("references_matched_total"),
            references_missing_total: metrics::counter!("references_missing_total"),
            references_malformed_total: metrics::counter!("references_malformed_total"),
            tick_duration_seconds: metrics::histogram!("tick_duration_seconds"),
            process_group_size: metrics::gauge!("process_group_size"),
            degraded_readings: READING_FAMILIES
                .iter()
                .map(|&family| (family, metrics::counter!("degraded_readings_total", "family" => family)))
                .collect(),
        }
    }

    /// Creates a `Metrics` instance that performs no operations.
    pub fn disabled() -> Self {
        Self {
            ticks_total: Counter::noop(),
            derived_records_total: Counter::noop(),
            processes_vanished_total: Counter::noop(),
            windows_closed_total: Counter::noop(),
            references_matched_total: Counter::noop(),
            references_missing_total: Counter::noop(),
            references_malformed_total: Counter::noop(),
            tick_duration_seconds: Histogram::noop(),
            process_group_size: Gauge::noop(),
            degraded_readings: Vec::new(),
        }
    }

    /// Increments the degraded-reading counter for one counter family.
    pub fn increment_degraded_reading(&self, family: &'static str) {
        if let Some((_, counter)) = self.degraded_readings.iter().find(|(f, _)| *f == family) {
            counter.increment(1);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the configured recorder and returns the `Metrics` handle,
    /// plus the Prometheus server and its bound address when enabled.
    ///
    /// Any failure to bind or install falls back to disabled metrics; the
    /// sampler itself never depends on them.
    pub fn build(self, task_manager: &TaskManager) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        if self.config.enabled {
            return self.build_prometheus(task_manager);
        }
        if self.config.log_metrics {
            let interval = Duration::from_secs(self.config.log_aggregation_seconds.max(1));
            let recorder = LoggingRecorder::new(interval, task_manager);
            if let Err(e) = metrics::set_global_recorder(recorder) {
                error!("Failed to install logging recorder: {}", e);
                return (Metrics::disabled(), None);
            }
            info!(interval_seconds = interval.as_secs(), "Logging internal metrics");
            return (Metrics::new(), None);
        }
        (Metrics::disabled(), None)
    }

    fn build_prometheus(self, task_manager: &TaskManager) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        let recorder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
        ) {
            Ok(builder) => builder.build_recorder(),
            Err(e) => {
                error!("Failed to configure Prometheus buckets: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let handle = recorder.handle();

        let listener = match std::net::TcpListener::bind(self.config.listen_address) {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return (Metrics::disabled(), None);
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let listener = match listener
            .set_nonblocking(true)
            .and_then(|_| TcpListener::from_std(listener))
        {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to hand metrics listener to tokio: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return (Metrics::disabled(), None);
        }

        let server = MetricsServer::new(listener, handle, task_manager.get_shutdown_rx());
        info!(%addr, "Serving internal metrics");
        (Metrics::new(), Some((server, addr)))
    }
}
