//! A metrics recorder that periodically logs all captured metrics.

use crate::task_manager::TaskManager;
use crate::utils::heartbeat::run_heartbeat;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{AtomicStorage, Registry};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// A recorder that logs counters and gauges through `tracing` at a fixed
/// interval. Histograms are registered but not logged.
pub struct LoggingRecorder {
    registry: Arc<Registry<Key, AtomicStorage>>,
}

impl LoggingRecorder {
    /// Creates the recorder and spawns its logging task on `task_manager`.
    pub fn new(interval: Duration, task_manager: &TaskManager) -> Self {
        let registry = Arc::new(Registry::new(AtomicStorage));

        let task_registry = registry.clone();
        let mut shutdown_rx = task_manager.get_shutdown_rx();
        task_manager.spawn("LoggingRecorder", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        for line in render(&task_registry) {
                            tracing::info!("{}", line);
                        }
                        tracing::debug!("Metrics logging task received shutdown signal.");
                        break;
                    }
                    _ = ticker.tick() => {
                        tracing::debug!("--- Metrics Snapshot ---");
                        for line in render(&task_registry) {
                            tracing::info!("{}", line);
                        }
                    }
                }
            }
        });

        let hb_shutdown_rx = task_manager.get_shutdown_rx();
        task_manager.spawn("LoggingRecorder-heartbeat", async move {
            run_heartbeat("LoggingRecorder", hb_shutdown_rx).await
        });

        Self { registry }
    }
}

/// One line per counter and gauge, sorted by key for stable output.
fn render(registry: &Registry<Key, AtomicStorage>) -> Vec<String> {
    let mut lines: Vec<String> = registry
        .get_counter_handles()
        .into_iter()
        .map(|(key, counter)| format!("[Counter] {}: {}", key_label(&key), counter.load(Ordering::Relaxed)))
        .collect();
    lines.extend(registry.get_gauge_handles().into_iter().map(|(key, gauge)| {
        let value = f64::from_bits(gauge.load(Ordering::Relaxed));
        format!("[Gauge] {}: {}", key_label(&key), value)
    }));
    lines.sort();
    lines
}

fn key_label(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl Recorder for LoggingRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        self.registry.get_or_create_counter(key, |c| c.clone()).into()
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        self.registry.get_or_create_gauge(key, |g| g.clone()).into()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        self.registry.get_or_create_histogram(key, |h| h.clone()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::Label;
    use tokio::sync::watch;

    fn metadata() -> Metadata<'static> {
        Metadata::new("test", metrics::Level::INFO, Some("test"))
    }

    #[tokio::test]
    async fn test_render_lists_counters_and_gauges() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task_manager = TaskManager::new(shutdown_rx);
        let recorder = LoggingRecorder::new(Duration::from_secs(60), &task_manager);

        recorder
            .register_counter(&Key::from_name("ticks_total"), &metadata())
            .increment(3);
        recorder
            .register_counter(
                &Key::from_parts("degraded_readings_total", vec![Label::new("family", "disk")]),
                &metadata(),
            )
            .increment(1);
        recorder
            .register_gauge(&Key::from_name("process_group_size"), &metadata())
            .set(4.0);

        let lines = render(&recorder.registry);
        assert_eq!(
            lines,
            vec![
                "[Counter] degraded_readings_total{family=disk}: 1".to_string(),
                "[Counter] ticks_total: 3".to_string(),
                "[Gauge] process_group_size: 4".to_string(),
            ]
        );

        shutdown_tx.send(true).unwrap();
        task_manager.shutdown().await;
    }
}
