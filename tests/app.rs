//! The assembled application against a scripted host.

mod helpers;

use helpers::app::{TestAppBuilder, TARGET_PID};
use helpers::recording_sink::FailingSink;
use helpers::test_metrics::TestMetrics;
use statwatch::core::ReportBlock;
use statwatch::internal_metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_app_stops_after_configured_windows() {
    let app = TestAppBuilder::new()
        .with_windows(2)
        .with_provider(|p| p.advance(10, 90, 0, 0))
        .start()
        .await
        .unwrap();
    let sink = app.sink.clone();

    let summary = app.finished(TIMEOUT).await.unwrap();

    // One baseline tick, then three records per window.
    assert_eq!(summary.ticks, 7);
    assert_eq!(summary.windows, 2);
    assert_eq!(summary.local_only, 2);
    assert_eq!(summary.discarded_records, 0);
    let blocks = sink.blocks();
    assert_eq!(blocks.len(), 2);
    for block in &blocks {
        let ReportBlock::LocalOnly(summary) = block else {
            panic!("correlation is disabled, got {:?}", block);
        };
        assert_eq!(summary.samples, 3);
    }
}

#[tokio::test(start_paused = true)]
async fn test_app_fails_when_target_exits() {
    let app = TestAppBuilder::new().start().await.unwrap();
    let provider = app.provider.clone();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    provider.remove_process(TARGET_PID);

    let err = app.finished(TIMEOUT).await.unwrap_err();
    assert!(err.to_string().contains("has exited"), "unexpected error: {err}");
}

#[tokio::test(start_paused = true)]
async fn test_startup_fails_without_matching_process() {
    let result = TestAppBuilder::new()
        .with_config_modifier(|c| c.target.process_name = Some("postgres".to_string()))
        .start()
        .await;

    let err = result.err().expect("startup should fail");
    assert!(err.to_string().contains("postgres"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_closed_windows_only() {
    let app = TestAppBuilder::new().start().await.unwrap();
    let sink = app.sink.clone();

    tokio::time::sleep(Duration::from_millis(4500)).await;
    let summary = app.shutdown(TIMEOUT).await.unwrap();

    assert!(summary.windows >= 1);
    assert_eq!(sink.blocks().len() as u64, summary.windows);
    assert_eq!(summary.discarded_records as u64, summary.records - 3 * summary.windows);
}

#[tokio::test(start_paused = true)]
async fn test_missing_references_are_reported_locally() {
    let refs = TempDir::new().unwrap();
    let app = TestAppBuilder::new()
        .with_windows(2)
        .with_reference_dir(refs.path(), 3)
        .start()
        .await
        .unwrap();
    let sink = app.sink.clone();

    let summary = app.finished(TIMEOUT).await.unwrap();

    // No reference ever appears; both summaries settle when the queue drains.
    assert_eq!(summary.compared, 0);
    assert_eq!(summary.local_only, 2);
    assert_eq!(sink.blocks().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failing_sink_does_not_stop_reporting() {
    let app = TestAppBuilder::new()
        .with_windows(1)
        .with_extra_sink(Arc::new(FailingSink))
        .start()
        .await
        .unwrap();
    let sink = app.sink.clone();

    app.finished(TIMEOUT).await.unwrap();
    assert_eq!(sink.blocks().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_internal_metrics_track_ticks_and_degraded_families() {
    let recorder = TestMetrics::new();
    let metrics = metrics::with_local_recorder(&recorder, Metrics::new);
    let app = TestAppBuilder::new()
        .with_windows(1)
        .with_provider(|p| p.update(|host| host.disk = None))
        .with_metrics_override(metrics)
        .start()
        .await
        .unwrap();

    app.finished(TIMEOUT).await.unwrap();

    assert_eq!(recorder.get_counter("ticks_total"), 4);
    assert_eq!(recorder.get_counter("derived_records_total"), 3);
    assert_eq!(recorder.get_counter("windows_closed_total"), 1);
    assert_eq!(recorder.get_counter("degraded_readings_total{family=disk}"), 4);
    assert_eq!(recorder.get_counter("degraded_readings_total{family=cpu}"), 0);
    assert_eq!(recorder.get_gauge("process_group_size"), Some(1.0));
}
