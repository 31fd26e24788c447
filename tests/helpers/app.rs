#![allow(dead_code)]
//! Test helpers for running the full application instance.

use crate::helpers::recording_sink::RecordingSink;
use anyhow::Result;
use futures::future::BoxFuture;
use statwatch::{
    app::AppBuilder,
    config::{Config, TargetConfig},
    core::ReportSink,
    internal_metrics::Metrics,
    pipeline::RunSummary,
    platform::test_utils::FakeProvider,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::timeout};

pub const TARGET_PID: u32 = 100;
pub const TARGET_NAME: &str = "rubackup_client";

/// A running instance of the application.
#[derive(Debug)]
pub struct TestApp {
    pub shutdown_tx: watch::Sender<bool>,
    pub app_handle: Option<JoinHandle<Result<RunSummary>>>,
    pub provider: FakeProvider,
    pub sink: RecordingSink,
}

impl TestApp {
    /// Waits for the application to stop on its own.
    pub async fn finished(mut self, timeout_duration: Duration) -> Result<RunSummary> {
        let handle = self.app_handle.take().expect("app was not started");
        match timeout(timeout_duration, handle).await {
            Ok(joined) => Ok(joined??),
            Err(_) => Err(anyhow::anyhow!("App did not finish within the timeout")),
        }
    }

    /// Signals shutdown and waits for the application to terminate.
    pub async fn shutdown(self, timeout_duration: Duration) -> Result<RunSummary> {
        self.shutdown_tx
            .send(true)
            .expect("Failed to send shutdown signal");
        self.finished(timeout_duration).await
    }
}

/// Builds a `TestApp` around a scripted host with one target process.
pub struct TestAppBuilder {
    pub config: Config,
    provider: FakeProvider,
    sink: RecordingSink,
    extra_sinks: Vec<Arc<dyn ReportSink>>,
    metrics: Option<Metrics>,
    reference_dir: Option<PathBuf>,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAppBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.target = TargetConfig {
            process_name: Some(TARGET_NAME.to_string()),
            pid: None,
        };
        config.sampling.tick_interval_seconds = 1;
        config.sampling.window_length = 3;

        Self {
            config,
            provider: FakeProvider::with_target(TARGET_PID, TARGET_NAME),
            sink: RecordingSink::new(),
            extra_sinks: Vec::new(),
            metrics: Some(Metrics::disabled()),
            reference_dir: None,
        }
    }

    pub fn with_config_modifier(mut self, modifier: impl FnOnce(&mut Config)) -> Self {
        modifier(&mut self.config);
        self
    }

    pub fn with_provider(mut self, setup: impl FnOnce(&FakeProvider)) -> Self {
        setup(&self.provider);
        self
    }

    pub fn with_windows(mut self, windows: u64) -> Self {
        self.config.sampling.windows = Some(windows);
        self
    }

    pub fn with_extra_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }

    pub fn with_metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_reference_dir(mut self, dir: impl Into<PathBuf>, max_attempts: u32) -> Self {
        self.config.reference.enabled = true;
        self.config.reference.hardware_id = Some("00ff00ff".to_string());
        self.config.reference.max_attempts = max_attempts;
        self.reference_dir = Some(dir.into());
        self
    }

    /// Builds the application without spawning it.
    pub async fn build(self) -> Result<(TestApp, BoxFuture<'static, Result<RunSummary>>)> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut sinks: Vec<Arc<dyn ReportSink>> = vec![Arc::new(self.sink.clone())];
        sinks.extend(self.extra_sinks);

        let mut builder = AppBuilder::new(self.config)
            .provider_override(Arc::new(self.provider.clone()))
            .sink_override(sinks);
        if let Some(metrics) = self.metrics {
            builder = builder.metrics_override(metrics);
        }
        if let Some(dir) = self.reference_dir {
            builder = builder.reference_dir_override(dir);
        }

        let app = builder.build(shutdown_rx).await?;
        let test_app = TestApp {
            shutdown_tx,
            app_handle: None,
            provider: self.provider,
            sink: self.sink,
        };
        Ok((test_app, Box::pin(app.run())))
    }

    pub async fn start(self) -> Result<TestApp> {
        let (mut test_app, app_future) = self.build().await?;
        test_app.app_handle = Some(tokio::spawn(app_future));
        Ok(test_app)
    }
}
