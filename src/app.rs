//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    core::{MetricsProvider, ReportSink},
    internal_metrics::{Metrics, MetricsBuilder},
    outputs::{build_sinks, ReportManager},
    pipeline::{RunSummary, Sampler},
    platform::{procfs::ProcFs, HostProvider},
    reference::{CorrelationQueue, ReferenceCorrelator, ReferenceLocation},
    sampler::{resolve_target, SampleError, SnapshotSource},
    task_manager::TaskManager,
    utils::heartbeat::run_heartbeat,
};
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// A built application: the sampler task plus its background tasks.
pub struct App {
    task_manager: TaskManager,
    metrics_addr: Option<SocketAddr>,
    root_pid: u32,
    sampler: JoinHandle<Result<RunSummary, SampleError>>,
    shutdown_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Pid of the tracked group root.
    pub fn root_pid(&self) -> u32 {
        self.root_pid
    }

    /// Waits for the sampler to finish, or for the external shutdown signal,
    /// then stops the background tasks.
    ///
    /// A fatal sampling error is returned after pending reports are flushed.
    pub async fn run(self) -> Result<RunSummary> {
        let App {
            task_manager,
            mut sampler,
            mut shutdown_rx,
            stop_tx,
            ..
        } = self;

        let outcome = tokio::select! {
            outcome = &mut sampler => outcome,
            _ = shutdown_rx.changed() => {
                info!("Shutdown signal received. Stopping sampler...");
                let _ = stop_tx.send(true);
                sampler.await
            }
        };

        let _ = stop_tx.send(true);
        task_manager.shutdown().await;

        match outcome {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow!("sampler task failed: {}", e)),
        }
    }
}

/// Builder for the main application.
///
/// Every external dependency of the sampler can be replaced, so tests run
/// the real pipeline against scripted counters and in-memory sinks.
pub struct AppBuilder {
    config: Config,
    provider_override: Option<Arc<dyn MetricsProvider>>,
    sink_override: Option<Vec<Arc<dyn ReportSink>>>,
    metrics_override: Option<Metrics>,
    reference_dir_override: Option<PathBuf>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            provider_override: None,
            sink_override: None,
            metrics_override: None,
            reference_dir_override: None,
        }
    }

    /// Overrides the host counter source for testing.
    pub fn provider_override(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.provider_override = Some(provider);
        self
    }

    /// Overrides the report sinks for testing.
    pub fn sink_override(mut self, sinks: Vec<Arc<dyn ReportSink>>) -> Self {
        self.sink_override = Some(sinks);
        self
    }

    /// Overrides the metrics system for testing.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    /// Uses this directory for reference files instead of deriving it from
    /// the host name and hardware id.
    pub fn reference_dir_override(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reference_dir_override = Some(dir.into());
        self
    }

    /// Resolves the target, wires every component and spawns the sampler.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let (stop_tx, stop_rx) = watch::channel(false);
        let task_manager = TaskManager::new(stop_rx.clone());

        // =========================================================================
        // 1. Initialize Metrics
        // =========================================================================
        let (metrics, metrics_server_info) = match self.metrics_override {
            Some(m) => (m, None),
            None => MetricsBuilder::new(config.metrics.clone()).build(&task_manager),
        };
        let metrics = Arc::new(metrics);

        let metrics_addr = if let Some((server, addr)) = metrics_server_info {
            task_manager.spawn("MetricsServer", server.run());
            Some(addr)
        } else {
            None
        };

        // =========================================================================
        // 2. Counter Source & Target
        // =========================================================================
        let provider = match self.provider_override {
            Some(provider) => provider,
            None => {
                debug!(procfs_root = %config.devices.procfs_root.display(), "Using host counters");
                let procfs = ProcFs::new(config.devices.procfs_root.clone());
                Arc::new(HostProvider::new(procfs)) as Arc<dyn MetricsProvider>
            }
        };
        let root_pid = resolve_target(provider.as_ref(), &config.target)?;
        let source = SnapshotSource::new(
            provider,
            root_pid,
            config.devices.network_interface.clone(),
            config.devices.disk_device.clone(),
        );

        // =========================================================================
        // 3. Report Sinks
        // =========================================================================
        let sinks = match self.sink_override {
            Some(sinks) => sinks,
            None => build_sinks(&config.output).await?,
        };

        // =========================================================================
        // 4. Sampler & Correlation
        // =========================================================================
        let mut sampler = Sampler::new(
            source,
            config.sampling.tick_interval(),
            config.sampling.window_length,
            ReportManager::new(sinks),
            metrics.clone(),
        )
        .with_max_windows(config.sampling.windows);

        if config.reference.enabled {
            let dir = match self.reference_dir_override {
                Some(dir) => dir,
                None => ReferenceLocation::resolve(&config.reference).await?.dir(),
            };
            info!(dir = %dir.display(), max_attempts = config.reference.max_attempts, "Correlating with reference files");
            let queue = CorrelationQueue::new(
                ReferenceCorrelator::new(dir),
                config.reference.max_attempts,
                metrics.clone(),
            );
            sampler = sampler.with_correlation(queue);
        }

        let sampler = tokio::spawn(sampler.run(stop_rx));
        task_manager.spawn("Sampler-heartbeat", run_heartbeat("Sampler", task_manager.get_shutdown_rx()));

        info!(root_pid, "StatWatch initialized.");
        Ok(App {
            task_manager,
            metrics_addr,
            root_pid,
            sampler,
            shutdown_rx,
            stop_tx,
        })
    }
}
