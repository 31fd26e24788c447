use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::trace;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(3);

/// Logs a trace line every few seconds until shutdown is signalled.
///
/// Long-running tasks spawn one under their own name. A heartbeat that keeps
/// logging after shutdown points at a task that ignores the signal.
pub async fn run_heartbeat(task_name: &'static str, mut shutdown_rx: watch::Receiver<bool>) {
    let mut timer = interval(HEARTBEAT_PERIOD);
    trace!(task = task_name, "Heartbeat started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = timer.tick() => trace!(task = task_name, "Heartbeat"),
        }
    }
    trace!(task = task_name, "Heartbeat stopped");
}
