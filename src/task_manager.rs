//! Owns the background tasks spawned next to the sampler.
use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Handles = Vec<(&'static str, JoinHandle<()>)>;

/// Keeps the `JoinHandle` of every named background task and hands out the
/// shared shutdown receiver.
///
/// Tasks are expected to watch the receiver and return once it changes;
/// `shutdown` then waits for all of them.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Handles>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.lock().push((name, handle));
    }

    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Number of tasks not yet awaited.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Awaits every managed task. Returns the names of tasks that panicked.
    pub async fn shutdown(self) -> Vec<&'static str> {
        let handles: Handles = self.lock().drain(..).collect();
        if handles.is_empty() {
            return Vec::new();
        }
        info!(tasks = handles.len(), "Waiting for background tasks to stop");

        let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let panicked: Vec<&'static str> = names
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| match result {
                Ok(()) => {
                    debug!(task_name = name, "Task stopped");
                    None
                }
                Err(e) => {
                    error!(task_name = name, error = %e, "Task panicked");
                    Some(name)
                }
            })
            .collect();

        if panicked.is_empty() {
            info!("All background tasks stopped.");
        }
        panicked
    }

    fn lock(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
