use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::plugin::{PluginDescriptor, PluginInfo};

pub mod metrics;

pub use metrics::Metrics;

/// State shared by the scanner, the workers and the binary.
///
/// `plugins` is keyed by filename and only the scanner inserts into it. Every
/// worker handle is tracked in `workers` so shutdown can wait for it.
pub struct SupervisorState {
    pub plugins: DashMap<String, Arc<PluginDescriptor>>,
    pub workers: DashMap<String, JoinHandle<()>>,
    pub metrics: Arc<Metrics>,
    pub shutdown_tx: broadcast::Sender<()>,
    shutting_down: AtomicBool,
}

impl SupervisorState {
    pub fn new() -> (Arc<Self>, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);

        let state = Arc::new(Self {
            plugins: DashMap::new(),
            workers: DashMap::new(),
            metrics: Arc::new(Metrics::new()),
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
        });

        (state, shutdown_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn plugin(&self, filename: &str) -> Option<Arc<PluginDescriptor>> {
        self.plugins.get(filename).map(|entry| entry.value().clone())
    }

    /// Descriptors sorted by filename.
    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self.plugins.iter().map(|entry| entry.value().info()).collect();
        infos.sort_by(|a, b| a.filename.cmp(&b.filename));
        infos
    }

    /// Descriptors with a worker attached.
    pub fn active_plugins(&self) -> usize {
        self.plugins.iter().filter(|entry| !entry.value().is_obsolete()).count()
    }

    /// Ask every worker to stop its plugin and wait up to `timeout` for them.
    /// Workers still running after that are aborted, which kills their child.
    pub async fn shutdown(&self, timeout: Duration) {
        tracing::info!("Initiating supervisor shutdown");

        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let filenames: Vec<String> = self.workers.iter().map(|entry| entry.key().clone()).collect();
        let handles: Vec<JoinHandle<()>> = filenames
            .iter()
            .filter_map(|filename| self.workers.remove(filename).map(|(_, handle)| handle))
            .collect();
        let aborts: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();

        tracing::info!("Waiting for {} worker(s) to stop", handles.len());
        if tokio::time::timeout(timeout, join_all(handles)).await.is_err() {
            tracing::warn!("Workers did not stop within {:?}, aborting them", timeout);
            for abort in aborts {
                abort.abort();
            }
        }

        tracing::info!("Supervisor stopped\n{}", self.metrics.render());
    }
}
