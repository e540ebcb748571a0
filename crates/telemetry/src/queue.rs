//! Bounded MPMC exposure queues and the fixed worker pool that drains them
//! into every registered [`MetricsPlugin`] (component C7).
//!
//! Four queues, one per record type, each independently bounded. A full
//! queue drops the record rather than blocking the caller — telemetry is
//! best-effort and must never slow down an assignment call.

use crate::plugin::MetricsPlugin;
use crate::records::{ConfigExposureRecord, EventRecord, ExposureRecord, MonitorEventRecord};
use abtree_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Default per-queue capacity. Matches the control plane's own exposure
/// buffer sizing: generous enough that a queue only fills under sustained
/// plugin-side backpressure, never under ordinary load.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1 << 19;

/// The running exposure pipeline: four bounded queues plus the worker pool
/// draining them. Dropping this stops the workers once the queues empty.
pub struct Pipeline {
    exposures_tx: mpsc::Sender<ExposureRecord>,
    config_tx: mpsc::Sender<ConfigExposureRecord>,
    events_tx: mpsc::Sender<EventRecord>,
    monitor_tx: mpsc::Sender<MonitorEventRecord>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Start a pipeline with the default queue capacity and a worker count
    /// of `max(available_parallelism, 4)`.
    pub fn start(plugins: Vec<Arc<dyn MetricsPlugin>>) -> Self {
        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).max(4);
        Self::start_with(plugins, DEFAULT_QUEUE_CAPACITY, worker_count)
    }

    /// Start a pipeline with an explicit queue capacity and worker count,
    /// for tests that want to observe queue-full behaviour deterministically.
    pub fn start_with(plugins: Vec<Arc<dyn MetricsPlugin>>, capacity: usize, worker_count: usize) -> Self {
        let (exposures_tx, exposures_rx) = mpsc::channel(capacity);
        let (config_tx, config_rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (monitor_tx, monitor_rx) = mpsc::channel(capacity);

        let exposures_rx = Arc::new(AsyncMutex::new(exposures_rx));
        let config_rx = Arc::new(AsyncMutex::new(config_rx));
        let events_rx = Arc::new(AsyncMutex::new(events_rx));
        let monitor_rx = Arc::new(AsyncMutex::new(monitor_rx));
        let plugins = Arc::new(plugins);

        let workers = (0..worker_count)
            .map(|_| {
                tokio::spawn(worker_loop(
                    exposures_rx.clone(),
                    config_rx.clone(),
                    events_rx.clone(),
                    monitor_rx.clone(),
                    plugins.clone(),
                ))
            })
            .collect();

        Pipeline { exposures_tx, config_tx, events_tx, monitor_tx, workers }
    }

    /// Enqueue an exposure record. Drops (and returns `Err`) if the queue is
    /// at capacity.
    pub fn enqueue_exposure(&self, record: ExposureRecord) -> Result<()> {
        self.exposures_tx.try_send(record).map_err(|_| Error::QueueFull("exposure".into()))
    }

    /// Enqueue a remote-config exposure record.
    pub fn enqueue_config_exposure(&self, record: ConfigExposureRecord) -> Result<()> {
        self.config_tx.try_send(record).map_err(|_| Error::QueueFull("config-exposure".into()))
    }

    /// Enqueue a business event record.
    pub fn enqueue_event(&self, record: EventRecord) -> Result<()> {
        self.events_tx.try_send(record).map_err(|_| Error::QueueFull("event".into()))
    }

    /// Enqueue an internal monitoring record.
    pub fn enqueue_monitor_event(&self, record: MonitorEventRecord) -> Result<()> {
        self.monitor_tx.try_send(record).map_err(|_| Error::QueueFull("monitor-event".into()))
    }

    /// Number of worker tasks backing this pipeline.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop(
    exposures: Arc<AsyncMutex<mpsc::Receiver<ExposureRecord>>>,
    configs: Arc<AsyncMutex<mpsc::Receiver<ConfigExposureRecord>>>,
    events: Arc<AsyncMutex<mpsc::Receiver<EventRecord>>>,
    monitors: Arc<AsyncMutex<mpsc::Receiver<MonitorEventRecord>>>,
    plugins: Arc<Vec<Arc<dyn MetricsPlugin>>>,
) {
    loop {
        tokio::select! {
            maybe = async { exposures.lock().await.recv().await } => {
                match maybe {
                    Some(record) => dispatch(&plugins, |p| p.log_exposure(&record)),
                    None => break,
                }
            }
            maybe = async { configs.lock().await.recv().await } => {
                match maybe {
                    Some(record) => dispatch(&plugins, |p| p.log_config_exposure(&record)),
                    None => break,
                }
            }
            maybe = async { events.lock().await.recv().await } => {
                match maybe {
                    Some(record) => dispatch(&plugins, |p| p.log_event(&record)),
                    None => break,
                }
            }
            maybe = async { monitors.lock().await.recv().await } => {
                match maybe {
                    Some(record) => dispatch(&plugins, |p| p.log_monitor_event(&record)),
                    None => break,
                }
            }
        }
    }
}

/// Dispatch one record to every plugin, catching (and logging) panics so one
/// bad plugin never takes a worker down.
fn dispatch(plugins: &[Arc<dyn MetricsPlugin>], call: impl Fn(&Arc<dyn MetricsPlugin>)) {
    for plugin in plugins {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| call(plugin)));
        if result.is_err() {
            tracing::warn!(plugin = plugin.name(), "telemetry plugin panicked, dropping this record for it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::RecordingPlugin;
    use std::time::Duration;

    fn exposure(unit_id: &str) -> ExposureRecord {
        ExposureRecord {
            project: "p".into(),
            unit_id: unit_id.into(),
            layer_key: "L".into(),
            experiment_key: None,
            group_key: "g".into(),
            group_id: 1,
            params: Default::default(),
            expansion: Default::default(),
            scene_ids: Vec::new(),
            exposure_type: crate::records::ExposureType::Automatic,
            timestamp_ms: 0,
        }
    }

    #[tokio::test]
    async fn exposures_reach_the_plugin() {
        let plugin = Arc::new(RecordingPlugin::default());
        let pipeline = Pipeline::start_with(vec![plugin.clone()], 16, 2);
        pipeline.enqueue_exposure(exposure("u1")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(plugin.exposures().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_and_reports_queue_full() {
        // No workers draining: the channel fills after `capacity` sends.
        let plugin = Arc::new(RecordingPlugin::default());
        let pipeline = Pipeline::start_with(vec![plugin], 1, 0);
        pipeline.enqueue_exposure(exposure("u1")).unwrap();
        let result = pipeline.enqueue_exposure(exposure("u2"));
        assert!(matches!(result, Err(Error::QueueFull(_))));
    }
}
