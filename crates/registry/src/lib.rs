//! The project registry (component C10): owns the snapshot store, spawns
//! and tears down the background refresh loop per project, and wires the
//! refresh pipeline to telemetry.
#![warn(missing_docs)]
#![warn(clippy::all)]

use abtree_assign::{get_config, get_experiments, ExperimentHit};
use abtree_core::{Error, Options, Result, Session};
use abtree_refresh::{spawn_loop, ControlPlaneClient, SnapshotStore};
use abtree_snapshot::Snapshot;
use abtree_tags::DmpClient;
use abtree_telemetry::{
    should_sample, ConfigExposureRecord, EventRecord, ExposureRecord, ExposureType, MetricsPlugin, Pipeline,
    TelemetryRefreshObserver,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Owns every registered project's snapshot and background refresh loop for
/// one process. Most applications create exactly one of these; the facade
/// in `abtree-api` holds it behind a global one-shot latch.
pub struct Registry {
    store: SnapshotStore,
    client: Arc<dyn ControlPlaneClient>,
    dmp: Arc<dyn DmpClient>,
    telemetry: Arc<Pipeline>,
    handles: DashMap<String, JoinHandle<()>>,
}

impl Registry {
    /// Build a registry around a control-plane transport, a DMP transport,
    /// and the telemetry plugins to dispatch records to.
    pub fn new(client: Arc<dyn ControlPlaneClient>, dmp: Arc<dyn DmpClient>, plugins: Vec<Arc<dyn MetricsPlugin>>) -> Self {
        Registry {
            store: Arc::new(DashMap::new()),
            client,
            dmp,
            telemetry: Arc::new(Pipeline::start(plugins)),
            handles: DashMap::new(),
        }
    }

    /// Start tracking `project`: spawns its background refresh loop. A
    /// second call for an already-registered project is a no-op.
    pub fn register_project(&self, project: impl Into<String>) {
        let project = project.into();
        if self.handles.contains_key(&project) {
            return;
        }
        let observer = Arc::new(TelemetryRefreshObserver::new(self.telemetry.clone()));
        let handle = spawn_loop(project.clone(), self.client.clone(), self.store.clone(), observer);
        self.handles.insert(project, handle);
    }

    /// Stop tracking `project`: removes its snapshot (the refresh loop sees
    /// this on its next iteration and exits on its own) and aborts the task
    /// outright so release is immediate from the caller's point of view.
    pub fn release_project(&self, project: &str) {
        self.store.remove(project);
        if let Some((_, handle)) = self.handles.remove(project) {
            handle.abort();
        }
    }

    /// The current published snapshot for `project`.
    pub fn snapshot(&self, project: &str) -> Result<Arc<Snapshot>> {
        self.store.get(project).map(|entry| entry.clone()).ok_or_else(|| Error::ProjectNotFound(project.to_string()))
    }

    /// Resolve every matching layer for `session` within `project`. When
    /// `options.auto_exposure` is set, enqueues one automatic exposure record
    /// per hit; always enqueues one event record for the call itself.
    pub async fn get_experiments(
        &self,
        project: &str,
        session: &Session,
        options: &mut Options,
    ) -> Result<HashMap<String, ExperimentHit>> {
        let started = Instant::now();
        let snapshot = self.snapshot(project)?;
        let result = get_experiments(&snapshot, session, options, self.dmp.as_ref()).await;

        if options.auto_exposure {
            if let Ok(hits) = &result {
                for hit in hits.values() {
                    self.report_exposure(project, &snapshot, session, hit, ExposureType::Automatic);
                }
            }
        }
        self.report_event(project, &snapshot, session, "get_experiments", result.is_ok(), started.elapsed());
        result
    }

    /// Log a caller-initiated exposure for a hit already obtained from
    /// [`Registry::get_experiments`], regardless of `auto_exposure`.
    pub fn log_manual_exposure(&self, project: &str, session: &Session, hit: &ExperimentHit) -> Result<()> {
        let snapshot = self.snapshot(project)?;
        self.report_exposure(project, &snapshot, session, hit, ExposureType::Manual);
        Ok(())
    }

    /// Resolve one remote-config key for `session` within `project`.
    pub async fn get_config(&self, project: &str, session: &Session, options: &mut Options, key: &str) -> Result<Vec<u8>> {
        let started = Instant::now();
        let snapshot = self.snapshot(project)?;
        let result = get_config(&snapshot, session, options, key, self.dmp.as_ref()).await;

        if let Ok(value) = &result {
            let sampling = snapshot.control.sampling_for(key);
            if should_sample(sampling.sampling_interval) {
                let record = ConfigExposureRecord {
                    project: project.to_string(),
                    unit_id: session.unit_id.clone(),
                    config_key: key.to_string(),
                    value: value.clone(),
                    timestamp_ms: now_millis(),
                };
                if self.telemetry.enqueue_config_exposure(record).is_err() {
                    tracing::warn!(project, key, "config-exposure queue full, dropping record");
                }
            }
        }
        self.report_event(project, &snapshot, session, "get_config", result.is_ok(), started.elapsed());
        result
    }

    fn report_exposure(&self, project: &str, snapshot: &Snapshot, session: &Session, hit: &ExperimentHit, exposure_type: ExposureType) {
        let sampling = snapshot.control.sampling_for(&hit.layer_key);
        if !should_sample(sampling.sampling_interval) {
            return;
        }
        let scene_ids = snapshot.layer(&hit.layer_key).map(|l| l.scene_ids.clone()).unwrap_or_default();
        let record = ExposureRecord {
            project: project.to_string(),
            unit_id: session.unit_id.clone(),
            layer_key: hit.layer_key.clone(),
            experiment_key: hit.experiment_key.clone(),
            group_key: hit.group_key.clone(),
            group_id: hit.group_id,
            params: hit.params.clone(),
            expansion: session.expansion.clone(),
            scene_ids,
            exposure_type,
            timestamp_ms: now_millis(),
        };
        if self.telemetry.enqueue_exposure(record).is_err() {
            tracing::warn!(project, layer = %hit.layer_key, "exposure queue full, dropping record");
        }
    }

    fn report_event(&self, project: &str, snapshot: &Snapshot, session: &Session, name: &str, ok: bool, latency: std::time::Duration) {
        let sampling = snapshot.control.sampling_for(name);
        let interval = if ok { sampling.sampling_interval } else { sampling.err_sampling_interval };
        if !should_sample(interval) {
            return;
        }
        let mut properties = HashMap::new();
        properties.insert("status".to_string(), if ok { "ok".to_string() } else { "error".to_string() });
        properties.insert("latency_ms".to_string(), latency.as_millis().to_string());
        let record = EventRecord {
            project: project.to_string(),
            unit_id: session.unit_id.clone(),
            name: name.to_string(),
            properties,
            timestamp_ms: now_millis(),
        };
        if self.telemetry.enqueue_event(record).is_err() {
            tracing::warn!(project, name, "event queue full, dropping record");
        }
    }

    /// The telemetry pipeline backing this registry, for callers that want
    /// to enqueue exposure/event records directly.
    pub fn telemetry(&self) -> &Arc<Pipeline> {
        &self.telemetry
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
