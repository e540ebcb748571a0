//! The background snapshot refresh loop (component C4).

use crate::client::{ControlPlaneClient, ResponseCode};
use abtree_snapshot::{builder, Snapshot};
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A refresh cycle never issues more than this many consecutive
/// `SameVersion` quiescence retries in a row before it stops bothering the
/// control plane for bucket deltas (it still asks for the full config every
/// cycle).
pub const MAX_RETRY: u32 = 10;

/// Fallback refresh interval used when the control plane hasn't told us one
/// yet, or told us a non-positive one.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

/// Shared, keyed store of published snapshots. Readers take a reference via
/// [`SnapshotStore::get`]; the refresh loop is the only writer.
pub type SnapshotStore = Arc<DashMap<String, Arc<Snapshot>>>;

/// Outcome of one refresh cycle, reported to a [`RefreshObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was fetched and published.
    Updated,
    /// The control plane reported no change; quiescence retry incremented.
    SameVersion,
    /// The cycle failed; previous snapshot preserved.
    Failed,
}

/// Observes refresh cycles — used to feed the C7 telemetry pipeline without
/// this crate depending on it directly.
pub trait RefreshObserver: Send + Sync {
    /// Called once per cycle, after success or failure. `metrics` is the
    /// just-published (or, on failure, last-known) snapshot's default
    /// sampling config, used to sample this monitor event.
    fn on_refresh(&self, project: &str, outcome: RefreshOutcome, latency: Duration, metrics: abtree_core::EventMetricsConfig);
}

/// A no-op observer, used when the caller doesn't care.
pub struct NullObserver;

impl RefreshObserver for NullObserver {
    fn on_refresh(&self, _project: &str, _outcome: RefreshOutcome, _latency: Duration, _metrics: abtree_core::EventMetricsConfig) {}
}

/// Per-project mutable state the loop owns between cycles.
struct ProjectState {
    version: parking_lot::Mutex<String>,
    quiescent_retries: AtomicU32,
}

impl ProjectState {
    fn new() -> Self {
        ProjectState { version: parking_lot::Mutex::new(String::new()), quiescent_retries: AtomicU32::new(0) }
    }
}

/// Run one refresh cycle for `project`: fetch the full config (skipping the
/// fetch entirely if unchanged), derive indices, apply incremental bucket
/// deltas when under the quiescence retry budget, and publish the result.
pub(crate) async fn run_cycle(
    project: &str,
    client: &dyn ControlPlaneClient,
    store: &SnapshotStore,
    state: &ProjectState,
) -> RefreshOutcome {
    let started = Instant::now();
    let current_version = state.version.lock().clone();

    let response = match client.get_tab_config(project, &current_version).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(project, error = %e, "tab config fetch failed, keeping previous snapshot");
            return RefreshOutcome::Failed;
        }
    };

    let (snapshot, outcome) = match response.code {
        ResponseCode::SameVersion => {
            state.quiescent_retries.fetch_add(1, Ordering::SeqCst);
            match store.get(project) {
                Some(existing) => (existing.clone(), RefreshOutcome::SameVersion),
                None => return RefreshOutcome::Failed,
            }
        }
        ResponseCode::Error(e) => {
            tracing::warn!(project, error = %e, "control plane returned an error");
            return RefreshOutcome::Failed;
        }
        ResponseCode::Success => {
            let Some(config) = response.config else {
                return RefreshOutcome::Failed;
            };
            state.quiescent_retries.store(0, Ordering::SeqCst);
            *state.version.lock() = config.version.clone();

            let refresh_interval_secs = if config.refresh_interval.is_zero() {
                DEFAULT_REFRESH_INTERVAL.as_secs()
            } else {
                config.refresh_interval.as_secs()
            };
            let mut snapshot = builder::build(
                config.root,
                &config.layer_catalog,
                config.remote_configs,
                config.override_list,
                config.config_override_list,
                refresh_interval_secs,
                config.control,
            );
            snapshot.version = config.version;
            (Arc::new(snapshot), RefreshOutcome::Updated)
        }
    };

    let retries = state.quiescent_retries.load(Ordering::SeqCst);
    if retries <= MAX_RETRY {
        let mut snapshot = (*snapshot).clone();
        if let Err(e) = apply_bucket_deltas(project, client, &mut snapshot).await {
            tracing::warn!(project, error = %e, "bucket delta fetch failed for this cycle");
            store.insert(project.to_string(), Arc::new(snapshot));
            return RefreshOutcome::Failed;
        }
        store.insert(project.to_string(), Arc::new(snapshot));
    } else {
        store.insert(project.to_string(), snapshot);
        tracing::debug!(project, retries, "silent period: skipping bucket delta fetch");
    }

    let _ = started.elapsed();
    outcome
}

async fn apply_bucket_deltas(
    project: &str,
    client: &dyn ControlPlaneClient,
    snapshot: &mut Snapshot,
) -> Result<(), String> {
    let exp_versions: FxHashMap<u64, String> = FxHashMap::default();
    let experiment_deltas = client.batch_get_experiment_buckets(project, &exp_versions).await?;
    builder::apply_experiment_deltas(snapshot, experiment_deltas)?;

    let group_versions: FxHashMap<u64, String> = FxHashMap::default();
    let group_deltas = client.batch_get_group_buckets(project, &group_versions).await?;
    builder::apply_group_deltas(snapshot, group_deltas)?;
    Ok(())
}

/// Spawn the background refresh loop for `project`. The loop exits as soon
/// as `store` no longer contains an entry for the project (release).
pub fn spawn_loop(
    project: String,
    client: Arc<dyn ControlPlaneClient>,
    store: SnapshotStore,
    observer: Arc<dyn RefreshObserver>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let state = ProjectState::new();
        loop {
            if store.get(&project).is_none() && !state.version.lock().is_empty() {
                tracing::info!(project = %project, "project released, stopping refresh loop");
                break;
            }
            let started = Instant::now();
            let outcome = run_cycle(&project, client.as_ref(), &store, &state).await;
            let metrics = store.get(&project).map(|s| s.control.default_metrics).unwrap_or_default();
            observer.on_refresh(&project, outcome, started.elapsed(), metrics);

            if store.get(&project).is_none() {
                break;
            }
            let interval = store
                .get(&project)
                .map(|s| Duration::from_secs(s.refresh_interval_secs.max(1)))
                .unwrap_or(DEFAULT_REFRESH_INTERVAL);
            tokio::time::sleep(interval).await;
        }
    })
}
