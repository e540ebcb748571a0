//! The `ControlPlaneClient` transport boundary and its wire-shaped payloads.
//!
//! This models the three RPCs the reference control plane exposes
//! (`GetTabConfig`, `BatchGetExperimentBucket`, `BatchGetGroupBucket`) as one
//! async trait so the refresh pipeline stays transport-agnostic. A real
//! implementation signs HTTP requests with the `X-Token`/`X-AK`/`X-ET`/`X-ES`
//! headers; tests and the demo CLI use [`MockControlPlaneClient`].

use abtree_core::{Domain, Layer, MetricsControl, RemoteConfig};
use abtree_snapshot::BucketDelta;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::time::Duration;

/// Outcome code of a `GetTabConfig` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// A new payload is attached.
    Success,
    /// The project's config is unchanged since `current_version`.
    SameVersion,
    /// The control plane rejected the request or failed.
    Error(String),
}

/// The full configuration payload for one project.
#[derive(Debug, Clone)]
pub struct TabConfig {
    /// Opaque version token.
    pub version: String,
    /// Domain tree root.
    pub root: Domain,
    /// Flat catalog of every layer referenced anywhere in `root`.
    pub layer_catalog: FxHashMap<String, Layer>,
    /// Remote-config / feature-flag entries.
    pub remote_configs: FxHashMap<String, RemoteConfig>,
    /// Override-list entries: `id -> layer_key -> group_id`.
    pub override_list: FxHashMap<String, FxHashMap<String, u64>>,
    /// Remote-config override-list entries: `id -> config_key -> raw value`.
    pub config_override_list: FxHashMap<String, FxHashMap<String, Vec<u8>>>,
    /// Refresh interval the control plane wants between cycles.
    pub refresh_interval: Duration,
    /// Plugin init payloads and per-event telemetry sampling config.
    pub control: MetricsControl,
}

/// Response envelope for `GetTabConfig`.
#[derive(Debug, Clone)]
pub struct TabConfigResponse {
    /// Outcome code.
    pub code: ResponseCode,
    /// Present only when `code == Success`.
    pub config: Option<TabConfig>,
}

/// Transport boundary to the control plane.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Fetch the full config for `project` if it has changed since
    /// `current_version`.
    async fn get_tab_config(&self, project: &str, current_version: &str) -> Result<TabConfigResponse, String>;

    /// Fetch incremental experiment-bucket deltas for the given
    /// `experiment_id -> known_version` map.
    async fn batch_get_experiment_buckets(
        &self,
        project: &str,
        versions: &FxHashMap<u64, String>,
    ) -> Result<Vec<BucketDelta>, String>;

    /// Fetch incremental group-bucket deltas for the given
    /// `group_id -> known_version` map.
    async fn batch_get_group_buckets(
        &self,
        project: &str,
        versions: &FxHashMap<u64, String>,
    ) -> Result<Vec<BucketDelta>, String>;
}

/// In-memory `ControlPlaneClient` used by tests and the demo CLI. Serves a
/// single fixed [`TabConfig`] per project and reports `SameVersion` once the
/// caller already has it.
#[derive(Default)]
pub struct MockControlPlaneClient {
    configs: FxHashMap<String, TabConfig>,
}

impl MockControlPlaneClient {
    /// Register the config a project should receive.
    pub fn with_project(mut self, project: impl Into<String>, config: TabConfig) -> Self {
        self.configs.insert(project.into(), config);
        self
    }
}

#[async_trait]
impl ControlPlaneClient for MockControlPlaneClient {
    async fn get_tab_config(&self, project: &str, current_version: &str) -> Result<TabConfigResponse, String> {
        let Some(config) = self.configs.get(project) else {
            return Err(format!("unknown project: {project}"));
        };
        if config.version == current_version {
            return Ok(TabConfigResponse { code: ResponseCode::SameVersion, config: None });
        }
        Ok(TabConfigResponse { code: ResponseCode::Success, config: Some(config.clone()) })
    }

    async fn batch_get_experiment_buckets(
        &self,
        _project: &str,
        _versions: &FxHashMap<u64, String>,
    ) -> Result<Vec<BucketDelta>, String> {
        Ok(Vec::new())
    }

    async fn batch_get_group_buckets(
        &self,
        _project: &str,
        _versions: &FxHashMap<u64, String>,
    ) -> Result<Vec<BucketDelta>, String> {
        Ok(Vec::new())
    }
}
