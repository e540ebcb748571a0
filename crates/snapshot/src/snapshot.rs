//! The immutable per-project snapshot (component C3).
//!
//! A published snapshot is never mutated. The refresh pipeline
//! (`abtree-refresh`) builds a successor value and the registry swaps it in
//! atomically; everything in here is plain, shareable data, the same shape
//! the teacher's `ClonedSnapshotView` takes for its own config views.

use abtree_core::{BucketInfo, Domain, DomainMetadata, Layer, MetricsControl, RemoteConfig};
use rustc_hash::{FxHashMap, FxHashSet};

/// Immutable, point-in-time configuration bound to one project.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Opaque version token from the control plane; empty before the first
    /// successful fetch.
    pub version: String,
    /// The root of the domain tree.
    pub root: Domain,
    /// `holdout_layer_key -> layer`. Holdout layers never live in the domain
    /// tree directly, only the keys referencing them do.
    pub holdout_layers: FxHashMap<String, Layer>,
    /// Every layer found anywhere in the tree (including holdout layers),
    /// keyed by layer key.
    pub layers: FxHashMap<String, Layer>,
    /// Layers reachable only via a chain of full-flow domains; these may be
    /// evaluated directly without walking their ancestry.
    pub full_flow_layers: FxHashSet<String>,
    /// `layer_key -> [domain metadata from root to immediate parent]`, used
    /// to gate a direct layer-key lookup against its ancestors' traffic.
    pub layer_ancestry: FxHashMap<String, Vec<DomainMetadata>>,
    /// `experiment_id -> bucket info`, populated for every experiment on a
    /// double-hash layer.
    pub experiment_buckets: FxHashMap<u64, BucketInfo>,
    /// `group_id -> bucket info`, populated for every non-default group.
    pub group_buckets: FxHashMap<u64, BucketInfo>,
    /// `(unit_id_type, platform) -> tag keys eligible for this pair`. Only
    /// pairs with two or more distinct tags are prefetch-eligible.
    pub dmp_catalog: FxHashMap<(String, String), Vec<String>>,
    /// `variant_key -> [layer keys]`, derived from each layer's default
    /// group's parameter keys.
    pub variant_to_layers: FxHashMap<String, Vec<String>>,
    /// Remote-config / feature-flag entries, keyed by config key.
    pub remote_configs: FxHashMap<String, RemoteConfig>,
    /// `id -> layer_key -> group_id`, the override list. Both `unit_id` and
    /// `new_unit_id` entries land in the same map at publish time; new-id
    /// entries are merged in after standard ones so they win on conflict.
    pub override_list: FxHashMap<String, FxHashMap<String, u64>>,
    /// `id -> config_key -> raw value`, the remote-config override list.
    /// Same precedence rule as `override_list`.
    pub config_override_list: FxHashMap<String, FxHashMap<String, Vec<u8>>>,
    /// Refresh interval the control plane wants between cycles, in seconds.
    /// Zero/unset falls back to the pipeline's own default.
    pub refresh_interval_secs: u64,
    /// Plugin init payloads and per-event telemetry sampling config.
    pub control: MetricsControl,
}

impl Snapshot {
    /// Look up a layer by key, checking the domain-tree layer index first
    /// and then the holdout index.
    pub fn layer(&self, key: &str) -> Option<&Layer> {
        self.layers.get(key).or_else(|| self.holdout_layers.get(key))
    }

    /// Resolve the override-list entry for a layer, preferring `new_unit_id`
    /// over `unit_id` when both are present, matching the merge-at-publish
    /// precedence.
    pub fn override_for(&self, unit_id: &str, new_unit_id: &str, layer_key: &str) -> Option<u64> {
        if !new_unit_id.is_empty() {
            if let Some(group) = self.override_list.get(new_unit_id).and_then(|m| m.get(layer_key)) {
                return Some(*group);
            }
        }
        self.override_list.get(unit_id).and_then(|m| m.get(layer_key)).copied()
    }

    /// Resolve the override-list entry for a remote-config key, preferring
    /// `new_unit_id` over `unit_id` when both are present.
    pub fn config_override_for(&self, unit_id: &str, new_unit_id: &str, config_key: &str) -> Option<Vec<u8>> {
        if !new_unit_id.is_empty() {
            if let Some(value) = self.config_override_list.get(new_unit_id).and_then(|m| m.get(config_key)) {
                return Some(value.clone());
            }
        }
        self.config_override_list.get(unit_id).and_then(|m| m.get(config_key)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abtree_core::{HashMethod, HashParams, HashType, UnitIdType};

    fn empty_domain() -> Domain {
        Domain {
            metadata: DomainMetadata {
                key: "root".into(),
                hash: HashParams { method: HashMethod::Bkdr, seed: 1, unit_id_type: UnitIdType::Standard, bucket_size: 100 },
                traffic: vec![],
            },
            holdouts: vec![],
            multi_layers: vec![],
            subdomains: vec![],
        }
    }

    fn empty_snapshot() -> Snapshot {
        Snapshot {
            version: "v1".into(),
            root: empty_domain(),
            holdout_layers: FxHashMap::default(),
            layers: FxHashMap::default(),
            full_flow_layers: FxHashSet::default(),
            layer_ancestry: FxHashMap::default(),
            experiment_buckets: FxHashMap::default(),
            group_buckets: FxHashMap::default(),
            dmp_catalog: FxHashMap::default(),
            variant_to_layers: FxHashMap::default(),
            remote_configs: FxHashMap::default(),
            override_list: FxHashMap::default(),
            config_override_list: FxHashMap::default(),
            refresh_interval_secs: 3,
            control: MetricsControl::default(),
        }
    }

    #[test]
    fn new_unit_id_override_wins_on_conflict() {
        let mut snap = empty_snapshot();
        let mut by_unit = FxHashMap::default();
        by_unit.insert("L".to_string(), 1u64);
        snap.override_list.insert("u1".to_string(), by_unit);
        let mut by_new = FxHashMap::default();
        by_new.insert("L".to_string(), 2u64);
        snap.override_list.insert("nu1".to_string(), by_new);

        assert_eq!(snap.override_for("u1", "nu1", "L"), Some(2));
        assert_eq!(snap.override_for("u1", "", "L"), Some(1));
    }
}
