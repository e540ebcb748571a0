//! The remote-config / feature-flag evaluator (component C6).
//!
//! Resolution order: override list, then the config's own holdout chain
//! (a catch serves the default value outright), then its ordered condition
//! list, first match wins. A condition may delegate to a bound experiment
//! for its value instead of carrying a static one; that delegation goes
//! through a [`Options::scoped_to_experiment`] copy so the caller's own
//! options (and any other condition evaluated in the same call) never see
//! the narrowed experiment filter.

use crate::engine;
use abtree_core::{bucket, hit_traffic, Error, IssueType, Options, Result, Session};
use abtree_snapshot::Snapshot;
use abtree_tags::{matches, DmpClient};

/// Resolve one remote-config key for a session.
pub async fn get_config(
    snapshot: &Snapshot,
    session: &Session,
    options: &mut Options,
    key: &str,
    dmp: &dyn DmpClient,
) -> Result<Vec<u8>> {
    if let Some(err) = &session.build_error {
        return Err(err.clone());
    }

    if let Some(value) = snapshot.config_override_for(&session.unit_id, &session.new_unit_id, key) {
        return Ok(value);
    }

    let Some(config) = snapshot.remote_configs.get(key) else {
        return Err(Error::KeyNotFound(key.to_string()));
    };

    if !config.holdout_layer_keys.is_empty() {
        let mut scoped = options.clone();
        scoped.layer_keys = config.holdout_layer_keys.clone();
        let hits = engine::get_experiments(snapshot, session, &mut scoped, dmp).await?;
        let caught = config
            .holdout_layer_keys
            .iter()
            .filter_map(|k| hits.get(k))
            .any(|hit| !hit.is_default && hit.is_control);
        if caught {
            return Ok(config.default_value.clone());
        }
    }

    for condition in &config.conditions {
        let unit = session.hash_decision_id(condition.hash.unit_id_type);
        let b = bucket(condition.hash.method, condition.hash.seed, unit, condition.hash.bucket_size);
        if !hit_traffic(b, &condition.bucket) {
            continue;
        }

        let condition_matches = match condition.issue_type {
            IssueType::Percentage => true,
            IssueType::Tag | IssueType::CityTag => {
                matches(&condition.tag_expression, session, options, condition.hash.unit_id_type, dmp).await
            }
        };
        if !condition_matches {
            continue;
        }

        if let Some(experiment_key) = &condition.experiment_key {
            if let Some(value) = delegate_to_experiment(snapshot, session, options, experiment_key, key, dmp).await? {
                return Ok(value);
            }
            continue;
        }

        return Ok(condition.value.clone());
    }

    Ok(config.default_value.clone())
}

/// Find the layer owning `experiment_key`, evaluate it with an
/// experiment-scoped copy of `options`, and pull `config_key` out of the
/// winning group's parameters. Returns `Ok(None)` when nothing resolves
/// (the caller falls through to its next condition).
async fn delegate_to_experiment(
    snapshot: &Snapshot,
    session: &Session,
    options: &Options,
    experiment_key: &str,
    config_key: &str,
    dmp: &dyn DmpClient,
) -> Result<Option<Vec<u8>>> {
    let Some(layer) = snapshot.layers.values().find(|l| l.experiments.values().any(|e| e.key == experiment_key))
    else {
        return Ok(None);
    };

    let mut scoped = options.scoped_to_experiment(experiment_key);
    scoped.layer_keys = vec![layer.key.clone()];

    let hits = engine::get_experiments(snapshot, session, &mut scoped, dmp).await?;
    Ok(hits.get(&layer.key).and_then(|hit| hit.params.get(config_key)).map(|v| v.clone().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use abtree_core::{DomainMetadata, Domain, Group, HashMethod, HashParams, HashType, Layer, RemoteConfig, RemoteConfigCondition, TagExpression, UnitIdType};
    use abtree_snapshot::Snapshot as SnapshotStruct;
    use abtree_tags::MockDmpClient;
    use rustc_hash::{FxHashMap, FxHashSet};
    use std::collections::HashMap as StdHashMap;

    fn hash_params() -> HashParams {
        HashParams { method: HashMethod::Bkdr, seed: 1, unit_id_type: UnitIdType::Standard, bucket_size: 100 }
    }

    fn empty_snapshot() -> SnapshotStruct {
        SnapshotStruct {
            version: "v1".into(),
            root: Domain {
                metadata: DomainMetadata { key: "root".into(), hash: hash_params(), traffic: vec![] },
                holdouts: vec![],
                multi_layers: vec![],
                subdomains: vec![],
            },
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
            control: abtree_core::MetricsControl::default(),
        }
    }

    #[tokio::test]
    async fn override_wins_over_every_condition() {
        let mut snap = empty_snapshot();
        snap.remote_configs.insert(
            "flag-a".into(),
            RemoteConfig { key: "flag-a".into(), holdout_layer_keys: vec![], conditions: vec![], default_value: b"off".to_vec() },
        );
        let mut by_unit = FxHashMap::default();
        by_unit.insert("flag-a".to_string(), b"on".to_vec());
        snap.config_override_list.insert("u1".into(), by_unit);

        let session = Session::new("u1");
        let mut options = Options::default();
        let dmp = MockDmpClient::default();

        let value = get_config(&snap, &session, &mut options, "flag-a", &dmp).await.unwrap();
        assert_eq!(value, b"on".to_vec());
    }

    #[tokio::test]
    async fn first_matching_condition_wins() {
        let mut snap = empty_snapshot();
        let percentage_condition = RemoteConfigCondition {
            hash: hash_params(),
            bucket: vec![abtree_core::Range::new(1, 100)],
            issue_type: IssueType::Percentage,
            tag_expression: TagExpression::default(),
            value: b"variant-a".to_vec(),
            experiment_key: None,
        };
        snap.remote_configs.insert(
            "flag-a".into(),
            RemoteConfig {
                key: "flag-a".into(),
                holdout_layer_keys: vec![],
                conditions: vec![percentage_condition],
                default_value: b"off".to_vec(),
            },
        );

        let session = Session::new("u1");
        let mut options = Options::default();
        let dmp = MockDmpClient::default();

        let value = get_config(&snap, &session, &mut options, "flag-a", &dmp).await.unwrap();
        assert_eq!(value, b"variant-a".to_vec());
    }

    #[tokio::test]
    async fn inverted_range_condition_is_skipped() {
        let mut snap = empty_snapshot();
        let impossible_condition = RemoteConfigCondition {
            hash: hash_params(),
            bucket: vec![abtree_core::Range::new(50, 10)],
            issue_type: IssueType::Percentage,
            tag_expression: TagExpression::default(),
            value: b"never".to_vec(),
            experiment_key: None,
        };
        snap.remote_configs.insert(
            "flag-a".into(),
            RemoteConfig {
                key: "flag-a".into(),
                holdout_layer_keys: vec![],
                conditions: vec![impossible_condition],
                default_value: b"off".to_vec(),
            },
        );

        let session = Session::new("u1");
        let mut options = Options::default();
        let dmp = MockDmpClient::default();

        let value = get_config(&snap, &session, &mut options, "flag-a", &dmp).await.unwrap();
        assert_eq!(value, b"off".to_vec());
    }

    #[tokio::test]
    async fn missing_key_is_an_error() {
        let snap = empty_snapshot();
        let session = Session::new("u1");
        let mut options = Options::default();
        let dmp = MockDmpClient::default();
        let result = get_config(&snap, &session, &mut options, "nope", &dmp).await;
        assert!(matches!(result, Err(Error::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn experiment_bound_condition_pulls_param_from_winning_group() {
        let mut snap = empty_snapshot();

        let mut group_params = StdHashMap::new();
        group_params.insert("flag-a".to_string(), "value-from-experiment".to_string());
        let mut groups = StdHashMap::new();
        groups.insert(
            1,
            Group {
                id: 1,
                key: "variant".into(),
                experiment_id: Some(1),
                layer_key: "L".into(),
                is_default: false,
                is_control: false,
                is_override_list: false,
                params: group_params,
                issue_type: IssueType::Percentage,
                tag_expression: TagExpression::default(),
                scene_ids: vec![],
                unit_id_type: UnitIdType::Standard,
            },
        );
        let mut experiments = StdHashMap::new();
        experiments.insert(
            1,
            abtree_core::Experiment {
                id: 1,
                key: "exp-a".into(),
                hash: hash_params(),
                issue_type: IssueType::Percentage,
                group_ids: vec![1],
            },
        );
        let layer = Layer {
            key: "L".into(),
            hash_type: HashType::Double,
            hash: hash_params(),
            default_group_key: None,
            scene_ids: vec![],
            holdout_layer_keys: vec![],
            experiments,
            groups,
        };
        snap.layers.insert("L".into(), layer);
        snap.experiment_buckets.insert(1, abtree_core::BucketInfo::Ranges(vec![abtree_core::Range::new(1, 100)]));
        snap.group_buckets.insert(1, abtree_core::BucketInfo::Ranges(vec![abtree_core::Range::new(1, 100)]));

        let condition = RemoteConfigCondition {
            hash: hash_params(),
            bucket: vec![abtree_core::Range::new(1, 100)],
            issue_type: IssueType::Percentage,
            tag_expression: TagExpression::default(),
            value: b"fallback".to_vec(),
            experiment_key: Some("exp-a".into()),
        };
        snap.remote_configs.insert(
            "flag-a".into(),
            RemoteConfig {
                key: "flag-a".into(),
                holdout_layer_keys: vec![],
                conditions: vec![condition],
                default_value: b"off".to_vec(),
            },
        );

        let session = Session::new("u1");
        let mut options = Options::default();
        let dmp = MockDmpClient::default();

        let value = get_config(&snap, &session, &mut options, "flag-a", &dmp).await.unwrap();
        assert_eq!(value, b"value-from-experiment".to_vec());
        assert!(options.experiment_keys.is_empty(), "delegation must not leak into the caller's options");
    }
}
