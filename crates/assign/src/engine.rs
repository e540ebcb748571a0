//! The assignment engine (component C5): walks the domain tree (or a
//! caller-supplied layer-key filter) and resolves one [`ExperimentHit`] per
//! matched layer.

use crate::hit::ExperimentHit;
use abtree_core::{bucket, hit_traffic, Domain, Error, Group, IssueType, Layer, Options, Result, Session};
use abtree_snapshot::Snapshot;
use abtree_tags::{matches, DmpClient};
use rustc_hash::FxHashMap;
use std::collections::HashMap;

/// Per-call evaluation context threaded through the recursive walk.
struct Ctx<'a> {
    snapshot: &'a Snapshot,
    session: &'a Session,
    options: &'a mut Options,
    dmp: &'a dyn DmpClient,
    /// Holdout evaluation memo: `holdout_layer_key -> hit` once resolved;
    /// `None` at the key while evaluation is in progress, guarding cycles.
    holdout_cache: HashMap<String, Option<ExperimentHit>>,
}

/// Resolve every layer reachable from the snapshot's domain tree (or, when
/// `options.layer_keys` is non-empty, just those layers) for one session.
pub async fn get_experiments(
    snapshot: &Snapshot,
    session: &Session,
    options: &mut Options,
    dmp: &dyn DmpClient,
) -> Result<HashMap<String, ExperimentHit>> {
    if let Some(err) = &session.build_error {
        return Err(err.clone());
    }

    resolve_overrides(snapshot, session, options);

    if options.prepare_dmp {
        abtree_tags::prefetch(dmp, session, &snapshot.dmp_catalog, options).await;
    }

    let mut ctx = Ctx { snapshot, session, options, dmp, holdout_cache: HashMap::new() };
    let mut result = HashMap::new();

    if !ctx.options.layer_keys.is_empty() {
        let keys = ctx.options.layer_keys.clone();
        for key in keys {
            if let Some(hit) = evaluate_layer_by_key(&mut ctx, &key).await? {
                result.insert(key, hit);
            }
        }
    } else {
        walk_domain(&mut ctx, &snapshot.root, &mut result).await?;
    }

    apply_override_pass(&mut ctx, &mut result);

    Ok(result)
}

/// Merge the snapshot's override list for this session into
/// `options.overrides`, giving `new_unit_id` entries precedence on conflict.
fn resolve_overrides(snapshot: &Snapshot, session: &Session, options: &mut Options) {
    if let Some(by_standard) = snapshot.override_list.get(&session.unit_id) {
        options.overrides.extend(by_standard.clone());
    }
    if !session.new_unit_id.is_empty() {
        if let Some(by_new) = snapshot.override_list.get(&session.new_unit_id) {
            options.overrides.extend(by_new.clone());
        }
    }
}

/// Direct layer-key lookup, gated by the layer's domain ancestry unless it's
/// already known to be reachable through an unconditional (full-flow) chain.
async fn evaluate_layer_by_key(ctx: &mut Ctx<'_>, key: &str) -> Result<Option<ExperimentHit>> {
    let Some(layer) = ctx.snapshot.layer(key).cloned() else {
        return Ok(None);
    };

    if ctx.snapshot.full_flow_layers.contains(key) {
        return evaluate_layer(ctx, &layer).await;
    }

    if let Some(ancestry) = ctx.snapshot.layer_ancestry.get(key).cloned() {
        let mut hits_all = true;
        if let Some(root_meta) = ancestry.first() {
            let unit = ctx.session.hash_decision_id(root_meta.hash.unit_id_type);
            let mut parent_b = bucket(root_meta.hash.method, root_meta.hash.seed, unit, root_meta.hash.bucket_size);
            for meta in ancestry.iter().skip(1) {
                // Each domain's traffic is tested against its *parent's*
                // bucket, not its own; the bucket carries forward one level
                // at a time down the ancestry chain.
                if !hit_traffic(parent_b, &meta.traffic) {
                    hits_all = false;
                    break;
                }
                let unit = ctx.session.hash_decision_id(meta.hash.unit_id_type);
                parent_b = bucket(meta.hash.method, meta.hash.seed, unit, meta.hash.bucket_size);
            }
        }
        if hits_all {
            return evaluate_layer(ctx, &layer).await;
        }
    }

    // Ancestry gating failed; the layer may still be reachable purely
    // through its own holdout chain catching the session.
    if let Some(holdout_hit) = check_holdout(ctx, &layer).await? {
        return Ok(Some(ExperimentHit { layer_key: key.to_string(), ..holdout_hit }));
    }

    Ok(None)
}

fn walk_domain<'a>(
    ctx: &'a mut Ctx<'_>,
    domain: &'a Domain,
    result: &'a mut HashMap<String, ExperimentHit>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let unit = ctx.session.hash_decision_id(domain.metadata.hash.unit_id_type);
        let b = bucket(domain.metadata.hash.method, domain.metadata.hash.seed, unit, domain.metadata.hash.bucket_size);

        for holdout in &domain.holdouts {
            if hit_traffic(b, &holdout.metadata.traffic) {
                evaluate_layer_group(ctx, &holdout.layer_keys, result).await?;
                return Ok(());
            }
        }

        for multi in &domain.multi_layers {
            if hit_traffic(b, &multi.metadata.traffic) {
                evaluate_layer_group(ctx, &multi.layer_keys, result).await?;
            }
        }

        for sub in &domain.subdomains {
            // A subdomain's traffic lives in its *parent's* bucket space; its
            // own hash params only govern its own children, tested on the
            // recursive call below.
            if hit_traffic(b, &sub.metadata.traffic) {
                walk_domain(ctx, sub, result).await?;
            }
        }

        Ok(())
    })
}

async fn evaluate_layer_group(
    ctx: &mut Ctx<'_>,
    layer_keys: &[String],
    result: &mut HashMap<String, ExperimentHit>,
) -> Result<()> {
    for key in layer_keys {
        let Some(layer) = ctx.snapshot.layer(key).cloned() else { continue };
        if let Some(hit) = evaluate_layer(ctx, &layer).await? {
            result.insert(key.clone(), hit);
        }
    }
    Ok(())
}

/// Full per-layer evaluation (4.5.2): override -> holdout -> hash dispatch
/// -> default fallback -> sentinel default.
async fn evaluate_layer(ctx: &mut Ctx<'_>, layer: &Layer) -> Result<Option<ExperimentHit>> {
    if let Some(&group_id) = ctx.options.overrides.get(&layer.key) {
        if let Some(group) = layer.groups.get(&group_id) {
            return Ok(Some(make_hit(layer, group, None, false, true)));
        }
    }

    if let Some(holdout_hit) = check_holdout(ctx, layer).await? {
        return Ok(Some(ExperimentHit { layer_key: layer.key.clone(), ..holdout_hit }));
    }

    let hit = match layer.hash_type {
        abtree_core::HashType::Single => evaluate_single_hash(ctx, layer).await?,
        abtree_core::HashType::Double => evaluate_double_hash(ctx, layer).await?,
    };

    if hit.is_some() {
        return Ok(hit);
    }

    if let Some(default) = layer.default_group() {
        return Ok(Some(make_hit(layer, default, None, true, false)));
    }
    if !layer.groups.is_empty() {
        return Ok(Some(ExperimentHit::sentinel_default(&layer.key)));
    }
    Ok(None)
}

/// Evaluate a layer's holdout chain. A holdout hit only "catches" the call
/// (takes over the layer's own assignment) when its winning group is a
/// non-default control group; otherwise evaluation falls through to the
/// layer's own groups.
async fn check_holdout(ctx: &mut Ctx<'_>, layer: &Layer) -> Result<Option<ExperimentHit>> {
    for key in layer.holdout_layer_keys.clone() {
        if let Some(cached) = ctx.holdout_cache.get(&key).cloned() {
            if let Some(hit) = cached {
                if !hit.is_default && hit.is_control {
                    return Ok(Some(hit));
                }
            }
            continue;
        }
        ctx.holdout_cache.insert(key.clone(), None);

        let Some(holdout_layer) = ctx.snapshot.layer(&key).cloned() else { continue };
        let hit = Box::pin(evaluate_layer(ctx, &holdout_layer)).await?;
        ctx.options.holdout_result.insert(key.clone(), hit.as_ref().map(|h| h.group_key.clone()));
        ctx.holdout_cache.insert(key.clone(), hit.clone());

        if let Some(h) = hit {
            if !h.is_default && h.is_control {
                return Ok(Some(h));
            }
        }
    }
    Ok(None)
}

async fn evaluate_single_hash(ctx: &mut Ctx<'_>, layer: &Layer) -> Result<Option<ExperimentHit>> {
    let unit = ctx.session.hash_decision_id(layer.hash.unit_id_type);
    let b = bucket(layer.hash.method, layer.hash.seed, unit, layer.hash.bucket_size);

    for group in layer.candidate_groups() {
        let hit_bucket = ctx.snapshot.group_buckets.get(&group.id).map(|info| info.hit(b)).unwrap_or(false);
        if !hit_bucket {
            continue;
        }
        match group.issue_type {
            IssueType::Percentage => return Ok(Some(make_hit(layer, group, None, false, false))),
            IssueType::Tag | IssueType::CityTag => {
                if matches(&group.tag_expression, ctx.session, ctx.options, group.unit_id_type, ctx.dmp).await {
                    return Ok(Some(make_hit(layer, group, None, false, false)));
                }
            }
        }
    }
    Ok(None)
}

async fn evaluate_double_hash(ctx: &mut Ctx<'_>, layer: &Layer) -> Result<Option<ExperimentHit>> {
    let unit = ctx.session.hash_decision_id(layer.hash.unit_id_type);
    let b = bucket(layer.hash.method, layer.hash.seed, unit, layer.hash.bucket_size);

    let experiment = layer
        .experiments
        .values()
        .find(|e| ctx.snapshot.experiment_buckets.get(&e.id).map(|info| info.hit(b)).unwrap_or(false))
        .cloned();
    let Some(experiment) = experiment else {
        return Ok(None);
    };
    if !ctx.options.passes_experiment_filter(&experiment.key) {
        return Ok(None);
    }

    let exp_unit = ctx.session.hash_decision_id(experiment.hash.unit_id_type);
    let exp_bucket = bucket(experiment.hash.method, experiment.hash.seed, exp_unit, experiment.hash.bucket_size);

    let candidates: Vec<Group> = experiment.group_ids.iter().filter_map(|id| layer.groups.get(id).cloned()).collect();

    let winning_group: Option<Group> = match experiment.issue_type {
        IssueType::Percentage => find_bucket_hit(ctx, &candidates, exp_bucket),
        IssueType::Tag => {
            let Some(first) = candidates.first() else { return Ok(None) };
            if !matches(&first.tag_expression, ctx.session, ctx.options, first.unit_id_type, ctx.dmp).await {
                return Ok(None);
            }
            find_bucket_hit(ctx, &candidates, exp_bucket)
        }
        IssueType::CityTag => {
            let mut winner = None;
            for group in &candidates {
                if matches(&group.tag_expression, ctx.session, ctx.options, group.unit_id_type, ctx.dmp).await {
                    let hit_bucket =
                        ctx.snapshot.group_buckets.get(&group.id).map(|info| info.hit(exp_bucket)).unwrap_or(false);
                    if hit_bucket {
                        winner = Some(group.clone());
                    }
                    break;
                }
            }
            winner
        }
    };

    Ok(winning_group.map(|g| make_hit(layer, &g, Some(experiment.key.clone()), false, false)))
}

fn find_bucket_hit(ctx: &Ctx<'_>, candidates: &[Group], bucket: u32) -> Option<Group> {
    candidates
        .iter()
        .find(|g| ctx.snapshot.group_buckets.get(&g.id).map(|info| info.hit(bucket)).unwrap_or(false))
        .cloned()
}

/// After the tree walk, insert an override for any layer not already
/// present, provided it exists and passes filters.
fn apply_override_pass(ctx: &mut Ctx<'_>, result: &mut HashMap<String, ExperimentHit>) {
    let overrides: FxHashMap<String, u64> = ctx.options.overrides.clone().into_iter().collect();
    for (layer_key, group_id) in overrides {
        if result.contains_key(&layer_key) {
            continue;
        }
        let Some(layer) = ctx.snapshot.layer(&layer_key) else { continue };
        if !ctx.options.passes_scene_filter(&layer.scene_ids) {
            continue;
        }
        if !ctx.options.layer_keys.is_empty() && !ctx.options.layer_keys.contains(&layer_key) {
            continue;
        }
        if let Some(group) = layer.groups.get(&group_id) {
            result.insert(layer_key.clone(), make_hit(layer, group, None, false, true));
        }
    }
}

fn make_hit(
    layer: &Layer,
    group: &Group,
    experiment_key: Option<String>,
    is_default: bool,
    is_override_list: bool,
) -> ExperimentHit {
    ExperimentHit {
        layer_key: layer.key.clone(),
        experiment_key,
        group_key: group.key.clone(),
        group_id: group.id,
        params: group.params.clone(),
        is_default,
        is_override_list,
        is_control: group.is_control,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abtree_core::{
        BucketInfo as CoreBucketInfo, DomainMetadata, HashMethod, HashParams, HashType, Range, TagExpression,
        UnitIdType,
    };
    use abtree_snapshot::Snapshot as SnapshotStruct;
    use abtree_tags::MockDmpClient;
    use rustc_hash::FxHashSet;
    use std::collections::HashMap as StdHashMap;

    fn hash_params(seed: u32, size: u32) -> HashParams {
        HashParams { method: HashMethod::Bkdr, seed, unit_id_type: UnitIdType::Standard, bucket_size: size }
    }

    fn group(id: u64, key: &str, is_default: bool, params: &[(&str, &str)]) -> Group {
        Group {
            id,
            key: key.to_string(),
            experiment_id: None,
            layer_key: "L".into(),
            is_default,
            is_control: false,
            is_override_list: true,
            params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            issue_type: IssueType::Percentage,
            tag_expression: TagExpression::default(),
            scene_ids: vec![],
            unit_id_type: UnitIdType::Standard,
        }
    }

    fn single_hash_layer(key: &str, groups: StdHashMap<u64, Group>, default_key: Option<&str>) -> Layer {
        Layer {
            key: key.to_string(),
            hash_type: HashType::Single,
            hash: hash_params(1, 100),
            default_group_key: default_key.map(|s| s.to_string()),
            scene_ids: vec![],
            holdout_layer_keys: vec![],
            experiments: StdHashMap::new(),
            groups,
        }
    }

    fn empty_snapshot() -> SnapshotStruct {
        SnapshotStruct {
            version: "v1".into(),
            root: Domain {
                metadata: DomainMetadata { key: "root".into(), hash: hash_params(1, 100), traffic: vec![] },
                holdouts: vec![],
                multi_layers: vec![],
                subdomains: vec![],
            },
            holdout_layers: rustc_hash::FxHashMap::default(),
            layers: rustc_hash::FxHashMap::default(),
            full_flow_layers: FxHashSet::default(),
            layer_ancestry: rustc_hash::FxHashMap::default(),
            experiment_buckets: rustc_hash::FxHashMap::default(),
            group_buckets: rustc_hash::FxHashMap::default(),
            dmp_catalog: rustc_hash::FxHashMap::default(),
            variant_to_layers: rustc_hash::FxHashMap::default(),
            remote_configs: rustc_hash::FxHashMap::default(),
            override_list: rustc_hash::FxHashMap::default(),
            config_override_list: rustc_hash::FxHashMap::default(),
            refresh_interval_secs: 3,
            control: abtree_core::MetricsControl::default(),
        }
    }

    #[tokio::test]
    async fn override_list_wins_regardless_of_traffic() {
        let mut groups = StdHashMap::new();
        groups.insert(1, group(1, "control", false, &[]));
        groups.insert(2, group(2, "variant", false, &[]));
        let layer = single_hash_layer("L", groups, None);

        let mut snap = empty_snapshot();
        snap.layers.insert("L".into(), layer);
        // No bucket info registered at all: normal evaluation would never hit.
        snap.override_list.insert("u1".into(), {
            let mut m = rustc_hash::FxHashMap::default();
            m.insert("L".to_string(), 2u64);
            m
        });

        let session = Session::new("u1");
        let mut options = Options { layer_keys: vec!["L".to_string()], ..Default::default() };
        let dmp = MockDmpClient::default();

        let result = get_experiments(&snap, &session, &mut options, &dmp).await.unwrap();
        let hit = result.get("L").unwrap();
        assert_eq!(hit.group_key, "variant");
        assert!(hit.is_override_list);
    }

    #[tokio::test]
    async fn default_group_fallback_when_nothing_hits() {
        let mut groups = StdHashMap::new();
        groups.insert(1, group(1, "default", true, &[]));
        groups.insert(2, group(2, "variant", false, &[]));
        let layer = single_hash_layer("L", groups, Some("default"));

        let mut snap = empty_snapshot();
        snap.layers.insert("L".into(), layer);
        snap.group_buckets.insert(2, CoreBucketInfo::Ranges(vec![Range::new(99999, 99999)]));

        let session = Session::new("u1");
        let mut options = Options { layer_keys: vec!["L".to_string()], ..Default::default() };
        let dmp = MockDmpClient::default();

        let result = get_experiments(&snap, &session, &mut options, &dmp).await.unwrap();
        let hit = result.get("L").unwrap();
        assert_eq!(hit.group_key, "default");
        assert!(hit.is_default);
    }

    #[tokio::test]
    async fn builder_error_short_circuits() {
        let snap = empty_snapshot();
        let session = Session::new("");
        let mut options = Options::default();
        let dmp = MockDmpClient::default();
        let result = get_experiments(&snap, &session, &mut options, &dmp).await;
        assert!(matches!(result, Err(Error::Builder(_))));
    }
}
