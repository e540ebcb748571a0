//! Builds a [`Snapshot`](crate::snapshot::Snapshot) from raw control-plane
//! payloads: the domain tree, the flat layer catalog, and incremental
//! bucket deltas.

use crate::snapshot::Snapshot;
use abtree_core::{
    BucketInfo, Domain, DomainMetadata, Layer, MetricsControl, ModifyType, RemoteConfig, TagPredicate,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// One incremental bucket-delta entry as delivered by
/// `BatchGetExperimentBucket` / `BatchGetGroupBucket`.
#[derive(Debug, Clone)]
pub struct BucketDelta {
    /// Target experiment or group id.
    pub id: u64,
    /// Whether this is an upsert or a removal.
    pub modify_type: ModifyType,
    /// `Some` for an upsert; `None` for delete/unknown.
    pub ranges: Option<Vec<abtree_core::Range>>,
    /// Raw bitmap transport bytes, alternative to `ranges` for an upsert.
    pub bitmap: Option<Vec<u8>>,
}

/// Build the static (non-bucket) part of a snapshot from the domain tree and
/// flat layer catalog. Bucket indices start empty; call
/// [`apply_experiment_deltas`]/[`apply_group_deltas`] afterwards.
pub fn build(
    root: Domain,
    layer_catalog: &FxHashMap<String, Layer>,
    remote_configs: FxHashMap<String, RemoteConfig>,
    override_list: FxHashMap<String, FxHashMap<String, u64>>,
    config_override_list: FxHashMap<String, FxHashMap<String, Vec<u8>>>,
    refresh_interval_secs: u64,
    control: MetricsControl,
) -> Snapshot {
    let mut layers = FxHashMap::default();
    let mut full_flow_layers = FxHashSet::default();
    let mut layer_ancestry = FxHashMap::default();

    walk(&root, &[], true, layer_catalog, &mut layers, &mut full_flow_layers, &mut layer_ancestry);

    let mut holdout_keys: FxHashSet<String> = FxHashSet::default();
    for layer in layers.values() {
        for key in &layer.holdout_layer_keys {
            holdout_keys.insert(key.clone());
        }
    }
    collect_holdout_domain_keys(&root, &mut holdout_keys);

    let holdout_layers: FxHashMap<String, Layer> = holdout_keys
        .into_iter()
        .filter_map(|key| layer_catalog.get(&key).map(|l| (key, l.clone())))
        .collect();
    for (key, layer) in &holdout_layers {
        layers.entry(key.clone()).or_insert_with(|| layer.clone());
    }

    let dmp_catalog = build_dmp_catalog(layer_catalog);
    let variant_to_layers = build_variant_index(layer_catalog);

    Snapshot {
        version: String::new(),
        root,
        holdout_layers,
        layers,
        full_flow_layers,
        layer_ancestry,
        experiment_buckets: FxHashMap::default(),
        group_buckets: FxHashMap::default(),
        dmp_catalog,
        variant_to_layers,
        remote_configs,
        override_list,
        config_override_list,
        refresh_interval_secs,
        control,
    }
}

/// Recursively walk the domain tree, populating the layer index, the
/// full-flow set, and the per-layer ancestry list.
///
/// Every node in the chain (holdout domains and multi-layer domains alike)
/// gets the *same* accumulated ancestry list appended with its own metadata,
/// mirroring the control plane's own recursive index build.
fn walk(
    domain: &Domain,
    ancestry_so_far: &[DomainMetadata],
    chain_full_flow: bool,
    catalog: &FxHashMap<String, Layer>,
    layers: &mut FxHashMap<String, Layer>,
    full_flow_layers: &mut FxHashSet<String>,
    layer_ancestry: &mut FxHashMap<String, Vec<DomainMetadata>>,
) {
    let mut ancestry = ancestry_so_far.to_vec();
    ancestry.push(domain.metadata.clone());

    for holdout in &domain.holdouts {
        let full_flow = chain_full_flow
            && abtree_core::is_full_flow(&holdout.metadata.traffic, holdout.metadata.hash.bucket_size);
        register_layers(&holdout.layer_keys, &ancestry, full_flow, catalog, layers, full_flow_layers, layer_ancestry);
    }
    for multi in &domain.multi_layers {
        let full_flow = chain_full_flow
            && abtree_core::is_full_flow(&multi.metadata.traffic, multi.metadata.hash.bucket_size);
        register_layers(&multi.layer_keys, &ancestry, full_flow, catalog, layers, full_flow_layers, layer_ancestry);
    }
    for sub in &domain.subdomains {
        let full_flow = chain_full_flow
            && abtree_core::is_full_flow(&sub.metadata.traffic, sub.metadata.hash.bucket_size);
        walk(sub, &ancestry, full_flow, catalog, layers, full_flow_layers, layer_ancestry);
    }
}

fn register_layers(
    keys: &[String],
    ancestry: &[DomainMetadata],
    full_flow: bool,
    catalog: &FxHashMap<String, Layer>,
    layers: &mut FxHashMap<String, Layer>,
    full_flow_layers: &mut FxHashSet<String>,
    layer_ancestry: &mut FxHashMap<String, Vec<DomainMetadata>>,
) {
    for key in keys {
        if let Some(layer) = catalog.get(key) {
            layers.insert(key.clone(), layer.clone());
        }
        layer_ancestry.insert(key.clone(), ancestry.to_vec());
        if full_flow {
            full_flow_layers.insert(key.clone());
        }
    }
}

fn collect_holdout_domain_keys(domain: &Domain, out: &mut FxHashSet<String>) {
    for holdout in &domain.holdouts {
        for key in &holdout.layer_keys {
            out.insert(key.clone());
        }
    }
    for sub in &domain.subdomains {
        collect_holdout_domain_keys(sub, out);
    }
}

fn build_dmp_catalog(catalog: &FxHashMap<String, Layer>) -> FxHashMap<(String, String), Vec<String>> {
    let mut out: FxHashMap<(String, String), FxHashSet<String>> = FxHashMap::default();
    let mut note = |id_type: abtree_core::UnitIdType, predicates: &[TagPredicate]| {
        for p in predicates {
            if let Some(platform) = &p.dmp_platform {
                out.entry((id_type.catalog_label().to_string(), platform.clone()))
                    .or_default()
                    .insert(p.key.clone());
            }
        }
    };
    for layer in catalog.values() {
        for group in layer.groups.values() {
            for conjunction in &group.tag_expression.conjunctions {
                note(group.unit_id_type, conjunction);
            }
        }
    }
    out.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect()
}

fn build_variant_index(catalog: &FxHashMap<String, Layer>) -> FxHashMap<String, Vec<String>> {
    let mut out: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for layer in catalog.values() {
        if let Some(default) = layer.default_group() {
            for key in default.params.keys() {
                out.entry(key.clone()).or_default().push(layer.key.clone());
            }
        }
    }
    out
}

/// Apply an incremental experiment-bucket delta batch onto a snapshot's
/// bucket index. Bitmap entries are decoded exactly once, here.
pub fn apply_experiment_deltas(snapshot: &mut Snapshot, deltas: Vec<BucketDelta>) -> Result<(), String> {
    apply_deltas(&mut snapshot.experiment_buckets, deltas)
}

/// Apply an incremental group-bucket delta batch onto a snapshot's bucket
/// index. Bitmap entries are decoded exactly once, here.
pub fn apply_group_deltas(snapshot: &mut Snapshot, deltas: Vec<BucketDelta>) -> Result<(), String> {
    apply_deltas(&mut snapshot.group_buckets, deltas)
}

fn apply_deltas(index: &mut FxHashMap<u64, BucketInfo>, deltas: Vec<BucketDelta>) -> Result<(), String> {
    for delta in deltas {
        match delta.modify_type {
            ModifyType::Delete | ModifyType::Unknown => {
                index.remove(&delta.id);
            }
            ModifyType::Update => {
                if let Some(bytes) = delta.bitmap {
                    index.insert(delta.id, BucketInfo::from_bitmap_bytes(&bytes)?);
                } else if let Some(ranges) = delta.ranges {
                    index.insert(delta.id, BucketInfo::Ranges(ranges));
                }
            }
        }
    }
    Ok(())
}
