//! The configuration data model: domains, layers, experiments, and groups.
//!
//! This mirrors the shape the control plane hands down. Everything here is
//! plain data; the evaluation logic lives in `abtree-assign`.

use crate::hash::{HashMethod, Range};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which identifier a node hashes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitIdType {
    /// Hash the caller's `unit_id` / `decision_id`.
    Standard,
    /// Hash the caller's `new_unit_id` / `new_decision_id`, falling back to
    /// the standard id when the new one is empty.
    NewId,
}

impl Default for UnitIdType {
    fn default() -> Self {
        UnitIdType::Standard
    }
}

impl UnitIdType {
    /// Stable label used to key the DMP catalog (`(label, platform) -> tags`).
    pub fn catalog_label(self) -> &'static str {
        match self {
            UnitIdType::Standard => "standard",
            UnitIdType::NewId => "new-id",
        }
    }

    /// Inverse of [`UnitIdType::catalog_label`]; unrecognised labels fall
    /// back to `Standard`.
    pub fn from_catalog_label(label: &str) -> Self {
        match label {
            "new-id" => UnitIdType::NewId,
            _ => UnitIdType::Standard,
        }
    }
}

/// How a layer picks a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashType {
    /// One hash picks a group directly among the layer's groups.
    Single,
    /// A first hash picks an experiment; a second hash (with the
    /// experiment's own seed) picks a group among its candidates.
    Double,
}

/// How a group or condition decides whether it has been "issued" to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueType {
    /// Bucket membership alone is sufficient.
    Percentage,
    /// Bucket membership plus a DNF tag match.
    Tag,
    /// Bucket membership plus a DNF tag match; on tag-match-but-bucket-miss
    /// no other candidate is tried.
    CityTag,
}

/// Common metadata shared by domains, layers, and experiments: the
/// parameters needed to compute a bucket for a given session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashParams {
    /// Hash method.
    pub method: HashMethod,
    /// Hash seed.
    pub seed: u32,
    /// Which identifier to hash.
    pub unit_id_type: UnitIdType,
    /// Bucket space size.
    pub bucket_size: u32,
}

/// A DNF (disjunction of conjunctions) tag expression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagExpression {
    /// Each inner vec is a conjunction (AND); the outer vec is an OR over
    /// conjunctions. An empty list matches by convention.
    pub conjunctions: Vec<Vec<TagPredicate>>,
}

/// A single predicate in a tag conjunction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagPredicate {
    /// Attribute/tag key.
    pub key: String,
    /// Predicate value type.
    pub value_type: TagValueType,
    /// Comparison operator.
    pub operator: TagOperator,
    /// Comparison operand(s).
    pub value: Vec<String>,
    /// Set when the tag must be resolved from the DMP service rather than
    /// the session's own attribute map.
    pub dmp_platform: Option<String>,
}

/// Type of a tag predicate's operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagValueType {
    /// String-typed comparison.
    String,
    /// Numeric comparison.
    Number,
}

/// Supported tag comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagOperator {
    /// Exact match against any of the predicate's values.
    Equals,
    /// Attribute value is contained within the predicate's values.
    In,
    /// Numeric greater-than.
    GreaterThan,
    /// Numeric less-than.
    LessThan,
}

/// A `range` or `bitmap` bucket assignment, wire-shaped (not yet decoded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BucketInfoWire {
    /// Inclusive ranges.
    Range(Vec<Range>),
    /// Raw roaring-bitmap transport bytes; decoded once at publish time.
    Bitmap(Vec<u8>),
}

/// Modification kind carried by an incremental bucket-delta entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifyType {
    /// Insert or replace.
    Update,
    /// Remove from the index entirely.
    Delete,
    /// Unrecognised; treated the same as delete.
    Unknown,
}

/// One parameter group within a layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Stable numeric id.
    pub id: u64,
    /// Human key.
    pub key: String,
    /// Owning experiment id (double-hash layers only).
    pub experiment_id: Option<u64>,
    /// Owning layer key.
    pub layer_key: String,
    /// Whether this is the layer's default/fallback group.
    pub is_default: bool,
    /// Whether this is a holdout control group.
    pub is_control: bool,
    /// Whether this group may be targeted via the override list.
    pub is_override_list: bool,
    /// Key/value parameters exposed to callers on a hit.
    pub params: HashMap<String, String>,
    /// Issue type plus its tag expression (ignored for `Percentage`).
    pub issue_type: IssueType,
    /// Tag expression gating this group (empty/ignored unless `issue_type`
    /// requires a tag match).
    pub tag_expression: TagExpression,
    /// Scenes this group applies to; empty means "all scenes".
    pub scene_ids: Vec<String>,
    /// Which id this group's tag/DMP lookups should use.
    pub unit_id_type: UnitIdType,
}

/// A double-hash layer's experiment: owns a set of candidate groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Stable numeric id.
    pub id: u64,
    /// Human key.
    pub key: String,
    /// Hash parameters used to pick a group within this experiment.
    pub hash: HashParams,
    /// How this experiment decides whether a bucketed unit is "in".
    pub issue_type: IssueType,
    /// Candidate group ids, in evaluation order.
    pub group_ids: Vec<u64>,
}

/// One traffic partition. Exactly one experiment (or default) applies per
/// unit within a layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    /// Stable key, unique across the whole snapshot.
    pub key: String,
    /// Single- or double-hash dispatch.
    pub hash_type: HashType,
    /// Hash parameters for the layer-level bucket.
    pub hash: HashParams,
    /// Key of this layer's default group, if declared.
    pub default_group_key: Option<String>,
    /// Scenes this layer applies to; empty means "all scenes".
    pub scene_ids: Vec<String>,
    /// Holdout layer keys that take precedence over this layer.
    pub holdout_layer_keys: Vec<String>,
    /// Experiments on this layer (double-hash only).
    pub experiments: HashMap<u64, Experiment>,
    /// Groups on this layer, keyed by id.
    pub groups: HashMap<u64, Group>,
}

impl Layer {
    /// Non-default groups in declaration order (stable by id for determinism).
    pub fn candidate_groups(&self) -> Vec<&Group> {
        let mut out: Vec<&Group> = self.groups.values().filter(|g| !g.is_default).collect();
        out.sort_by_key(|g| g.id);
        out
    }

    /// The layer's declared default group, if any.
    pub fn default_group(&self) -> Option<&Group> {
        self.default_group_key
            .as_ref()
            .and_then(|key| self.groups.values().find(|g| &g.key == key))
    }
}

/// Metadata common to every domain-tree node (used for ancestry hashing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainMetadata {
    /// Stable key.
    pub key: String,
    /// Hash parameters for this node's own bucket.
    pub hash: HashParams,
    /// Traffic ranges claimed by this node within its parent's bucket space.
    pub traffic: Vec<Range>,
}

/// A holdout domain: reserved traffic evaluated before its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldoutDomain {
    /// Node metadata.
    pub metadata: DomainMetadata,
    /// Layer keys contained directly in this holdout domain.
    pub layer_keys: Vec<String>,
}

/// A multi-layer domain: several layers evaluated concurrently, not
/// mutually exclusive with each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiLayerDomain {
    /// Node metadata.
    pub metadata: DomainMetadata,
    /// Layer keys contained directly in this domain.
    pub layer_keys: Vec<String>,
}

/// A recursive domain node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    /// Node metadata.
    pub metadata: DomainMetadata,
    /// Holdout children, checked first.
    pub holdouts: Vec<HoldoutDomain>,
    /// Multi-layer children, all evaluated when matched.
    pub multi_layers: Vec<MultiLayerDomain>,
    /// Sub-domain children, recursed into when matched.
    pub subdomains: Vec<Domain>,
}

/// One condition within a remote-config's ordered condition list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfigCondition {
    /// Hash parameters for this condition's own bucket test.
    pub hash: HashParams,
    /// Traffic ranges the computed bucket must fall within for this
    /// condition to be a candidate at all. A range with `left > right` never
    /// hits, which is how the control plane expresses "skip this condition".
    pub bucket: Vec<crate::hash::Range>,
    /// How this condition decides a hit.
    pub issue_type: IssueType,
    /// Tag expression (used when `issue_type` requires a tag match).
    pub tag_expression: TagExpression,
    /// Static value returned on a hit when no bound experiment supplies one.
    pub value: Vec<u8>,
    /// Optional experiment this condition delegates to on a hit.
    pub experiment_key: Option<String>,
}

/// Sampling knobs for one telemetry event stream: `1` (or `0`) samples
/// every record, `n > 1` samples roughly one record in `n`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventMetricsConfig {
    /// Sampling interval applied to successful calls/cycles.
    pub sampling_interval: u32,
    /// Sampling interval applied when the call/cycle errored.
    pub err_sampling_interval: u32,
}

impl Default for EventMetricsConfig {
    fn default() -> Self {
        EventMetricsConfig { sampling_interval: 1, err_sampling_interval: 1 }
    }
}

/// The telemetry-facing slice of a snapshot's control data: what to hand
/// each registered plugin at init, and how to sample each event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsControl {
    /// `plugin_name -> init_config`, handed to `MetricsPlugin::init` once per
    /// project registration.
    pub metrics_init: HashMap<String, String>,
    /// Per-event-name sampling overrides (e.g. `"checkout.exposure"`).
    pub event_metrics: HashMap<String, EventMetricsConfig>,
    /// Sampling applied to any event with no entry in `event_metrics`.
    pub default_metrics: EventMetricsConfig,
}

impl MetricsControl {
    /// The sampling config for `event_name`, falling back to the default.
    pub fn sampling_for(&self, event_name: &str) -> EventMetricsConfig {
        self.event_metrics.get(event_name).copied().unwrap_or(self.default_metrics)
    }
}

/// A remote-config / feature-flag entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Stable key.
    pub key: String,
    /// Holdout layer keys attached to this config.
    pub holdout_layer_keys: Vec<String>,
    /// Ordered condition list; first matching condition wins.
    pub conditions: Vec<RemoteConfigCondition>,
    /// Value returned when no condition, holdout, or override matches.
    pub default_value: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashMethod;

    fn hash_params() -> HashParams {
        HashParams { method: HashMethod::Bkdr, seed: 1, unit_id_type: UnitIdType::Standard, bucket_size: 100 }
    }

    #[test]
    fn layer_separates_default_from_candidates() {
        let mut groups = HashMap::new();
        groups.insert(
            1,
            Group {
                id: 1,
                key: "default".into(),
                experiment_id: None,
                layer_key: "L".into(),
                is_default: true,
                is_control: false,
                is_override_list: false,
                params: HashMap::new(),
                issue_type: IssueType::Percentage,
                tag_expression: TagExpression::default(),
                scene_ids: vec![],
                unit_id_type: UnitIdType::Standard,
            },
        );
        groups.insert(
            2,
            Group {
                id: 2,
                key: "variant".into(),
                experiment_id: None,
                layer_key: "L".into(),
                is_default: false,
                is_control: false,
                is_override_list: true,
                params: HashMap::new(),
                issue_type: IssueType::Percentage,
                tag_expression: TagExpression::default(),
                scene_ids: vec![],
                unit_id_type: UnitIdType::Standard,
            },
        );
        let layer = Layer {
            key: "L".into(),
            hash_type: HashType::Single,
            hash: hash_params(),
            default_group_key: Some("default".into()),
            scene_ids: vec![],
            holdout_layer_keys: vec![],
            experiments: HashMap::new(),
            groups,
        };
        assert_eq!(layer.candidate_groups().len(), 1);
        assert_eq!(layer.default_group().unwrap().key, "default");
    }
}
