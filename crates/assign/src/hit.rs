//! The result type the assignment engine returns per layer.

use std::collections::HashMap;

/// Well-known group key synthesised when a layer declares groups but no
/// default, and none of them hit — callers still get something to report.
pub const SENTINEL_DEFAULT_GROUP_KEY: &str = "default-experiment";

/// One layer's assignment outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentHit {
    /// The layer this hit belongs to.
    pub layer_key: String,
    /// The experiment key, when the layer is double-hash and an experiment
    /// was found (`None` for single-hash layers and for the synthesised
    /// sentinel default).
    pub experiment_key: Option<String>,
    /// The winning group's key.
    pub group_key: String,
    /// The winning group's id.
    pub group_id: u64,
    /// The winning group's parameters.
    pub params: HashMap<String, String>,
    /// Set when no experiment/group actually matched and the layer's
    /// declared (or synthesised) default group was used instead.
    pub is_default: bool,
    /// Set when this hit came from the per-unit override list rather than
    /// traffic evaluation.
    pub is_override_list: bool,
    /// Set when the winning group is a holdout control group.
    pub is_control: bool,
}

impl ExperimentHit {
    /// Build a sentinel default hit for a layer that has groups but no
    /// declared default.
    pub fn sentinel_default(layer_key: &str) -> Self {
        ExperimentHit {
            layer_key: layer_key.to_string(),
            experiment_key: None,
            group_key: SENTINEL_DEFAULT_GROUP_KEY.to_string(),
            group_id: 0,
            params: HashMap::new(),
            is_default: true,
            is_override_list: false,
            is_control: false,
        }
    }
}
