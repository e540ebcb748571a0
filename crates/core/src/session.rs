//! Session and per-call Options (component C9).

use crate::error::Error;
use std::collections::HashMap;

/// One caller-built request context. Constructed via
/// [`SessionBuilder`](crate::session::SessionBuilder) (in `abtree-api`) or
/// directly via [`Session::new`]; lives for the duration of a single call.
#[derive(Debug, Clone)]
pub struct Session {
    /// Primary reporting id and default hash source.
    pub unit_id: String,
    /// Hash source; defaults to `unit_id`.
    pub decision_id: String,
    /// Migration alias unit id.
    pub new_unit_id: String,
    /// Migration alias decision id.
    pub new_decision_id: String,
    /// Attribute tag map; additive across setters.
    pub attributes: HashMap<String, Vec<String>>,
    /// Free-form expansion key/values carried into exposure records.
    pub expansion: HashMap<String, String>,
    /// Set when construction failed; every operation against this session
    /// short-circuits with this error.
    pub build_error: Option<Error>,
    /// Whether `new_unit_id` was ever set explicitly, as opposed to
    /// defaulting to `unit_id`. Drives whether `new_decision_id` keeps
    /// cascading off `decision_id`.
    new_unit_id_set: bool,
    /// Whether `new_decision_id` was ever set explicitly; once true it no
    /// longer cascades off either `decision_id` or `new_unit_id`.
    new_decision_id_set: bool,
}

impl Session {
    /// Build a session, normalising id fallbacks per the id-selection rules:
    /// `decision_id` defaults to `unit_id`; an unset `new_unit_id` defaults
    /// both new ids to the standard ones; a set `new_unit_id` with an unset
    /// `new_decision_id` defaults the latter to the former.
    pub fn new(unit_id: impl Into<String>) -> Self {
        let unit_id = unit_id.into();
        let build_error = if unit_id.is_empty() {
            Some(Error::Builder("unit_id must not be empty".into()))
        } else {
            None
        };
        Session {
            decision_id: unit_id.clone(),
            new_unit_id: unit_id.clone(),
            new_decision_id: unit_id.clone(),
            unit_id,
            attributes: HashMap::new(),
            expansion: HashMap::new(),
            build_error,
            new_unit_id_set: false,
            new_decision_id_set: false,
        }
    }

    /// Override the decision id (hash source). As long as neither `new_*` id
    /// has been set explicitly, `new_decision_id` cascades along with it.
    pub fn with_decision_id(mut self, decision_id: impl Into<String>) -> Self {
        self.decision_id = decision_id.into();
        if !self.new_unit_id_set && !self.new_decision_id_set {
            self.new_decision_id = self.decision_id.clone();
        }
        self
    }

    /// Set the migration alias unit id, defaulting its decision counterpart
    /// to the same value unless overridden afterwards.
    pub fn with_new_unit_id(mut self, new_unit_id: impl Into<String>) -> Self {
        let new_unit_id = new_unit_id.into();
        self.new_unit_id_set = true;
        if !self.new_decision_id_set {
            self.new_decision_id = new_unit_id.clone();
        }
        self.new_unit_id = new_unit_id;
        self
    }

    /// Override the migration alias decision id independently. Freezes it
    /// against further cascading from `with_decision_id`/`with_new_unit_id`.
    pub fn with_new_decision_id(mut self, new_decision_id: impl Into<String>) -> Self {
        self.new_decision_id = new_decision_id.into();
        self.new_decision_id_set = true;
        self
    }

    /// Merge an attribute map into the session. The first call replaces
    /// nothing (map starts empty); subsequent calls merge keys, replacing
    /// values for duplicate keys.
    pub fn with_attributes(mut self, attrs: HashMap<String, Vec<String>>) -> Self {
        for (k, v) in attrs {
            self.attributes.insert(k, v);
        }
        self
    }

    /// Append a single key/value pair to the existing attribute list.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Resolve which unit id to hash/lookup with, given a node's declared
    /// [`crate::types::UnitIdType`].
    pub fn hash_unit_id(&self, id_type: crate::types::UnitIdType) -> &str {
        match id_type {
            crate::types::UnitIdType::Standard => &self.unit_id,
            crate::types::UnitIdType::NewId => {
                if self.new_unit_id.is_empty() {
                    &self.unit_id
                } else {
                    &self.new_unit_id
                }
            }
        }
    }

    /// Resolve which decision id to hash with, given a node's declared
    /// [`crate::types::UnitIdType`].
    pub fn hash_decision_id(&self, id_type: crate::types::UnitIdType) -> &str {
        match id_type {
            crate::types::UnitIdType::Standard => &self.decision_id,
            crate::types::UnitIdType::NewId => {
                if self.new_decision_id.is_empty() {
                    &self.decision_id
                } else {
                    &self.new_decision_id
                }
            }
        }
    }
}

/// Per-call derived option bag, threaded through the assignment engine and
/// the remote-config evaluator.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Restrict evaluation to these scenes; empty means "all scenes".
    pub scene_ids: Vec<String>,
    /// Restrict evaluation to these layer keys; empty means "the whole tree".
    pub layer_keys: Vec<String>,
    /// Restrict evaluation to these experiment keys; empty means "no filter".
    pub experiment_keys: Vec<String>,
    /// Whether a hit should also enqueue an automatic exposure record.
    pub auto_exposure: bool,
    /// Disable all DMP lookups; DMP-origin predicates degrade to `false`.
    pub disable_dmp: bool,
    /// Whether to batch-prefetch DMP tags before evaluation.
    pub prepare_dmp: bool,
    /// Resolved override-list entries for this call: `layer_key -> group_id`.
    pub overrides: HashMap<String, u64>,
    /// Per-call DMP cache, keyed `"{unit_id}-{platform}-{tag_key}"`.
    pub dmp_cache: HashMap<String, String>,
    /// Holdout memoisation: `holdout_layer_key -> Some(experiment_key)` once
    /// evaluated, or `None` recorded explicitly to mark "evaluated, clean".
    pub holdout_result: HashMap<String, Option<String>>,
}

impl Options {
    /// Whether `key` passes the experiment-key filter (empty filter passes
    /// everything).
    pub fn passes_experiment_filter(&self, key: &str) -> bool {
        self.experiment_keys.is_empty() || self.experiment_keys.iter().any(|k| k == key)
    }

    /// Whether `scene_ids` intersects the caller's scene filter (empty
    /// filter, or an entry declaring no scenes, both pass everything).
    pub fn passes_scene_filter(&self, scene_ids: &[String]) -> bool {
        if self.scene_ids.is_empty() || scene_ids.is_empty() {
            return true;
        }
        scene_ids.iter().any(|s| self.scene_ids.contains(s))
    }

    /// Produce a scoped copy of these options with the experiment-key filter
    /// narrowed to exactly `key`. Used by the remote-config evaluator when
    /// delegating a condition hit to the assignment engine, so the filter
    /// never leaks back into the caller's own options or into later
    /// conditions in the same evaluation.
    pub fn scoped_to_experiment(&self, key: &str) -> Options {
        let mut scoped = self.clone();
        scoped.experiment_keys = vec![key.to_string()];
        scoped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_unit_id_is_a_build_error() {
        let session = Session::new("");
        assert!(session.build_error.is_some());
    }

    #[test]
    fn id_fallbacks_cascade_correctly() {
        let s = Session::new("u1");
        assert_eq!(s.decision_id, "u1");
        assert_eq!(s.new_unit_id, "u1");
        assert_eq!(s.new_decision_id, "u1");

        let s = Session::new("u1").with_new_unit_id("nu1");
        assert_eq!(s.new_unit_id, "nu1");
        assert_eq!(s.new_decision_id, "nu1");

        let s = Session::new("u1").with_new_unit_id("nu1").with_new_decision_id("nd1");
        assert_eq!(s.new_decision_id, "nd1");
    }

    #[test]
    fn decision_id_override_cascades_to_unset_new_decision_id() {
        let s = Session::new("u1").with_decision_id("d1");
        assert_eq!(s.new_decision_id, "d1");

        // Once new_unit_id is set explicitly, a later decision_id override no
        // longer drags new_decision_id along with it.
        let s = Session::new("u1").with_new_unit_id("nu1").with_decision_id("d1");
        assert_eq!(s.new_decision_id, "nu1");

        // An explicit new_decision_id is frozen against both cascades.
        let s = Session::new("u1").with_new_decision_id("nd1").with_decision_id("d1");
        assert_eq!(s.new_decision_id, "nd1");
    }

    #[test]
    fn attribute_merge_replaces_duplicate_keys() {
        let mut first = HashMap::new();
        first.insert("k".to_string(), vec!["a".to_string()]);
        let s = Session::new("u1").with_attributes(first);

        let mut second = HashMap::new();
        second.insert("k".to_string(), vec!["b".to_string()]);
        let s = s.with_attributes(second);
        assert_eq!(s.attributes.get("k").unwrap(), &vec!["b".to_string()]);
    }

    #[test]
    fn empty_experiment_filter_passes_everything() {
        let opts = Options::default();
        assert!(opts.passes_experiment_filter("anything"));
    }

    #[test]
    fn scoped_options_does_not_mutate_original() {
        let opts = Options::default();
        let scoped = opts.scoped_to_experiment("exp-a");
        assert!(opts.experiment_keys.is_empty());
        assert_eq!(scoped.experiment_keys, vec!["exp-a".to_string()]);
    }
}
