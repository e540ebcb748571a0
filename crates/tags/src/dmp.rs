//! DMP (demographic/tag platform) prefetch and cache (component C8).

use abtree_core::{Options, Session, UnitIdType};
use async_trait::async_trait;
use std::collections::HashMap;

/// Transport boundary to the DMP service. A real implementation signs and
/// sends an HTTP batch request; tests and the demo CLI use
/// [`MockDmpClient`].
#[async_trait]
pub trait DmpClient: Send + Sync {
    /// Batch-fetch tag values for `(unit_id_type, platform, tag_keys)`.
    /// Returns only the tags that resolved; missing entries mean "no value".
    async fn batch_get_tag_value(
        &self,
        unit_id: &str,
        platform: &str,
        tag_keys: &[String],
    ) -> Result<HashMap<String, String>, String>;
}

/// Cache key format: `"{unit_id}-{platform}-{tag_key}"`, matching the
/// control plane's own convention so telemetry rows stay comparable.
pub fn cache_key(unit_id: &str, platform: &str, tag_key: &str) -> String {
    format!("{unit_id}-{platform}-{tag_key}")
}

/// Batch-prefetch every `(unit_id_type, platform)` pair the catalog marks
/// eligible (at least two tags recorded under that pair) and populate
/// `options.dmp_cache`. No-op when `disable_dmp` is set or `prepare_dmp`
/// wasn't requested. Each catalog entry's unit id is resolved the same
/// NEW_ID-vs-standard way [`get_tag_value`] resolves it, so a later cache
/// lookup for a `NewId`-scoped predicate actually hits.
pub async fn prefetch(
    client: &dyn DmpClient,
    session: &Session,
    catalog: &HashMap<(String, String), Vec<String>>,
    options: &mut Options,
) {
    if options.disable_dmp || !options.prepare_dmp {
        return;
    }
    for ((unit_id_type_label, platform), tags) in catalog {
        if tags.len() < 2 {
            continue;
        }
        let id_type = UnitIdType::from_catalog_label(unit_id_type_label);
        let unit_id = session.hash_unit_id(id_type);
        match client.batch_get_tag_value(unit_id, platform, tags).await {
            Ok(values) => {
                for (tag, value) in values {
                    options.dmp_cache.insert(cache_key(unit_id, platform, &tag), value);
                }
            }
            Err(e) => {
                tracing::warn!(platform, error = %e, "dmp prefetch failed, degrading to miss");
            }
        }
    }
}

/// Resolve a single tag value, consulting the per-call cache first and
/// falling back to a single-tag lookup on miss. Any transport failure
/// degrades to `None` (caller treats the owning predicate as `false`).
pub async fn get_tag_value(
    client: &dyn DmpClient,
    unit_id: &str,
    platform: &str,
    tag_key: &str,
    options: &mut Options,
) -> Option<String> {
    let key = cache_key(unit_id, platform, tag_key);
    if let Some(v) = options.dmp_cache.get(&key) {
        return Some(v.clone());
    }
    match client
        .batch_get_tag_value(unit_id, platform, std::slice::from_ref(&tag_key.to_string()))
        .await
    {
        Ok(mut values) => {
            let value = values.remove(tag_key);
            if let Some(v) = &value {
                options.dmp_cache.insert(key, v.clone());
            }
            value
        }
        Err(e) => {
            tracing::warn!(platform, tag_key, error = %e, "dmp lookup failed");
            None
        }
    }
}

/// In-memory `DmpClient` used by tests and the demo CLI.
#[derive(Debug, Default, Clone)]
pub struct MockDmpClient {
    /// `(platform, tag_key) -> value` returned for every unit id.
    pub values: HashMap<(String, String), String>,
}

impl MockDmpClient {
    /// Seed the mock with a value returned regardless of unit id.
    pub fn with_value(mut self, platform: impl Into<String>, tag_key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert((platform.into(), tag_key.into()), value.into());
        self
    }
}

#[async_trait]
impl DmpClient for MockDmpClient {
    async fn batch_get_tag_value(
        &self,
        _unit_id: &str,
        platform: &str,
        tag_keys: &[String],
    ) -> Result<HashMap<String, String>, String> {
        let mut out = HashMap::new();
        for key in tag_keys {
            if let Some(v) = self.values.get(&(platform.to_string(), key.clone())) {
                out.insert(key.clone(), v.clone());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefetch_skips_when_disabled() {
        let client = MockDmpClient::default().with_value("p", "t", "v");
        let mut options = Options { disable_dmp: true, prepare_dmp: true, ..Default::default() };
        let mut catalog = HashMap::new();
        catalog.insert(("standard".to_string(), "p".to_string()), vec!["t".to_string(), "t2".to_string()]);
        let session = Session::new("u1");
        prefetch(&client, &session, &catalog, &mut options).await;
        assert!(options.dmp_cache.is_empty());
    }

    #[tokio::test]
    async fn prefetch_requires_at_least_two_tags() {
        let client = MockDmpClient::default().with_value("p", "t", "v");
        let mut options = Options { disable_dmp: false, prepare_dmp: true, ..Default::default() };
        let mut catalog = HashMap::new();
        catalog.insert(("standard".to_string(), "p".to_string()), vec!["t".to_string()]);
        let session = Session::new("u1");
        prefetch(&client, &session, &catalog, &mut options).await;
        assert!(options.dmp_cache.is_empty());
    }

    #[tokio::test]
    async fn prefetch_resolves_new_id_scoped_entries_against_new_unit_id() {
        let client = MockDmpClient::default().with_value("p", "t", "v1").with_value("p", "t2", "v2");
        let mut options = Options { disable_dmp: false, prepare_dmp: true, ..Default::default() };
        let mut catalog = HashMap::new();
        catalog.insert(("new-id".to_string(), "p".to_string()), vec!["t".to_string(), "t2".to_string()]);
        let session = Session::new("u1").with_new_unit_id("nu1");
        prefetch(&client, &session, &catalog, &mut options).await;
        assert_eq!(options.dmp_cache.get(&cache_key("nu1", "p", "t")).unwrap(), "v1");
        assert!(options.dmp_cache.get(&cache_key("u1", "p", "t")).is_none());
    }

    #[tokio::test]
    async fn get_tag_value_falls_back_to_single_lookup_on_cache_miss() {
        let client = MockDmpClient::default().with_value("p", "t", "v");
        let mut options = Options::default();
        let value = get_tag_value(&client, "u1", "p", "t", &mut options).await;
        assert_eq!(value.as_deref(), Some("v"));
        assert_eq!(options.dmp_cache.get(&cache_key("u1", "p", "t")).unwrap(), "v");
    }
}
