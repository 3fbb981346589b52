//! # Configuration Manager
//!
//! Orders fragments by precedence, merges them with a strategy, validates the
//! result against the declared schema and caches it per (tenant, plugin set).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::cache::{CacheLookup, ConfigCacheKey, MergeCache};
use super::error::ConfigMergeResult;
use super::fragment::{precedence_order, ConfigFragment};
use super::schema::ConfigSchema;
use super::strategy::{apply_strategy, MergeStrategy};
use super::value::ConfigValue;

/// The merged configuration for one (tenant, plugin set) pair
///
/// Deterministic for a given fragment set: no timestamps, ordered maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedConfig {
    pub value: ConfigValue,
    pub strategy: MergeStrategy,
    /// Fragment names in the precedence order they were applied
    pub fragments: Vec<String>,
}

impl MergedConfig {
    pub fn get(&self, path: &str) -> Option<&ConfigValue> {
        self.value.get_path(path)
    }

    /// JSON rendering with secret-like values masked, for logs
    pub fn sanitized_dump(&self) -> String {
        serde_json::to_string_pretty(&self.value.sanitized().to_json()).unwrap_or_default()
    }
}

/// Merge fragments and validate the result
pub fn merge_fragments(
    fragments: Vec<ConfigFragment>,
    strategy: MergeStrategy,
    schema: Option<&ConfigSchema>,
) -> ConfigMergeResult<MergedConfig> {
    let ordered = precedence_order(fragments);
    let value = apply_strategy(strategy, &ordered);

    if let Some(schema) = schema {
        schema.validate(&value).inspect_err(|error| {
            warn!(strategy = %strategy, error = %error, "merged configuration rejected");
        })?;
    }

    Ok(MergedConfig {
        value,
        strategy,
        fragments: ordered.into_iter().map(|fragment| fragment.name).collect(),
    })
}

#[derive(Debug)]
pub struct ConfigurationManager {
    default_strategy: MergeStrategy,
    schema: Option<ConfigSchema>,
    cache: MergeCache,
}

impl ConfigurationManager {
    pub fn new(default_strategy: MergeStrategy, schema: Option<ConfigSchema>, ttl: Duration) -> Self {
        Self {
            default_strategy,
            schema,
            cache: MergeCache::new(ttl),
        }
    }

    pub fn default_strategy(&self) -> MergeStrategy {
        self.default_strategy
    }

    pub fn schema(&self) -> Option<&ConfigSchema> {
        self.schema.as_ref()
    }

    pub fn cache(&self) -> &MergeCache {
        &self.cache
    }

    /// Uncached merge
    pub fn merge(
        &self,
        fragments: Vec<ConfigFragment>,
        strategy: MergeStrategy,
    ) -> ConfigMergeResult<MergedConfig> {
        merge_fragments(fragments, strategy, self.schema.as_ref())
    }

    /// Merge through the cache; concurrent callers for one key share a computation
    pub async fn merge_cached(
        &self,
        key: &ConfigCacheKey,
        fragments: Vec<ConfigFragment>,
        strategy: MergeStrategy,
    ) -> ConfigMergeResult<CacheLookup> {
        let schema = self.schema.clone();
        let lookup = self
            .cache
            .get_or_compute(key, move || async move {
                merge_fragments(fragments, strategy, schema.as_ref())
            })
            .await?;
        debug!(
            key = %key,
            fingerprint = %key.fingerprint(),
            outcome = %lookup.outcome,
            "configuration merge resolved"
        );
        Ok(lookup)
    }

    /// Recompute a key bypassing the cache; stored only if it validates
    pub async fn refresh(
        &self,
        key: &ConfigCacheKey,
        fragments: Vec<ConfigFragment>,
        strategy: MergeStrategy,
    ) -> ConfigMergeResult<CacheLookup> {
        let schema = self.schema.as_ref();
        let config = self
            .cache
            .refresh(key, async move { merge_fragments(fragments, strategy, schema) })
            .await?;
        Ok(CacheLookup {
            config,
            outcome: super::cache::CacheOutcome::Refreshed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BusinessContext;
    use crate::merge::cache::CacheOutcome;
    use crate::merge::error::ConfigMergeError;
    use crate::merge::schema::SchemaKind;
    use serde_json::json;

    fn fragments() -> Vec<ConfigFragment> {
        vec![
            ConfigFragment::plugin("reports", ConfigValue::from(json!({"menu": ["reports"]})))
                .with_append_key("menu"),
            ConfigFragment::base("base", ConfigValue::from(json!({"menu": ["home"], "site": {"name": "Platform"}}))),
            ConfigFragment::tenant("latinos", ConfigValue::from(json!({"site": {"name": "Latinos"}}))),
        ]
    }

    #[test]
    fn test_merge_orders_by_tier() {
        let merged = merge_fragments(fragments(), MergeStrategy::Deep, None).unwrap();
        assert_eq!(merged.fragments, ["base", "latinos", "reports"]);
        assert_eq!(merged.get("site.name"), Some(&ConfigValue::from("Latinos")));
        assert_eq!(
            merged.get("menu"),
            Some(&ConfigValue::from(vec!["home", "reports"]))
        );
    }

    #[test]
    fn test_merge_is_deterministic() {
        for strategy in [MergeStrategy::Deep, MergeStrategy::Shallow, MergeStrategy::Replace] {
            let first = merge_fragments(fragments(), strategy, None).unwrap();
            let second = merge_fragments(fragments(), strategy, None).unwrap();
            assert_eq!(
                serde_json::to_vec(&first).unwrap(),
                serde_json::to_vec(&second).unwrap()
            );
        }
    }

    #[test]
    fn test_schema_violation_rejects_merge() {
        let schema = ConfigSchema::of(SchemaKind::Object).property(
            "site",
            ConfigSchema::of(SchemaKind::Object).property("name", ConfigSchema::of(SchemaKind::Integer)),
        );
        let error = merge_fragments(fragments(), MergeStrategy::Deep, Some(&schema)).unwrap_err();
        assert!(matches!(error, ConfigMergeError::Validation { ref path, .. } if path == "site.name"));
    }

    #[test]
    fn test_sanitized_dump_masks_secrets() {
        let merged = merge_fragments(
            vec![ConfigFragment::base(
                "base",
                ConfigValue::from(json!({"smtp": {"password": "hunter2"}})),
            )],
            MergeStrategy::Deep,
            None,
        )
        .unwrap();
        let dump = merged.sanitized_dump();
        assert!(!dump.contains("hunter2"));
        assert!(dump.contains("REDACTED"));
    }

    #[tokio::test]
    async fn test_cached_merge_and_refresh() {
        let manager = ConfigurationManager::new(MergeStrategy::Deep, None, Duration::from_secs(60));
        let key = ConfigCacheKey::new(BusinessContext::tenant("latinos"), ["reports"]);

        let first = manager
            .merge_cached(&key, fragments(), MergeStrategy::Deep)
            .await
            .unwrap();
        assert_eq!(first.outcome, CacheOutcome::Miss);

        let hit = manager
            .merge_cached(&key, fragments(), MergeStrategy::Deep)
            .await
            .unwrap();
        assert_eq!(hit.outcome, CacheOutcome::Hit);

        let refreshed = manager
            .refresh(&key, fragments(), MergeStrategy::Shallow)
            .await
            .unwrap();
        assert_eq!(refreshed.config.strategy, MergeStrategy::Shallow);

        let after = manager
            .merge_cached(&key, fragments(), MergeStrategy::Deep)
            .await
            .unwrap();
        assert!(std::sync::Arc::ptr_eq(&after.config, &refreshed.config));
    }
}
