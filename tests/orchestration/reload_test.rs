//! Reload publishes atomically or not at all

use std::sync::Arc;
use tenancy_core::context::RuntimeSignals;
use tenancy_core::merge::{CacheOutcome, ConfigValue};
use tenancy_core::{ErrorKind, OrchestrationState, Orchestrator};

use crate::common::TestPlatform;

const COMMUNITY_V2: &str = r#"
id: community
version: "1.0.0"
depends_on: [auth]
capabilities: [collections, fields]
append_keys: [navigation]
config:
  navigation: [foro, eventos]
"#;

const AUTH_V2: &str = r#"
id: auth
version: "9.9.9"
capabilities: [access_control, hooks]
config:
  auth:
    provider: sso
"#;

fn latinos() -> RuntimeSignals {
    RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "latinos")
}

fn navigation(config: &ConfigValue) -> Vec<String> {
    config
        .get_path("navigation")
        .and_then(ConfigValue::as_sequence)
        .unwrap_or_default()
        .iter()
        .filter_map(ConfigValue::as_str)
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_reload_picks_up_manifest_changes() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let first = orchestrator.initialize(&latinos()).await.unwrap();
    let first_generation = orchestrator.registry().snapshot().generation();

    platform.write_manifest("community", COMMUNITY_V2);
    let second = orchestrator.reload(&latinos()).await.unwrap();

    assert_eq!(second.cache_outcome, CacheOutcome::Refreshed);
    assert!(second.registry_generation > first_generation);
    assert_eq!(orchestrator.registry().snapshot().generation(), second.registry_generation);
    assert_eq!(
        navigation(&second.merged_config.value),
        ["home", "comunidad", "foro", "eventos"]
    );
    assert!(Arc::ptr_eq(&orchestrator.published().unwrap(), &second));

    // holders of the old snapshot keep a consistent view
    assert_eq!(navigation(&first.merged_config.value), ["home", "comunidad", "foro"]);
    assert_eq!(
        first.plugins.manifests()[1].version,
        "0.9.0"
    );
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_snapshot() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let good = orchestrator.initialize(&latinos()).await.unwrap();
    let good_json = serde_json::to_string(&*good).unwrap();
    let good_generation = orchestrator.registry().snapshot().generation();

    platform.write_manifest(
        "community",
        "id: community\nversion: \"2.0.0\"\ndepends_on: [auth, moderation]\n",
    );
    let error = orchestrator.reload(&latinos()).await.unwrap_err();

    assert_eq!(error.stage, OrchestrationState::Resolving);
    assert_eq!(error.kind, ErrorKind::MissingDependency);
    assert!(error.message.contains("moderation"));
    assert_eq!(orchestrator.state(), OrchestrationState::Error);
    assert_eq!(
        orchestrator.last_failure().map(|failure| failure.stage),
        Some(OrchestrationState::Resolving)
    );

    // nothing from the failed run became visible
    let published = orchestrator.published().unwrap();
    assert!(Arc::ptr_eq(&published, &good));
    assert_eq!(serde_json::to_string(&*published).unwrap(), good_json);
    assert_eq!(orchestrator.registry().snapshot().generation(), good_generation);

    // fixing the manifest recovers from Error
    platform.write_manifest("community", COMMUNITY_V2);
    let recovered = orchestrator.reload(&latinos()).await.unwrap();
    assert_eq!(orchestrator.state(), OrchestrationState::Ready);
    assert_eq!(recovered.plugin_order, ["auth", "community"]);
    assert!(orchestrator.last_failure().is_none());
}

#[tokio::test]
async fn test_broken_manifest_fails_discovery_without_publishing() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();
    let good = orchestrator.initialize(&latinos()).await.unwrap();

    platform.write_manifest("community", "id: [not, a, string\n");
    let error = orchestrator.reload(&latinos()).await.unwrap_err();
    assert_eq!(error.stage, OrchestrationState::Discovering);
    assert_eq!(error.kind, ErrorKind::Discovery);
    assert!(Arc::ptr_eq(&orchestrator.published().unwrap(), &good));
}

#[tokio::test]
async fn test_history_records_each_stage() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();
    orchestrator.initialize(&latinos()).await.unwrap();

    let targets: Vec<OrchestrationState> = orchestrator
        .history()
        .into_iter()
        .map(|transition| transition.to)
        .collect();
    assert_eq!(
        targets,
        [
            OrchestrationState::Detecting,
            OrchestrationState::Discovering,
            OrchestrationState::Resolving,
            OrchestrationState::Loading,
            OrchestrationState::ConfiguringMerge,
            OrchestrationState::Ready,
        ]
    );

    // a reload starts a fresh history
    orchestrator.reload(&latinos()).await.unwrap();
    assert_eq!(orchestrator.history().len(), 6);
    assert_eq!(orchestrator.history()[0].from, OrchestrationState::Ready);
}

#[tokio::test]
async fn test_invalidate_tenant_forces_recompute() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();
    let salarium = RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "salarium");

    orchestrator.initialize(&latinos()).await.unwrap();
    let first = orchestrator.resolve_for_request(&salarium).await.unwrap();
    assert_eq!(first.cache_outcome, CacheOutcome::Miss);

    let removed = orchestrator.invalidate_tenant(first.tenant());
    assert_eq!(removed, 1);
    assert!(orchestrator.tenant_snapshot(first.tenant()).is_none());

    let second = orchestrator.resolve_for_request(&salarium).await.unwrap();
    assert_eq!(second.cache_outcome, CacheOutcome::Miss);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_reload_retires_other_tenants_snapshots() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();
    let intellitrade = RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "intellitrade");

    orchestrator.initialize(&latinos()).await.unwrap();
    let before = orchestrator.resolve_for_request(&intellitrade).await.unwrap();
    assert_eq!(before.plugins.manifests()[0].version, "1.0.0");

    platform.write_manifest("auth", AUTH_V2);
    let reloaded = orchestrator.reload(&latinos()).await.unwrap();
    assert_eq!(reloaded.plugins.manifests()[0].version, "9.9.9");
    assert!(orchestrator.tenant_snapshot(before.tenant()).is_none());

    let after = orchestrator.resolve_for_request(&intellitrade).await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.registry_generation, reloaded.registry_generation);
    assert_eq!(after.plugins.manifests()[0].version, "9.9.9");
    assert_eq!(after.cache_outcome, CacheOutcome::Miss);
    assert_eq!(
        after.merged_config.get("auth.provider").and_then(ConfigValue::as_str),
        Some("sso")
    );

    // the old snapshot is unchanged for whoever still holds it
    assert_eq!(before.plugins.manifests()[0].version, "1.0.0");
    assert!(before.merged_config.get("auth.provider").is_none());
}
