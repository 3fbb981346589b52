//! End-to-end pipeline runs per tenant

use tenancy_core::context::{DetectionMethod, RuntimeSignals};
use tenancy_core::merge::{CacheOutcome, ConfigValue};
use tenancy_core::{BusinessContext, ErrorKind, OrchestrationState, Orchestrator};

use crate::common::TestPlatform;

fn string_at<'a>(value: Option<&'a ConfigValue>) -> Option<&'a str> {
    value.and_then(ConfigValue::as_str)
}

#[tokio::test]
async fn test_latinos_full_pipeline() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let result = orchestrator
        .initialize(&RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "latinos"))
        .await
        .unwrap();

    assert_eq!(result.tenant(), &BusinessContext::tenant("latinos"));
    assert_eq!(result.context.method, DetectionMethod::Environment);
    assert_eq!(result.plugin_order, ["auth", "community"]);
    assert_eq!(result.cache_outcome, CacheOutcome::Miss);
    assert!(result.warnings.is_empty());

    let config = &result.merged_config;
    assert_eq!(string_at(config.get("site.name")), Some("Latinos"));
    assert_eq!(string_at(config.get("site.locale")), Some("es"));
    assert_eq!(
        string_at(config.get("database.url")),
        Some("postgres://localhost/platform")
    );

    // base, tenant and plugin contributions concatenate under the append key
    let navigation: Vec<&str> = config
        .get("navigation")
        .and_then(ConfigValue::as_sequence)
        .unwrap()
        .iter()
        .filter_map(ConfigValue::as_str)
        .collect();
    assert_eq!(navigation, ["home", "comunidad", "foro"]);
    assert_eq!(config.fragments, ["base", "tenant:latinos", "plugin:community"]);

    let stages: Vec<OrchestrationState> = result.stage_timings.iter().map(|t| t.stage).collect();
    assert_eq!(
        stages,
        [
            OrchestrationState::Detecting,
            OrchestrationState::Discovering,
            OrchestrationState::Resolving,
            OrchestrationState::Loading,
            OrchestrationState::ConfiguringMerge,
        ]
    );
    assert_eq!(orchestrator.state(), OrchestrationState::Ready);
}

#[tokio::test]
async fn test_salarium_by_domain_gets_plugin_config() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let result = orchestrator
        .initialize(&RuntimeSignals::new().with_domain("app.salarium.io"))
        .await
        .unwrap();

    assert_eq!(result.tenant(), &BusinessContext::tenant("salarium"));
    assert_eq!(result.context.method, DetectionMethod::Domain);
    assert_eq!(result.plugin_order, ["auth", "payroll"]);
    assert_eq!(string_at(result.merged_config.get("payroll.currency")), Some("EUR"));
    assert_eq!(string_at(result.merged_config.get("site.name")), Some("Salarium"));
}

#[tokio::test]
async fn test_unmatched_signals_fall_back_to_base_config() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let result = orchestrator
        .initialize(&RuntimeSignals::new().with_domain("www.example.org"))
        .await
        .unwrap();

    assert!(result.tenant().is_unknown());
    assert!(result.context.is_fallback());
    assert!(result.plugin_order.is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("detection_ambiguity"));
    assert_eq!(string_at(result.merged_config.get("site.name")), Some("Platform"));
}

#[tokio::test]
async fn test_secrets_masked_in_dump_and_json() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();
    let result = orchestrator
        .initialize(&RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "intellitrade"))
        .await
        .unwrap();

    // the live config keeps the real value, dumps do not
    assert_eq!(
        string_at(result.merged_config.get("database.password")),
        Some("changeme")
    );
    let dump = result.merged_config.sanitized_dump();
    assert!(!dump.contains("changeme"));
    assert!(dump.contains("***REDACTED***"));
}

#[tokio::test]
async fn test_result_serializes_without_plugin_instances() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();
    let result = orchestrator
        .initialize(&RuntimeSignals::new().with_header("X-Business-Context", "capacita"))
        .await
        .unwrap();

    let json = serde_json::to_value(&*result).unwrap();
    assert_eq!(json["plugin_order"], serde_json::json!(["auth", "courses"]));
    assert_eq!(json["context"]["context"], "capacita");
    assert_eq!(json["cache_outcome"], "miss");
    assert!(json.get("plugins").is_none());
}

#[tokio::test]
async fn test_dependency_cycle_names_members() {
    let platform = TestPlatform::new();
    platform.write_manifest("ledger", "id: ledger\nversion: \"1\"\ndepends_on: [auth, audit]\n");
    platform.write_manifest("audit", "id: audit\nversion: \"1\"\ndepends_on: [ledger]\n");

    let mut config = platform.load();
    config
        .tenants
        .get_mut("salarium")
        .unwrap()
        .plugins
        .push("ledger".to_string());
    let orchestrator = Orchestrator::new(config).unwrap();

    let error = orchestrator
        .initialize(&RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "salarium"))
        .await
        .unwrap_err();

    assert_eq!(error.stage, OrchestrationState::Resolving);
    assert_eq!(error.kind, ErrorKind::Cycle);
    assert!(error.message.contains("audit"));
    assert!(error.message.contains("ledger"));
    assert!(!error.message.contains("payroll"));
    assert_eq!(error.tenant.as_deref(), Some("salarium"));
    assert!(orchestrator.published().is_none());
    assert_eq!(orchestrator.state(), OrchestrationState::Error);
}

#[tokio::test]
async fn test_unsupported_capability_fails_discovery() {
    let platform = TestPlatform::new();
    platform.write_manifest("rogue", "id: rogue\nversion: \"1\"\ncapabilities: [kernel_modules]\n");
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let error = orchestrator
        .initialize(&RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "latinos"))
        .await
        .unwrap_err();

    assert_eq!(error.stage, OrchestrationState::Discovering);
    assert_eq!(error.kind, ErrorKind::Discovery);
    assert!(error.message.contains("kernel_modules"));
}
