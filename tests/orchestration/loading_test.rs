//! Plugin loading behavior seen through full runs

use std::sync::Arc;
use std::time::Duration;
use tenancy_core::context::RuntimeSignals;
use tenancy_core::loader::{AllowListEntry, PluginLoadStatus};
use tenancy_core::logging::MemoryLogger;
use tenancy_core::{Capability, ErrorKind, OrchestrationState, Orchestrator, PluginInstance};

use crate::common::{CountingFactory, FailingFactory, SlowFactory, TestPlatform};

fn tenant(id: &str) -> RuntimeSignals {
    RuntimeSignals::new().with_env("BUSINESS_CONTEXT", id)
}

#[tokio::test]
async fn test_timeout_excludes_plugin_but_not_sibling() {
    let platform = TestPlatform::new();
    let mut config = platform.load();
    config
        .tenants
        .get_mut("salarium")
        .unwrap()
        .plugins
        .push("trading".to_string());

    let logger = Arc::new(MemoryLogger::new());
    let orchestrator = Orchestrator::builder(config)
        .with_factory(
            "payroll",
            Arc::new(SlowFactory {
                delay: Duration::from_secs(5),
            }),
        )
        .with_logger(logger.clone())
        .build()
        .unwrap();

    let result = orchestrator.initialize(&tenant("salarium")).await.unwrap();

    assert_eq!(result.plugin_order, ["auth", "trading"]);
    assert_eq!(
        result.load_report.outcome("payroll").map(|o| o.status),
        Some(PluginLoadStatus::TimedOut)
    );
    assert_eq!(
        result.load_report.outcome("trading").map(|o| o.status),
        Some(PluginLoadStatus::Loaded)
    );
    assert!(result.warnings.iter().any(|w| w.contains("payroll")));
    // excluded plugins contribute no configuration
    assert!(result.merged_config.get("payroll.currency").is_none());
    assert!(result.merged_config.get("features.trading").is_some());

    let excluded = logger.records_named("orchestration.plugin_excluded");
    assert_eq!(excluded.len(), 1);
    assert_eq!(excluded[0].fields["plugin"], "payroll");
    assert_eq!(excluded[0].fields["status"], "timed_out");
}

#[tokio::test]
async fn test_fatal_timeouts_abort_the_run() {
    let platform = TestPlatform::new();
    let mut config = platform.load();
    config.loader.timeouts_fatal = true;

    let orchestrator = Orchestrator::builder(config)
        .with_factory(
            "payroll",
            Arc::new(SlowFactory {
                delay: Duration::from_secs(5),
            }),
        )
        .build()
        .unwrap();

    let error = orchestrator.initialize(&tenant("salarium")).await.unwrap_err();
    assert_eq!(error.stage, OrchestrationState::Loading);
    assert_eq!(error.kind, ErrorKind::PluginTimeout);
    assert!(error.fatal);
}

#[tokio::test]
async fn test_required_plugin_failure_is_fatal() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::builder(platform.load())
        .with_factory("community", Arc::new(FailingFactory { fatal: false }))
        .build()
        .unwrap();

    let error = orchestrator.initialize(&tenant("latinos")).await.unwrap_err();
    assert_eq!(error.stage, OrchestrationState::Loading);
    assert_eq!(error.kind, ErrorKind::RequiredPluginExcluded);
    assert!(error.message.contains("community"));
    assert!(orchestrator.published().is_none());
}

#[tokio::test]
async fn test_recoverable_failure_excludes_dependents() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::builder(platform.load())
        .with_factory("auth", Arc::new(FailingFactory { fatal: false }))
        .build()
        .unwrap();

    let result = orchestrator.initialize(&tenant("intellitrade")).await.unwrap();
    assert!(result.plugin_order.is_empty());
    assert_eq!(
        result.load_report.outcome("trading").map(|o| o.status),
        Some(PluginLoadStatus::DependencyExcluded)
    );
}

#[tokio::test]
async fn test_fatal_failure_contained_by_sandbox() {
    let platform = TestPlatform::new();

    let orchestrator = Orchestrator::builder(platform.load())
        .with_factory("payroll", Arc::new(FailingFactory { fatal: true }))
        .build()
        .unwrap();
    let error = orchestrator.initialize(&tenant("salarium")).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::PluginFailure);
    assert!(error.fatal);

    let mut config = platform.load();
    config.security.sandbox = true;
    let sandboxed = Orchestrator::builder(config)
        .with_factory("payroll", Arc::new(FailingFactory { fatal: true }))
        .build()
        .unwrap();
    let result = sandboxed.initialize(&tenant("salarium")).await.unwrap();
    assert_eq!(result.plugin_order, ["auth"]);
    assert_eq!(
        result.load_report.outcome("payroll").map(|o| o.status),
        Some(PluginLoadStatus::Failed)
    );
}

#[tokio::test]
async fn test_unsigned_plugins_rejected_when_verification_on() {
    let platform = TestPlatform::new();
    platform.write_manifest(
        "auth",
        "id: auth\nversion: \"1.0.0\"\ncapabilities: [access_control]\nsignature: trusted-sig\n",
    );
    let mut config = platform.load();
    config.security.verify_signatures = true;
    config.security.allow_list = vec![AllowListEntry {
        origin: "local".to_string(),
        signatures: vec!["trusted-sig".to_string()],
    }];
    let orchestrator = Orchestrator::new(config).unwrap();

    // auth is signed, trading is not
    let result = orchestrator.initialize(&tenant("intellitrade")).await.unwrap();
    assert_eq!(result.plugin_order, ["auth"]);
    assert_eq!(
        result.load_report.outcome("trading").map(|o| o.status),
        Some(PluginLoadStatus::Rejected)
    );

    // community is required by latinos
    let error = orchestrator.reload(&tenant("latinos")).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::RequiredPluginExcluded);
    assert_eq!(
        orchestrator.published().unwrap().tenant().as_str(),
        "intellitrade"
    );
}

#[tokio::test]
async fn test_lazy_plugin_instantiated_on_capability_access() {
    let platform = TestPlatform::new();
    let courses = Arc::new(CountingFactory::default());
    let orchestrator = Orchestrator::builder(platform.load())
        .with_factory("courses", courses.clone())
        .build()
        .unwrap();

    let result = orchestrator.initialize(&tenant("capacita")).await.unwrap();
    assert_eq!(result.plugin_order, ["auth", "courses"]);
    assert_eq!(result.plugins.instantiated_ids(), ["auth"]);
    assert_eq!(courses.calls(), 0);

    let collections = result
        .plugins
        .access_capability(Capability::Collections)
        .await
        .unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].id(), "courses");

    // second access reuses the instance
    result
        .plugins
        .access_capability(Capability::Collections)
        .await
        .unwrap();
    assert_eq!(courses.calls(), 1);
}

#[tokio::test]
async fn test_on_demand_plugin_needs_explicit_request() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let result = orchestrator.initialize(&tenant("emprendimiento")).await.unwrap();
    assert_eq!(
        result.load_report.outcome("mentoring").map(|o| o.status),
        Some(PluginLoadStatus::Deferred)
    );

    let admin = result.plugins.access_capability(Capability::Admin).await.unwrap();
    assert!(admin.is_empty());
    assert!(result.plugins.get("mentoring").is_none());

    let mentoring = result.plugins.instantiate("mentoring").await.unwrap();
    assert_eq!(mentoring.version(), "1.0.0");
    assert!(result.plugins.get("mentoring").is_some());
}

#[tokio::test]
async fn test_budget_overrun_is_a_warning() {
    let platform = TestPlatform::new();
    let mut config = platform.load();
    config.loader.performance_budget_ms = 10;

    let logger = Arc::new(MemoryLogger::new());
    let orchestrator = Orchestrator::builder(config)
        .with_factory(
            "trading",
            Arc::new(SlowFactory {
                delay: Duration::from_millis(50),
            }),
        )
        .with_logger(logger.clone())
        .build()
        .unwrap();

    let result = orchestrator.initialize(&tenant("intellitrade")).await.unwrap();
    assert!(result.load_report.budget_exceeded);
    assert_eq!(result.plugin_order, ["auth", "trading"]);
    assert_eq!(logger.records_named("orchestration.budget_exceeded").len(), 1);
}
