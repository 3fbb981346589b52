//! Concurrent request resolution and readers racing a reload

use std::sync::Arc;
use tenancy_core::context::RuntimeSignals;
use tenancy_core::merge::ConfigValue;
use tenancy_core::{BusinessContext, Orchestrator};

use crate::common::TestPlatform;

const TENANTS: [&str; 5] = ["intellitrade", "salarium", "latinos", "capacita", "emprendimiento"];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_across_tenants() {
    let platform = TestPlatform::new();
    let orchestrator = Arc::new(Orchestrator::new(platform.load()).unwrap());
    orchestrator
        .initialize(&RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "latinos"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for round in 0..8 {
        for tenant in TENANTS {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                let signals = if round % 2 == 0 {
                    RuntimeSignals::new().with_header("x-business-context", tenant)
                } else {
                    RuntimeSignals::new().with_env("BUSINESS_CONTEXT", tenant)
                };
                let result = orchestrator.resolve_for_request(&signals).await.unwrap();
                (tenant, result)
            }));
        }
    }

    for handle in handles {
        let (tenant, result) = handle.await.unwrap();
        assert_eq!(result.tenant(), &BusinessContext::tenant(tenant));
        assert_eq!(result.plugin_order[0], "auth");
    }

    for tenant in TENANTS {
        assert!(orchestrator
            .tenant_snapshot(&BusinessContext::tenant(tenant))
            .is_some());
    }
    // the primary snapshot still belongs to the initialized tenant
    assert_eq!(orchestrator.published().unwrap().tenant().as_str(), "latinos");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_partial_snapshots() {
    let platform = TestPlatform::new();
    let orchestrator = Arc::new(Orchestrator::new(platform.load()).unwrap());
    let salarium = RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "salarium");
    let latinos = RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "latinos");
    orchestrator.initialize(&salarium).await.unwrap();

    let reader = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                let snapshot = orchestrator.published().unwrap();
                let site = snapshot
                    .merged_config
                    .get("site.name")
                    .and_then(ConfigValue::as_str)
                    .map(str::to_string);
                // tenant, plugin order and config always come from the same run
                match snapshot.tenant().as_str() {
                    "salarium" => {
                        assert_eq!(snapshot.plugin_order, ["auth", "payroll"]);
                        assert_eq!(site.as_deref(), Some("Salarium"));
                    }
                    "latinos" => {
                        assert_eq!(snapshot.plugin_order, ["auth", "community"]);
                        assert_eq!(site.as_deref(), Some("Latinos"));
                    }
                    other => panic!("unexpected tenant {other}"),
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for round in 0..10 {
        let signals = if round % 2 == 0 { &latinos } else { &salarium };
        orchestrator.reload(signals).await.unwrap();
    }
    reader.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_path_racing_reloads_ends_on_current_registry() {
    let platform = TestPlatform::new();
    let orchestrator = Arc::new(Orchestrator::new(platform.load()).unwrap());
    let latinos = RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "latinos");
    orchestrator.initialize(&latinos).await.unwrap();

    let reloader = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            for _ in 0..5 {
                orchestrator.reload(&latinos).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut requests = Vec::new();
    for tenant in ["intellitrade", "salarium", "capacita"] {
        let orchestrator = orchestrator.clone();
        requests.push(tokio::spawn(async move {
            for _ in 0..20 {
                let signals = RuntimeSignals::new().with_header("x-business-context", tenant);
                let result = orchestrator.resolve_for_request(&signals).await.unwrap();
                assert_eq!(result.tenant(), &BusinessContext::tenant(tenant));
                tokio::task::yield_now().await;
            }
        }));
    }

    reloader.await.unwrap();
    for request in requests {
        request.await.unwrap();
    }

    let generation = orchestrator.registry().snapshot().generation();
    assert_eq!(orchestrator.published().unwrap().registry_generation, generation);
    for tenant in ["intellitrade", "salarium", "capacita"] {
        let signals = RuntimeSignals::new().with_header("x-business-context", tenant);
        let result = orchestrator.resolve_for_request(&signals).await.unwrap();
        assert_eq!(result.registry_generation, generation);
    }
}
