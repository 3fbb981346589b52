//! Detection precedence through the orchestrator

use tenancy_core::context::{CustomRule, DetectionMethod, RuntimeSignals};
use tenancy_core::{BusinessContext, Orchestrator};

use crate::common::TestPlatform;

#[tokio::test]
async fn test_environment_outranks_domain() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let signals = RuntimeSignals::new()
        .with_env("BUSINESS_CONTEXT", "salarium")
        .with_domain("latinos.example.com");
    let detection = orchestrator.detector().detect(&signals);

    assert_eq!(detection.context, BusinessContext::tenant("salarium"));
    assert_eq!(detection.method, DetectionMethod::Environment);
    assert!((detection.confidence - 0.95).abs() < f64::EPSILON);
}

#[test]
fn test_header_outranks_domain_and_port() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let signals = RuntimeSignals::new()
        .with_header("x-business-context", "emprendimiento")
        .with_domain("capacita.example.com")
        .with_port(3001);
    let detection = orchestrator.detector().detect(&signals);
    assert_eq!(detection.context, BusinessContext::tenant("emprendimiento"));
    assert_eq!(detection.method, DetectionMethod::Header);
}

#[test]
fn test_port_used_when_nothing_else_matches() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let detection = orchestrator
        .detector()
        .detect(&RuntimeSignals::new().with_domain("localhost").with_port(3002));
    assert_eq!(detection.context, BusinessContext::tenant("capacita"));
    assert_eq!(detection.method, DetectionMethod::Port);
}

#[test]
fn test_unknown_env_value_falls_through() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::new(platform.load()).unwrap();

    let detection = orchestrator.detector().detect(
        &RuntimeSignals::new()
            .with_env("BUSINESS_CONTEXT", "not-a-tenant")
            .with_domain("www.emprende.io"),
    );
    assert_eq!(detection.context, BusinessContext::tenant("emprendimiento"));
    assert_eq!(detection.method, DetectionMethod::Domain);
}

#[tokio::test]
async fn test_custom_rule_from_builder() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::builder(platform.load())
        .with_custom_rule(CustomRule::new("beta-cookie", 10, 0.6, |signals| {
            Ok(signals
                .header("x-beta")
                .map(|_| BusinessContext::tenant("intellitrade")))
        }))
        .build()
        .unwrap();

    let result = orchestrator
        .initialize(&RuntimeSignals::new().with_header("x-beta", "1"))
        .await
        .unwrap();
    assert_eq!(result.tenant(), &BusinessContext::tenant("intellitrade"));
    assert_eq!(result.context.method, DetectionMethod::Custom);
    assert_eq!(result.plugin_order, ["auth", "trading"]);
}

#[test]
fn test_failing_custom_rule_does_not_abort_detection() {
    let platform = TestPlatform::new();
    let orchestrator = Orchestrator::builder(platform.load())
        .with_custom_rule(CustomRule::new("broken", 0, 0.9, |_| {
            Err("lookup service down".to_string())
        }))
        .build()
        .unwrap();

    let detection = orchestrator.detector().detect(&RuntimeSignals::new());
    assert!(detection.context.is_unknown());
    assert!((0.0..=1.0).contains(&detection.confidence));
}
