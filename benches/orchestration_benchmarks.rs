use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use tenancy_core::context::{
    BusinessContext, ContextDetector, DetectionConfig, DomainMatch, DomainRule, RuntimeSignals,
    TenantCatalog,
};
use tenancy_core::merge::{merge_fragments, ConfigFragment, ConfigValue, MergeStrategy};
use tenancy_core::registry::{PluginManifest, RegistrySnapshot};
use tenancy_core::resolution::DependencyResolver;

const TENANTS: [&str; 5] = ["intellitrade", "salarium", "latinos", "capacita", "emprendimiento"];

fn detector() -> ContextDetector {
    let mut config = DetectionConfig::default();
    for tenant in TENANTS {
        config.domain_rules.push(DomainRule::new(
            tenant,
            BusinessContext::tenant(tenant),
            DomainMatch::Subdomain,
        ));
    }
    ContextDetector::new(&config, TenantCatalog::new(TENANTS)).expect("valid detection config")
}

fn benchmark_detection(c: &mut Criterion) {
    let detector = detector();
    let by_env = RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "salarium");
    let by_domain = RuntimeSignals::new().with_domain("emprendimiento.example.com");
    let unmatched = RuntimeSignals::new().with_domain("www.example.org").with_port(8080);

    c.bench_function("detect_env", |b| b.iter(|| detector.detect(black_box(&by_env))));
    c.bench_function("detect_domain", |b| {
        b.iter(|| detector.detect(black_box(&by_domain)))
    });
    c.bench_function("detect_fallback", |b| {
        b.iter(|| detector.detect(black_box(&unmatched)))
    });
}

fn benchmark_resolution(c: &mut Criterion) {
    let mut manifests = vec![PluginManifest::new("core", "1.0")];
    for layer in 0..5 {
        for index in 0..10 {
            let previous = if layer == 0 {
                "core".to_string()
            } else {
                format!("p{}_{}", layer - 1, index)
            };
            manifests.push(
                PluginManifest::new(format!("p{layer}_{index}"), "1.0").depends_on([previous]),
            );
        }
    }
    let snapshot = RegistrySnapshot::new(1, manifests).expect("unique ids");
    let requested: Vec<String> = (0..10).map(|index| format!("p4_{index}")).collect();
    let resolver = DependencyResolver::new();

    c.bench_function("resolve_51_plugins", |b| {
        b.iter(|| resolver.resolve(black_box(&requested), &snapshot))
    });
}

fn benchmark_merge(c: &mut Criterion) {
    let fragments = vec![
        ConfigFragment::base(
            "base",
            ConfigValue::from(json!({
                "site": {"name": "Platform", "locale": "en"},
                "features": {"search": true, "export": false},
                "navigation": ["home", "about"]
            })),
        ),
        ConfigFragment::tenant(
            "tenant:latinos",
            ConfigValue::from(json!({"site": {"locale": "es"}, "navigation": ["comunidad"]})),
        )
        .with_append_key("navigation"),
        ConfigFragment::plugin(
            "plugin:community",
            ConfigValue::from(json!({"features": {"forum": true}})),
        ),
    ];

    for strategy in [MergeStrategy::Deep, MergeStrategy::Shallow, MergeStrategy::Replace] {
        c.bench_function(&format!("merge_{strategy}"), |b| {
            b.iter(|| merge_fragments(black_box(fragments.clone()), strategy, None))
        });
    }
}

criterion_group!(benches, benchmark_detection, benchmark_resolution, benchmark_merge);
criterion_main!(benches);
