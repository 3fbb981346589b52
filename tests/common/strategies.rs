use proptest::prelude::*;
use proptest::strategy::Just;
use serde_json::json;
use tenancy_core::context::RuntimeSignals;
use tenancy_core::merge::ConfigValue;
use tenancy_core::registry::PluginManifest;

/// Tenant ids from the platform fixture plus a few strangers
pub fn tenant_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("intellitrade".to_string()),
        Just("salarium".to_string()),
        Just("latinos".to_string()),
        Just("capacita".to_string()),
        Just("emprendimiento".to_string()),
        "[a-z]{1,12}",
    ]
}

/// Arbitrary, possibly conflicting runtime signals
pub fn runtime_signals_strategy() -> impl Strategy<Value = RuntimeSignals> {
    (
        prop::option::of(tenant_name_strategy()),
        prop::option::of(tenant_name_strategy()),
        prop::option::of("[a-z]{1,10}(\\.[a-z]{2,6}){1,2}"),
        prop::option::of(1u16..10_000),
    )
        .prop_map(|(env, header, domain, port)| {
            let mut signals = RuntimeSignals::new();
            if let Some(env) = env {
                signals = signals.with_env("BUSINESS_CONTEXT", env);
            }
            if let Some(header) = header {
                signals = signals.with_header("x-business-context", header);
            }
            if let Some(domain) = domain {
                signals = signals.with_domain(domain);
            }
            if let Some(port) = port {
                signals = signals.with_port(port);
            }
            signals
        })
}

/// Small JSON-like configuration trees
pub fn config_value_strategy() -> impl Strategy<Value = ConfigValue> {
    let leaf = prop_oneof![
        Just(json!(null)),
        any::<bool>().prop_map(|b| json!(b)),
        (-1000i64..1000).prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(|s| json!(s)),
    ];
    let tree = leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-d]", inner, 0..4)
                .prop_map(|map| serde_json::Value::Object(map.into_iter().collect())),
        ]
    });
    prop::collection::btree_map("[a-d]", tree, 0..4)
        .prop_map(|map| ConfigValue::from(serde_json::Value::Object(map.into_iter().collect())))
}

/// Acyclic manifest sets: plugin `n` may only depend on plugins `< n`
pub fn acyclic_manifests_strategy() -> impl Strategy<Value = Vec<PluginManifest>> {
    (1usize..12).prop_flat_map(|count| {
        prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), count)
            .prop_map(move |picks| {
                picks
                    .into_iter()
                    .enumerate()
                    .map(|(position, dependencies)| {
                        let manifest = PluginManifest::new(format!("plugin{position}"), "1.0");
                        if position == 0 {
                            return manifest;
                        }
                        let mut ids: Vec<String> = dependencies
                            .into_iter()
                            .map(|index| format!("plugin{}", index.index(position)))
                            .collect();
                        ids.sort();
                        ids.dedup();
                        manifest.depends_on(ids)
                    })
                    .collect()
            })
    })
}
