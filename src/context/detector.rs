//! # Context Detector
//!
//! Turns runtime signals into exactly one business context with a confidence
//! score. Strategies run in the configured priority order and the first match
//! wins; confidence never reorders them.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use super::business_context::{BusinessContext, TenantCatalog};
use super::signals::RuntimeSignals;
use super::strategies::{
    clamp_confidence, run_strategy, CustomRule, DetectionError, DetectionMethod, DetectionRules,
    DetectionResultOf, DomainRule, EnvRule, PortRule, StrategyKind,
};
use crate::constants::{confidence, env_vars, headers};

/// Outcome of one detection call; created fresh and never mutated afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub context: BusinessContext,
    pub method: DetectionMethod,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DetectionResult {
    pub fn is_fallback(&self) -> bool {
        matches!(self.method, DetectionMethod::Fallback | DetectionMethod::Error)
    }
}

/// Declarative detection settings, usually read from the `detection` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub fallback_context: BusinessContext,
    pub context_variables: Vec<String>,
    pub header_name: String,
    pub domain_rules: Vec<DomainRule>,
    pub port_rules: Vec<PortRule>,
    pub env_rules: Vec<EnvRule>,
    /// Evaluation order; the position of `custom` is where custom rules run
    pub strategy_order: Vec<StrategyKind>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fallback_context: BusinessContext::Unknown,
            context_variables: vec![
                env_vars::BUSINESS_CONTEXT.to_string(),
                env_vars::BUSINESS_MODE.to_string(),
            ],
            header_name: headers::BUSINESS_CONTEXT.to_string(),
            domain_rules: Vec::new(),
            port_rules: Vec::new(),
            env_rules: Vec::new(),
            strategy_order: StrategyKind::default_order(),
        }
    }
}

impl DetectionConfig {
    /// Strategy slots listed more than once
    pub fn duplicate_strategies(&self) -> Vec<StrategyKind> {
        let mut seen = BTreeSet::new();
        let mut duplicates = Vec::new();
        for kind in &self.strategy_order {
            if !seen.insert(*kind) && !duplicates.contains(kind) {
                duplicates.push(*kind);
            }
        }
        duplicates
    }
}

/// Business context detector
///
/// Rule tables sit behind a read/write lock so mappings can be changed at
/// runtime; `detect` only ever takes the read side.
#[derive(Debug)]
pub struct ContextDetector {
    catalog: RwLock<TenantCatalog>,
    rules: RwLock<DetectionRules>,
    order: Vec<StrategyKind>,
    fallback: BusinessContext,
}

impl ContextDetector {
    pub fn new(config: &DetectionConfig, catalog: TenantCatalog) -> DetectionResultOf<Self> {
        let mut rules =
            DetectionRules::new(config.context_variables.clone(), config.header_name.clone());
        for rule in &config.domain_rules {
            rules.upsert_domain_rule(rule.clone())?;
        }
        for rule in &config.port_rules {
            rules.set_port_rule(rule.port, rule.context.clone());
        }
        for rule in &config.env_rules {
            rules.upsert_env_rule(rule.clone());
        }

        let mut order = Vec::with_capacity(config.strategy_order.len());
        for kind in &config.strategy_order {
            if !order.contains(kind) {
                order.push(*kind);
            }
        }

        Ok(Self {
            catalog: RwLock::new(catalog),
            rules: RwLock::new(rules),
            order,
            fallback: config.fallback_context.clone(),
        })
    }

    pub fn fallback_context(&self) -> &BusinessContext {
        &self.fallback
    }

    pub fn strategy_order(&self) -> &[StrategyKind] {
        &self.order
    }

    pub fn catalog(&self) -> TenantCatalog {
        self.catalog.read().clone()
    }

    /// Detect the business context for a signal set
    ///
    /// Never fails: no match yields the fallback at 0.1, an internal error
    /// yields the fallback at 0.0 with the error recorded in metadata.
    pub fn detect(&self, signals: &RuntimeSignals) -> DetectionResult {
        let rules = self.rules.read();
        let catalog = self.catalog.read();

        for kind in &self.order {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                run_strategy(*kind, signals, &rules, &catalog)
            }));

            match outcome {
                Ok(Ok(Some(hit))) if !hit.context.is_unknown() => {
                    debug!(
                        strategy = %kind,
                        context = %hit.context,
                        confidence = hit.confidence,
                        "business context detected"
                    );
                    return DetectionResult {
                        context: hit.context,
                        method: DetectionMethod::from(*kind),
                        confidence: clamp_confidence(hit.confidence),
                        metadata: hit.metadata,
                    };
                }
                Ok(Ok(_)) => {}
                Ok(Err(error)) => return self.failed(*kind, &error.to_string()),
                Err(_) => return self.failed(*kind, "strategy panicked"),
            }
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("reason".to_string(), "no strategy matched".to_string());
        DetectionResult {
            context: self.fallback.clone(),
            method: DetectionMethod::Fallback,
            confidence: confidence::FALLBACK,
            metadata,
        }
    }

    fn failed(&self, kind: StrategyKind, error: &str) -> DetectionResult {
        warn!(strategy = %kind, error = %error, "business context detection failed");
        let mut metadata = BTreeMap::new();
        metadata.insert("error".to_string(), error.to_string());
        metadata.insert("strategy".to_string(), kind.to_string());
        DetectionResult {
            context: self.fallback.clone(),
            method: DetectionMethod::Error,
            confidence: confidence::DETECTION_FAILED,
            metadata,
        }
    }

    /// Make a tenant known to detection at runtime
    pub fn register_tenant(&self, id: &str) -> bool {
        self.catalog.write().insert(id)
    }

    pub fn add_domain_rule(&self, rule: DomainRule) -> Result<(), DetectionError> {
        self.rules.write().upsert_domain_rule(rule)
    }

    pub fn remove_domain_rule(&self, pattern: &str) -> bool {
        self.rules.write().remove_domain_rule(pattern)
    }

    pub fn set_port_rule(&self, port: u16, context: BusinessContext) -> Option<BusinessContext> {
        self.rules.write().set_port_rule(port, context)
    }

    pub fn remove_port_rule(&self, port: u16) -> Option<BusinessContext> {
        self.rules.write().remove_port_rule(port)
    }

    pub fn add_env_rule(&self, rule: EnvRule) {
        self.rules.write().upsert_env_rule(rule);
    }

    pub fn remove_env_rules(&self, variable: &str) -> usize {
        self.rules.write().remove_env_rules(variable)
    }

    pub fn add_custom_rule(&self, rule: CustomRule) -> Result<(), DetectionError> {
        self.rules.write().upsert_custom_rule(rule)
    }

    pub fn remove_custom_rule(&self, name: &str) -> bool {
        self.rules.write().remove_custom_rule(name)
    }

    /// A copy of the current rule tables
    pub fn rules(&self) -> DetectionRules {
        self.rules.read().clone()
    }
}
