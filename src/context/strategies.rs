//! # Detection Strategies
//!
//! Each strategy is an independent, pure function from signals (plus the
//! current rule tables) to an optional match. The detector evaluates them in
//! a configurable order and the first match wins.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::business_context::{BusinessContext, TenantCatalog};
use super::signals::RuntimeSignals;
use crate::constants::{confidence, env_vars};

/// Errors raised while evaluating a detection strategy
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectionError {
    #[error("Invalid domain pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Custom rule '{rule}' failed: {reason}")]
    CustomRuleFailed { rule: String, reason: String },

    #[error("Invalid confidence {value} for {source_name}: must be within [0, 1]")]
    InvalidConfidence { source_name: String, value: f64 },
}

pub type DetectionResultOf<T> = Result<T, DetectionError>;

/// The configurable slots of the detection chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Environment,
    Header,
    Domain,
    Port,
    Custom,
}

impl StrategyKind {
    /// Priority order: environment, explicit header, domain, port, custom rules
    pub fn default_order() -> Vec<StrategyKind> {
        vec![
            Self::Environment,
            Self::Header,
            Self::Domain,
            Self::Port,
            Self::Custom,
        ]
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "environment"),
            Self::Header => write!(f, "header"),
            Self::Domain => write!(f, "domain"),
            Self::Port => write!(f, "port"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// How a detection result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Environment,
    Header,
    Domain,
    Port,
    Custom,
    Fallback,
    Error,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Environment => "environment",
            Self::Header => "header",
            Self::Domain => "domain",
            Self::Port => "port",
            Self::Custom => "custom",
            Self::Fallback => "fallback",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

impl From<StrategyKind> for DetectionMethod {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Environment => Self::Environment,
            StrategyKind::Header => Self::Header,
            StrategyKind::Domain => Self::Domain,
            StrategyKind::Port => Self::Port,
            StrategyKind::Custom => Self::Custom,
        }
    }
}

/// A single strategy's positive answer
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyMatch {
    pub context: BusinessContext,
    pub confidence: f64,
    pub metadata: BTreeMap<String, String>,
}

impl StrategyMatch {
    fn new(context: BusinessContext, confidence: f64) -> Self {
        Self {
            context,
            confidence: clamp_confidence(confidence),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Clamp any reported confidence into [0, 1]; NaN counts as no confidence
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// How a domain rule's pattern is compared against the request host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainMatch {
    /// First host label equals the pattern, or the host ends with `.pattern`
    #[default]
    Subdomain,
    /// Host contains the pattern anywhere
    Contains,
    /// Host matches the pattern as a regular expression
    Regex,
}

/// Domain ↔ tenant mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRule {
    pub pattern: String,
    pub context: BusinessContext,
    #[serde(default)]
    pub match_kind: DomainMatch,
    /// Overrides the default confidence of the match kind
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl DomainRule {
    pub fn new(pattern: impl Into<String>, context: BusinessContext, match_kind: DomainMatch) -> Self {
        Self {
            pattern: pattern.into(),
            context,
            match_kind,
            confidence: None,
        }
    }
}

/// Port ↔ tenant mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRule {
    pub port: u16,
    pub context: BusinessContext,
}

/// Environment variable ↔ tenant mapping
///
/// With no `value`, any non-empty value of the variable selects the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvRule {
    pub variable: String,
    #[serde(default)]
    pub value: Option<String>,
    pub context: BusinessContext,
}

/// Predicate signature for caller-supplied detection rules
pub type CustomPredicate =
    Arc<dyn Fn(&RuntimeSignals) -> Result<Option<BusinessContext>, String> + Send + Sync>;

/// Caller-supplied detection rule evaluated in the `custom` slot
///
/// Rules run in ascending `priority`; equal priorities keep declaration order.
#[derive(Clone)]
pub struct CustomRule {
    pub name: String,
    pub priority: i32,
    pub confidence: f64,
    pub predicate: CustomPredicate,
}

impl CustomRule {
    pub fn new<F>(name: impl Into<String>, priority: i32, confidence: f64, predicate: F) -> Self
    where
        F: Fn(&RuntimeSignals) -> Result<Option<BusinessContext>, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            confidence,
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("confidence", &self.confidence)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct CompiledDomainRule {
    rule: DomainRule,
    regex: Option<Regex>,
}

/// The mutable rule tables consulted by the strategies
///
/// Callers may add or replace mappings at runtime through the detector.
#[derive(Debug, Clone, Default)]
pub struct DetectionRules {
    pub context_variables: Vec<String>,
    pub header_name: String,
    domain_rules: Vec<CompiledDomainRule>,
    port_rules: BTreeMap<u16, BusinessContext>,
    env_rules: Vec<EnvRule>,
    custom_rules: Vec<CustomRule>,
}

impl DetectionRules {
    pub fn new(context_variables: Vec<String>, header_name: impl Into<String>) -> Self {
        Self {
            context_variables,
            header_name: header_name.into(),
            ..Self::default()
        }
    }

    /// Add a domain mapping, replacing any rule with the same pattern and kind
    pub fn upsert_domain_rule(&mut self, rule: DomainRule) -> DetectionResultOf<()> {
        if let Some(value) = rule.confidence {
            validate_confidence(&format!("domain rule '{}'", rule.pattern), value)?;
        }
        let regex = match rule.match_kind {
            DomainMatch::Regex => Some(Regex::new(&rule.pattern).map_err(|e| {
                DetectionError::InvalidPattern {
                    pattern: rule.pattern.clone(),
                    reason: e.to_string(),
                }
            })?),
            DomainMatch::Subdomain | DomainMatch::Contains => None,
        };
        let compiled = CompiledDomainRule {
            rule: DomainRule {
                pattern: normalize_pattern(&rule.pattern, rule.match_kind),
                ..rule
            },
            regex,
        };

        match self.domain_rules.iter_mut().find(|existing| {
            existing.rule.pattern == compiled.rule.pattern
                && existing.rule.match_kind == compiled.rule.match_kind
        }) {
            Some(existing) => *existing = compiled,
            None => self.domain_rules.push(compiled),
        }
        Ok(())
    }

    pub fn remove_domain_rule(&mut self, pattern: &str) -> bool {
        let before = self.domain_rules.len();
        self.domain_rules
            .retain(|existing| !existing.rule.pattern.eq_ignore_ascii_case(pattern));
        before != self.domain_rules.len()
    }

    /// Map a port to a tenant, returning the previous mapping
    pub fn set_port_rule(&mut self, port: u16, context: BusinessContext) -> Option<BusinessContext> {
        self.port_rules.insert(port, context)
    }

    pub fn remove_port_rule(&mut self, port: u16) -> Option<BusinessContext> {
        self.port_rules.remove(&port)
    }

    /// Add an environment mapping, replacing one with the same variable and value
    pub fn upsert_env_rule(&mut self, rule: EnvRule) {
        match self
            .env_rules
            .iter_mut()
            .find(|existing| existing.variable == rule.variable && existing.value == rule.value)
        {
            Some(existing) => *existing = rule,
            None => self.env_rules.push(rule),
        }
    }

    pub fn remove_env_rules(&mut self, variable: &str) -> usize {
        let before = self.env_rules.len();
        self.env_rules.retain(|existing| existing.variable != variable);
        before - self.env_rules.len()
    }

    /// Register a custom rule, replacing one with the same name in place
    pub fn upsert_custom_rule(&mut self, rule: CustomRule) -> DetectionResultOf<()> {
        validate_confidence(&format!("custom rule '{}'", rule.name), rule.confidence)?;
        match self
            .custom_rules
            .iter_mut()
            .find(|existing| existing.name == rule.name)
        {
            Some(existing) => *existing = rule,
            None => self.custom_rules.push(rule),
        }
        Ok(())
    }

    pub fn remove_custom_rule(&mut self, name: &str) -> bool {
        let before = self.custom_rules.len();
        self.custom_rules.retain(|existing| existing.name != name);
        before != self.custom_rules.len()
    }

    pub fn domain_rules(&self) -> impl Iterator<Item = &DomainRule> {
        self.domain_rules.iter().map(|compiled| &compiled.rule)
    }

    pub fn port_rules(&self) -> &BTreeMap<u16, BusinessContext> {
        &self.port_rules
    }

    pub fn env_rules(&self) -> &[EnvRule] {
        &self.env_rules
    }

    /// Custom rules in evaluation order
    pub fn custom_rules(&self) -> Vec<&CustomRule> {
        let mut ordered: Vec<&CustomRule> = self.custom_rules.iter().collect();
        // stable sort keeps declaration order among equal priorities
        ordered.sort_by_key(|rule| rule.priority);
        ordered
    }
}

fn normalize_pattern(pattern: &str, kind: DomainMatch) -> String {
    match kind {
        DomainMatch::Regex => pattern.to_string(),
        DomainMatch::Subdomain | DomainMatch::Contains => pattern.trim().to_lowercase(),
    }
}

fn validate_confidence(source_name: &str, value: f64) -> DetectionResultOf<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DetectionError::InvalidConfidence {
            source_name: source_name.to_string(),
            value,
        })
    }
}

/// Environment strategy: explicit context variables, then env mappings
pub fn detect_from_environment(
    signals: &RuntimeSignals,
    rules: &DetectionRules,
    catalog: &TenantCatalog,
) -> DetectionResultOf<Option<StrategyMatch>> {
    for variable in &rules.context_variables {
        let Some(value) = signals.env_var(variable) else {
            continue;
        };
        if let Some(context) = catalog.lookup(value) {
            let score = if variable == env_vars::BUSINESS_CONTEXT {
                confidence::ENV_BUSINESS_CONTEXT
            } else {
                confidence::ENV_BUSINESS_MODE
            };
            return Ok(Some(
                StrategyMatch::new(context, score)
                    .with("variable", variable.as_str())
                    .with("value", value),
            ));
        }
        tracing::debug!(
            variable = %variable,
            value = %value,
            "environment value does not name a known tenant"
        );
    }

    for rule in &rules.env_rules {
        let Some(value) = signals.env_var(&rule.variable) else {
            continue;
        };
        let matches = rule
            .value
            .as_deref()
            .map_or(true, |expected| expected.eq_ignore_ascii_case(value.trim()));
        if matches && catalog.contains(&rule.context) {
            return Ok(Some(
                StrategyMatch::new(rule.context.clone(), confidence::ENV_MAPPING)
                    .with("variable", rule.variable.as_str())
                    .with("value", value),
            ));
        }
    }

    Ok(None)
}

/// Header strategy: the explicit business context header
pub fn detect_from_header(
    signals: &RuntimeSignals,
    rules: &DetectionRules,
    catalog: &TenantCatalog,
) -> DetectionResultOf<Option<StrategyMatch>> {
    let Some(value) = signals.header(&rules.header_name) else {
        return Ok(None);
    };
    Ok(catalog.lookup(value).map(|context| {
        StrategyMatch::new(context, confidence::HEADER)
            .with("header", rules.header_name.as_str())
            .with("value", value)
    }))
}

/// Domain strategy: explicit rules in declaration order, then tenant ids as
/// subdomains, then tenant ids as substrings of the host
pub fn detect_from_domain(
    signals: &RuntimeSignals,
    rules: &DetectionRules,
    catalog: &TenantCatalog,
) -> DetectionResultOf<Option<StrategyMatch>> {
    let Some(host) = signals.effective_host() else {
        return Ok(None);
    };

    for compiled in &rules.domain_rules {
        let rule = &compiled.rule;
        let (matched, default_score) = match rule.match_kind {
            DomainMatch::Subdomain => (
                is_subdomain_match(&host, &rule.pattern),
                confidence::DOMAIN_SUBDOMAIN,
            ),
            DomainMatch::Contains => (host.contains(&rule.pattern), confidence::DOMAIN_SUBSTRING),
            DomainMatch::Regex => (
                compiled
                    .regex
                    .as_ref()
                    .is_some_and(|regex| regex.is_match(&host)),
                confidence::DOMAIN_PATTERN,
            ),
        };
        if matched && catalog.contains(&rule.context) {
            return Ok(Some(
                StrategyMatch::new(rule.context.clone(), rule.confidence.unwrap_or(default_score))
                    .with("host", host.as_str())
                    .with("pattern", rule.pattern.as_str()),
            ));
        }
    }

    if let Some(tenant) = catalog.iter().find(|tenant| is_subdomain_match(&host, tenant)) {
        return Ok(Some(
            StrategyMatch::new(BusinessContext::tenant(tenant), confidence::DOMAIN_SUBDOMAIN)
                .with("host", host.as_str())
                .with("match", "subdomain"),
        ));
    }

    if let Some(tenant) = catalog.iter().find(|tenant| host.contains(*tenant)) {
        return Ok(Some(
            StrategyMatch::new(BusinessContext::tenant(tenant), confidence::DOMAIN_SUBSTRING)
                .with("host", host.as_str())
                .with("match", "substring"),
        ));
    }

    Ok(None)
}

fn is_subdomain_match(host: &str, pattern: &str) -> bool {
    let first_label = host.split('.').next().unwrap_or_default();
    first_label == pattern || host == pattern || host.ends_with(&format!(".{pattern}"))
}

/// Port strategy: listening port table
pub fn detect_from_port(
    signals: &RuntimeSignals,
    rules: &DetectionRules,
    catalog: &TenantCatalog,
) -> DetectionResultOf<Option<StrategyMatch>> {
    let Some(port) = signals.effective_port() else {
        return Ok(None);
    };
    Ok(rules
        .port_rules
        .get(&port)
        .filter(|context| catalog.contains(context))
        .map(|context| {
            StrategyMatch::new(context.clone(), confidence::PORT).with("port", port.to_string())
        }))
}

/// Custom strategy: caller rules by ascending priority, with their declared confidence
pub fn detect_from_custom_rules(
    signals: &RuntimeSignals,
    rules: &DetectionRules,
    catalog: &TenantCatalog,
) -> DetectionResultOf<Option<StrategyMatch>> {
    for rule in rules.custom_rules() {
        let outcome = (rule.predicate)(signals).map_err(|reason| DetectionError::CustomRuleFailed {
            rule: rule.name.clone(),
            reason,
        })?;
        match outcome {
            Some(context) if !context.is_unknown() && catalog.contains(&context) => {
                return Ok(Some(
                    StrategyMatch::new(context, rule.confidence).with("rule", rule.name.as_str()),
                ));
            }
            Some(context) if !context.is_unknown() => {
                tracing::debug!(
                    rule = %rule.name,
                    context = %context,
                    "custom rule named a tenant outside the catalog"
                );
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Dispatch a strategy slot to its function
pub fn run_strategy(
    kind: StrategyKind,
    signals: &RuntimeSignals,
    rules: &DetectionRules,
    catalog: &TenantCatalog,
) -> DetectionResultOf<Option<StrategyMatch>> {
    match kind {
        StrategyKind::Environment => detect_from_environment(signals, rules, catalog),
        StrategyKind::Header => detect_from_header(signals, rules, catalog),
        StrategyKind::Domain => detect_from_domain(signals, rules, catalog),
        StrategyKind::Port => detect_from_port(signals, rules, catalog),
        StrategyKind::Custom => detect_from_custom_rules(signals, rules, catalog),
    }
}
