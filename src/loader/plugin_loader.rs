//! # Plugin Loader
//!
//! Instantiates resolved plugins under a loading strategy, a per-plugin
//! timeout, a global performance budget and a security policy.
//!
//! ## Loading model
//!
//! - **eager** plugins are instantiated during `load`. Each one starts as
//!   soon as its own dependencies are loaded, so plugins without a shared
//!   dependency run concurrently and a slow plugin only holds up its dependents.
//! - **lazy** plugins are instantiated on first access to one of their
//!   capabilities, dependencies first.
//! - **on-demand** plugins are instantiated only by an explicit request.
//!
//! Any eager plugin's dependencies are promoted to eager. A plugin that is
//! excluded (security rejection, timeout, failure) takes every plugin that
//! depends on it out of the result with it.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::plugin::{FactoryRegistry, PluginInitContext, PluginInitError, PluginInstance};
use super::security::{SecurityError, SecurityPolicy};
use crate::constants::defaults;
use crate::logging::log_plugin_operation;
use crate::registry::{Capability, LoadingStrategy, PluginManifest};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Plugin '{plugin}' did not instantiate within {timeout_ms}ms")]
    PluginTimeout { plugin: String, timeout_ms: u64 },

    #[error("Plugin '{plugin}' rejected by security policy: {source}")]
    SecurityRejection {
        plugin: String,
        #[source]
        source: SecurityError,
    },

    #[error("Plugin '{plugin}' failed to instantiate: {source}")]
    PluginFailed {
        plugin: String,
        #[source]
        source: PluginInitError,
    },

    #[error("Required plugin '{plugin}' was excluded: {reason}")]
    RequiredPluginExcluded { plugin: String, reason: String },

    #[error("Plugin '{plugin}' is not available: {reason}")]
    NotAvailable { plugin: String, reason: String },
}

pub type LoadResult<T> = Result<T, LoadError>;

/// Loader settings, read from the `loader` config section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub default_strategy: LoadingStrategy,
    pub plugin_timeout_ms: u64,
    pub performance_budget_ms: u64,
    pub timeouts_fatal: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            default_strategy: LoadingStrategy::Eager,
            plugin_timeout_ms: defaults::PLUGIN_TIMEOUT_MS,
            performance_budget_ms: defaults::PERFORMANCE_BUDGET_MS,
            timeouts_fatal: false,
        }
    }
}

impl LoaderSettings {
    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.plugin_timeout_ms)
    }

    pub fn performance_budget(&self) -> Duration {
        Duration::from_millis(self.performance_budget_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginLoadStatus {
    Loaded,
    Deferred,
    TimedOut,
    Rejected,
    Failed,
    DependencyExcluded,
}

impl PluginLoadStatus {
    pub fn is_excluded(self) -> bool {
        !matches!(self, Self::Loaded | Self::Deferred)
    }
}

impl fmt::Display for PluginLoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "loaded",
            Self::Deferred => "deferred",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::DependencyExcluded => "dependency_excluded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginOutcome {
    pub plugin: String,
    pub status: PluginLoadStatus,
    pub strategy: LoadingStrategy,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

/// What happened during one load phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// One entry per resolved plugin, in resolved order
    pub outcomes: Vec<PluginOutcome>,
    /// Recoverable problems (soft timeouts, contained failures, budget overrun)
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
    pub budget_exceeded: bool,
}

impl LoadReport {
    pub fn outcome(&self, plugin: &str) -> Option<&PluginOutcome> {
        self.outcomes.iter().find(|outcome| outcome.plugin == plugin)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &PluginOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status.is_excluded())
    }
}

enum Attempt {
    Ready(Arc<dyn PluginInstance>),
    TimedOut,
    Failed(PluginInitError),
}

/// Runs one plugin instantiation under the timeout and sandbox policy
#[derive(Clone)]
struct Instantiator {
    factories: Arc<FactoryRegistry>,
    policy: Arc<SecurityPolicy>,
    timeout: Duration,
}

impl Instantiator {
    async fn attempt(&self, manifest: Arc<PluginManifest>) -> (Attempt, Duration) {
        let started = Instant::now();
        let context = PluginInitContext {
            capabilities: self.policy.granted_capabilities(&manifest),
            sandboxed: self.policy.sandbox,
            manifest,
        };

        let attempt = if self.policy.sandbox {
            // own task: a panic or error stays inside this plugin's load step
            let factories = self.factories.clone();
            let mut handle = tokio::spawn(async move { factories.instantiate(context).await });
            match timeout(self.timeout, &mut handle).await {
                Ok(Ok(Ok(instance))) => Attempt::Ready(instance),
                Ok(Ok(Err(error))) => Attempt::Failed(error),
                Ok(Err(join_error)) => Attempt::Failed(PluginInitError::recoverable(format!(
                    "sandboxed instantiation aborted: {join_error}"
                ))),
                Err(_) => {
                    handle.abort();
                    Attempt::TimedOut
                }
            }
        } else {
            match timeout(self.timeout, self.factories.instantiate(context)).await {
                Ok(Ok(instance)) => Attempt::Ready(instance),
                Ok(Err(error)) => Attempt::Failed(error),
                Err(_) => Attempt::TimedOut,
            }
        };

        (attempt, started.elapsed())
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

struct PluginSlot {
    manifest: Arc<PluginManifest>,
    strategy: LoadingStrategy,
    instance: OnceCell<Arc<dyn PluginInstance>>,
}

/// The plugins that survived a load, instantiated or waiting to be
pub struct LoadedPluginSet {
    slots: Vec<PluginSlot>,
    index: HashMap<String, usize>,
    instantiator: Instantiator,
    report: LoadReport,
}

impl fmt::Debug for LoadedPluginSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPluginSet")
            .field("plugin_order", &self.plugin_order())
            .field("instantiated", &self.instantiated_ids())
            .finish_non_exhaustive()
    }
}

impl LoadedPluginSet {
    /// Ids of every non-excluded plugin, in resolved order
    pub fn plugin_order(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| slot.manifest.id.clone())
            .collect()
    }

    pub fn manifests(&self) -> Vec<Arc<PluginManifest>> {
        self.slots.iter().map(|slot| slot.manifest.clone()).collect()
    }

    pub fn instantiated_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|slot| slot.instance.initialized())
            .map(|slot| slot.manifest.id.clone())
            .collect()
    }

    pub fn strategy_of(&self, plugin: &str) -> Option<LoadingStrategy> {
        self.index
            .get(plugin)
            .map(|position| self.slots[*position].strategy)
    }

    /// An already instantiated plugin
    pub fn get(&self, plugin: &str) -> Option<Arc<dyn PluginInstance>> {
        self.index
            .get(plugin)
            .and_then(|position| self.slots[*position].instance.get().cloned())
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Explicitly instantiate a plugin (and its dependencies) if not done yet
    pub async fn instantiate(&self, plugin: &str) -> LoadResult<Arc<dyn PluginInstance>> {
        let Some(&position) = self.index.get(plugin) else {
            let reason = self
                .report
                .outcome(plugin)
                .map(|outcome| {
                    format!(
                        "excluded ({}){}",
                        outcome.status,
                        outcome
                            .detail
                            .as_deref()
                            .map(|detail| format!(": {detail}"))
                            .unwrap_or_default()
                    )
                })
                .unwrap_or_else(|| "not part of this plugin set".to_string());
            return Err(LoadError::NotAvailable {
                plugin: plugin.to_string(),
                reason,
            });
        };

        for dependency in self.dependency_chain(position) {
            self.ensure(dependency).await?;
        }
        self.ensure(position).await
    }

    /// Instantiate every lazy or eager plugin granted `capability` and return them
    ///
    /// On-demand plugins are never touched by capability access.
    pub async fn access_capability(
        &self,
        capability: Capability,
    ) -> LoadResult<Vec<Arc<dyn PluginInstance>>> {
        let mut instances = Vec::new();
        for slot in &self.slots {
            if slot.strategy == LoadingStrategy::OnDemand {
                continue;
            }
            let granted = self.instantiator.policy.granted_capabilities(&slot.manifest);
            if granted.contains(&capability) {
                instances.push(self.instantiate(&slot.manifest.id).await?);
            }
        }
        Ok(instances)
    }

    /// Positions of a plugin's transitive dependencies within the set, in order
    fn dependency_chain(&self, position: usize) -> Vec<usize> {
        let mut chain = BTreeSet::new();
        let mut stack = vec![position];
        while let Some(current) = stack.pop() {
            for dependency in &self.slots[current].manifest.depends_on {
                if let Some(&dependency_position) = self.index.get(dependency) {
                    if chain.insert(dependency_position) {
                        stack.push(dependency_position);
                    }
                }
            }
        }
        // slots are in resolved order, so ascending positions respect dependencies
        chain.into_iter().collect()
    }

    async fn ensure(&self, position: usize) -> LoadResult<Arc<dyn PluginInstance>> {
        let slot = &self.slots[position];
        slot.instance
            .get_or_try_init(|| async {
                let (attempt, elapsed) = self.instantiator.attempt(slot.manifest.clone()).await;
                let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                match attempt {
                    Attempt::Ready(instance) => {
                        log_plugin_operation(
                            "instantiate",
                            &slot.manifest.id,
                            "loaded",
                            Some(elapsed_ms),
                            Some(&slot.strategy.to_string()),
                        );
                        Ok(instance)
                    }
                    Attempt::TimedOut => Err(LoadError::PluginTimeout {
                        plugin: slot.manifest.id.clone(),
                        timeout_ms: self.instantiator.timeout_ms(),
                    }),
                    Attempt::Failed(source) => Err(LoadError::PluginFailed {
                        plugin: slot.manifest.id.clone(),
                        source,
                    }),
                }
            })
            .await
            .cloned()
    }
}

/// Plugin loader
#[derive(Debug)]
pub struct PluginLoader {
    settings: LoaderSettings,
    factories: Arc<FactoryRegistry>,
}

impl PluginLoader {
    pub fn new(settings: LoaderSettings, factories: Arc<FactoryRegistry>) -> Self {
        Self {
            settings,
            factories,
        }
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    pub fn factories(&self) -> &Arc<FactoryRegistry> {
        &self.factories
    }

    /// Load resolved manifests
    ///
    /// Fatal outcomes (a non-sandboxed plugin's fatal failure, a timeout when
    /// timeouts are fatal, an excluded required plugin) abort with an error;
    /// everything else is recorded in the returned set's [`LoadReport`].
    pub async fn load(
        &self,
        ordered: &[Arc<PluginManifest>],
        default_strategy: LoadingStrategy,
        policy: &SecurityPolicy,
        required: &BTreeSet<String>,
    ) -> LoadResult<LoadedPluginSet> {
        let started = Instant::now();
        let budget = self.settings.performance_budget();
        let instantiator = Instantiator {
            factories: self.factories.clone(),
            policy: Arc::new(policy.clone()),
            timeout: self.settings.plugin_timeout(),
        };

        let strategies = effective_strategies(ordered, default_strategy);
        let mut report = LoadReport::default();
        let mut excluded: BTreeMap<String, String> = BTreeMap::new();

        // security pass, in resolved order so exclusions reach dependents
        for manifest in ordered {
            if let Some(dependency) = first_excluded_dependency(manifest, &excluded) {
                exclude(
                    &mut excluded,
                    &mut report,
                    manifest,
                    strategies[manifest.id.as_str()],
                    PluginLoadStatus::DependencyExcluded,
                    format!("dependency '{dependency}' excluded"),
                );
                continue;
            }
            if let Err(source) = policy.verify(manifest) {
                let error = LoadError::SecurityRejection {
                    plugin: manifest.id.clone(),
                    source,
                };
                warn!(plugin = %manifest.id, error = %error, "plugin rejected by security policy");
                log_plugin_operation("verify", &manifest.id, "rejected", None, Some(&error.to_string()));
                exclude(
                    &mut excluded,
                    &mut report,
                    manifest,
                    strategies[manifest.id.as_str()],
                    PluginLoadStatus::Rejected,
                    error.to_string(),
                );
            }
        }

        let eager: Vec<Arc<PluginManifest>> = ordered
            .iter()
            .filter(|manifest| {
                !excluded.contains_key(&manifest.id)
                    && strategies[manifest.id.as_str()] == LoadingStrategy::Eager
            })
            .cloned()
            .collect();

        let mut instances: HashMap<String, Arc<dyn PluginInstance>> = HashMap::new();
        let mut pending = eager;
        let mut in_flight = FuturesUnordered::new();
        let instantiator_ref = &instantiator;
        loop {
            // start every plugin whose own dependencies are loaded
            let mut position = 0;
            while position < pending.len() {
                let manifest = &pending[position];
                if let Some(dependency) = first_excluded_dependency(manifest, &excluded) {
                    let reason = format!("dependency '{dependency}' excluded");
                    let manifest = pending.remove(position);
                    exclude(
                        &mut excluded,
                        &mut report,
                        &manifest,
                        LoadingStrategy::Eager,
                        PluginLoadStatus::DependencyExcluded,
                        reason,
                    );
                    continue;
                }
                let ready = manifest
                    .depends_on
                    .iter()
                    .all(|dependency| instances.contains_key(dependency));
                if !ready {
                    position += 1;
                    continue;
                }
                let manifest = pending.remove(position);
                in_flight.push(async move {
                    let (attempt, elapsed) = instantiator_ref.attempt(manifest.clone()).await;
                    (manifest, attempt, elapsed)
                });
            }

            let Some((manifest, attempt, elapsed)) = in_flight.next().await else {
                break;
            };
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            match attempt {
                Attempt::Ready(instance) => {
                    log_plugin_operation("instantiate", &manifest.id, "loaded", Some(elapsed_ms), None);
                    instances.insert(manifest.id.clone(), instance);
                    report.outcomes.push(PluginOutcome {
                        plugin: manifest.id.clone(),
                        status: PluginLoadStatus::Loaded,
                        strategy: LoadingStrategy::Eager,
                        duration_ms: Some(elapsed_ms),
                        detail: None,
                    });
                }
                Attempt::TimedOut => {
                    let error = LoadError::PluginTimeout {
                        plugin: manifest.id.clone(),
                        timeout_ms: instantiator.timeout_ms(),
                    };
                    if self.settings.timeouts_fatal {
                        log_plugin_operation("instantiate", &manifest.id, "timed_out", Some(elapsed_ms), Some("fatal"));
                        return Err(error);
                    }
                    warn!(plugin = %manifest.id, error = %error, "plugin timed out, continuing without it");
                    log_plugin_operation("instantiate", &manifest.id, "timed_out", Some(elapsed_ms), None);
                    report.warnings.push(error.to_string());
                    exclude(
                        &mut excluded,
                        &mut report,
                        &manifest,
                        LoadingStrategy::Eager,
                        PluginLoadStatus::TimedOut,
                        error.to_string(),
                    );
                }
                Attempt::Failed(source) => {
                    let fatal = source.fatal && !policy.sandbox;
                    let error = LoadError::PluginFailed {
                        plugin: manifest.id.clone(),
                        source,
                    };
                    if fatal {
                        log_plugin_operation("instantiate", &manifest.id, "failed", Some(elapsed_ms), Some("fatal"));
                        return Err(error);
                    }
                    warn!(plugin = %manifest.id, error = %error, "plugin failed, continuing without it");
                    log_plugin_operation("instantiate", &manifest.id, "failed", Some(elapsed_ms), Some(&error.to_string()));
                    report.warnings.push(error.to_string());
                    exclude(
                        &mut excluded,
                        &mut report,
                        &manifest,
                        LoadingStrategy::Eager,
                        PluginLoadStatus::Failed,
                        error.to_string(),
                    );
                }
            }

            check_budget(&mut report, started, budget);
        }
        drop(in_flight);
        if !pending.is_empty() {
            // unreachable for an acyclic, resolved input; left to instantiate lazily
            warn!(
                plugins = pending.len(),
                "eager plugins never became ready during load"
            );
        }

        // deferred plugins follow their dependencies out of the set
        for manifest in ordered {
            let strategy = strategies[manifest.id.as_str()];
            if excluded.contains_key(&manifest.id) || strategy == LoadingStrategy::Eager {
                continue;
            }
            match first_excluded_dependency(manifest, &excluded) {
                Some(dependency) => exclude(
                    &mut excluded,
                    &mut report,
                    manifest,
                    strategy,
                    PluginLoadStatus::DependencyExcluded,
                    format!("dependency '{dependency}' excluded"),
                ),
                None => report.outcomes.push(PluginOutcome {
                    plugin: manifest.id.clone(),
                    status: PluginLoadStatus::Deferred,
                    strategy,
                    duration_ms: None,
                    detail: None,
                }),
            }
        }

        for plugin in required {
            if let Some(reason) = excluded.get(plugin) {
                return Err(LoadError::RequiredPluginExcluded {
                    plugin: plugin.clone(),
                    reason: reason.clone(),
                });
            }
        }

        check_budget(&mut report, started, budget);
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let positions: HashMap<&str, usize> = ordered
            .iter()
            .enumerate()
            .map(|(position, manifest)| (manifest.id.as_str(), position))
            .collect();
        report
            .outcomes
            .sort_by_key(|outcome| positions.get(outcome.plugin.as_str()).copied());

        let slots: Vec<PluginSlot> = ordered
            .iter()
            .filter(|manifest| !excluded.contains_key(&manifest.id))
            .map(|manifest| PluginSlot {
                manifest: manifest.clone(),
                strategy: strategies[manifest.id.as_str()],
                instance: OnceCell::new_with(instances.remove(&manifest.id)),
            })
            .collect();
        let index = slots
            .iter()
            .enumerate()
            .map(|(position, slot)| (slot.manifest.id.clone(), position))
            .collect();

        info!(
            plugins = slots.len(),
            excluded = excluded.len(),
            elapsed_ms = report.elapsed_ms,
            budget_exceeded = report.budget_exceeded,
            "plugin load complete"
        );

        Ok(LoadedPluginSet {
            slots,
            index,
            instantiator,
            report,
        })
    }
}

/// Per-plugin strategy with every eager plugin's dependencies promoted to eager
fn effective_strategies(
    ordered: &[Arc<PluginManifest>],
    default_strategy: LoadingStrategy,
) -> HashMap<&str, LoadingStrategy> {
    let mut strategies: HashMap<&str, LoadingStrategy> = ordered
        .iter()
        .map(|manifest| {
            (
                manifest.id.as_str(),
                manifest.effective_strategy(default_strategy),
            )
        })
        .collect();

    // dependents come after dependencies, so a reverse pass is transitive
    for manifest in ordered.iter().rev() {
        if strategies.get(manifest.id.as_str()) == Some(&LoadingStrategy::Eager) {
            for dependency in &manifest.depends_on {
                if let Some(strategy) = strategies.get_mut(dependency.as_str()) {
                    if *strategy != LoadingStrategy::Eager {
                        debug!(plugin = %dependency, dependent = %manifest.id, "promoted to eager");
                        *strategy = LoadingStrategy::Eager;
                    }
                }
            }
        }
    }
    strategies
}

fn first_excluded_dependency<'a>(
    manifest: &'a PluginManifest,
    excluded: &BTreeMap<String, String>,
) -> Option<&'a str> {
    manifest
        .depends_on
        .iter()
        .find(|dependency| excluded.contains_key(dependency.as_str()))
        .map(String::as_str)
}

fn exclude(
    excluded: &mut BTreeMap<String, String>,
    report: &mut LoadReport,
    manifest: &PluginManifest,
    strategy: LoadingStrategy,
    status: PluginLoadStatus,
    reason: String,
) {
    debug!(plugin = %manifest.id, status = %status, reason = %reason, "plugin excluded");
    excluded.insert(manifest.id.clone(), reason.clone());
    report.outcomes.push(PluginOutcome {
        plugin: manifest.id.clone(),
        status,
        strategy,
        duration_ms: None,
        detail: Some(reason),
    });
}

fn check_budget(report: &mut LoadReport, started: Instant, budget: Duration) {
    let elapsed = started.elapsed();
    if !report.budget_exceeded && elapsed > budget {
        report.budget_exceeded = true;
        let message = format!(
            "plugin load exceeded performance budget: {}ms > {}ms",
            elapsed.as_millis(),
            budget.as_millis()
        );
        warn!(
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
            "{message}"
        );
        report.warnings.push(message);
    }
}
