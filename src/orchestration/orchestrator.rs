//! # Orchestrator
//!
//! Composes detection, discovery, resolution, loading and merging behind
//! `initialize` / `resolve_for_request` / `reload`.
//!
//! ## Snapshots
//!
//! Every successful run produces an immutable [`OrchestrationResult`]. The
//! primary snapshot (from `initialize`/`reload`) sits behind an atomic
//! pointer and is swapped only after the whole pipeline succeeded, so a failed
//! run leaves the previous snapshot serving. Results for other tenants
//! resolved on the request path are kept per tenant until the primary
//! snapshot is replaced, the registry moves on or the merge TTL lapses.
//!
//! ```text
//! signals ─▶ Detecting ─▶ Discovering ─▶ Resolving ─▶ Loading ─▶ ConfiguringMerge ─▶ Ready
//!               │              │             │           │              │
//!               └──────────────┴─────────────┴───────────┴──────────────┴─▶ Error
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tenancy_core::config::{OrchestratorConfig, TenantProfile};
//! use tenancy_core::context::RuntimeSignals;
//! use tenancy_core::orchestration::Orchestrator;
//! use tenancy_core::registry::PluginManifest;
//!
//! # tokio_test::block_on(async {
//! let config = OrchestratorConfig::default().with_tenant("latinos", TenantProfile::new(["community"]));
//! let orchestrator = Orchestrator::builder(config)
//!     .with_manifests(vec![
//!         PluginManifest::new("auth", "1.0"),
//!         PluginManifest::new("community", "1.0").depends_on(["auth"]),
//!     ])
//!     .build()
//!     .unwrap();
//!
//! let signals = RuntimeSignals::new().with_env("BUSINESS_CONTEXT", "latinos");
//! let result = orchestrator.initialize(&signals).await.unwrap();
//! assert_eq!(result.plugin_order, ["auth", "community"]);
//! # });
//! ```

use arc_swap::ArcSwapOption;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error_classifier::{ErrorClassifier, StandardErrorClassifier};
use super::errors::{ErrorKind, OrchestrationError, OrchestratorResult, StageError};
use super::types::{OrchestrationResult, StageTiming};
use crate::config::{OrchestratorConfig, TenantProfile};
use crate::constants::events;
use crate::context::{BusinessContext, ContextDetector, CustomRule, DetectionResult, RuntimeSignals};
use crate::loader::{FactoryRegistry, LoadedPluginSet, PluginFactory, PluginLoadStatus, PluginLoader};
use crate::logging::{fields, log_error, log_stage_transition, LogLevel, OrchestrationLogger, TracingLogger};
use crate::merge::{CacheOutcome, ConfigCacheKey, ConfigFragment, ConfigurationManager};
use crate::registry::{PluginManifest, PluginRegistry, RegistrySnapshot};
use crate::resolution::DependencyResolver;
use crate::state_machine::{
    OrchestrationEvent, OrchestrationState, OrchestrationStateMachine, StageFailure,
    StateTransition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Initialize,
    Request,
    Reload,
}

impl RunMode {
    fn publishes_primary(self) -> bool {
        !matches!(self, Self::Request)
    }

    fn refreshes_config(self) -> bool {
        matches!(self, Self::Reload)
    }
}

/// Per-run bookkeeping; never shared between runs
struct RunState {
    id: Uuid,
    machine: OrchestrationStateMachine,
    timings: Vec<StageTiming>,
    warnings: Vec<String>,
    tenant: Option<String>,
}

impl RunState {
    fn finish_stage(&mut self, stage: OrchestrationState, started: Instant) {
        self.timings.push(StageTiming {
            stage,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
    }
}

pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    factories: Arc<FactoryRegistry>,
    logger: Arc<dyn OrchestrationLogger>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    custom_rules: Vec<CustomRule>,
    manifests: Vec<PluginManifest>,
}

impl OrchestratorBuilder {
    pub fn with_factories(mut self, factories: Arc<FactoryRegistry>) -> Self {
        self.factories = factories;
        self
    }

    pub fn with_factory(self, plugin_id: impl Into<String>, factory: Arc<dyn PluginFactory>) -> Self {
        self.factories.register(plugin_id, factory);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn OrchestrationLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_custom_rule(mut self, rule: CustomRule) -> Self {
        self.custom_rules.push(rule);
        self
    }

    /// Manifests registered in code, published before any discovery
    pub fn with_manifests(mut self, manifests: Vec<PluginManifest>) -> Self {
        self.manifests.extend(manifests);
        self
    }

    pub fn build(self) -> OrchestratorResult<Orchestrator> {
        let classifier = self.classifier.unwrap_or_else(|| {
            Arc::new(StandardErrorClassifier::new(self.config.loader.timeouts_fatal))
        });
        let setup_error = |error: StageError| {
            let classification = classifier.classify_error(&error);
            OrchestrationError::new(
                OrchestrationState::Uninitialized,
                classification.kind,
                true,
                &error,
            )
        };

        self.config
            .validate()
            .map_err(|error| setup_error(error.into()))?;

        let detector = ContextDetector::new(&self.config.detection, self.config.tenant_catalog())
            .map_err(|error| setup_error(error.into()))?;
        for rule in self.custom_rules {
            detector
                .add_custom_rule(rule)
                .map_err(|error| setup_error(error.into()))?;
        }

        let registry = PluginRegistry::new(self.config.plugins.search_paths.clone());
        if !self.manifests.is_empty() {
            registry
                .register_manifests(self.manifests.clone())
                .map_err(|error| setup_error(error.into()))?;
        }

        let loader = PluginLoader::new(self.config.loader.clone(), self.factories.clone());
        let merger = ConfigurationManager::new(
            self.config.merge.strategy,
            self.config.merge.schema.clone(),
            self.config.merge.cache_ttl(),
        );

        info!(
            tenants = self.config.tenants.len(),
            fallback = %self.config.detection.fallback_context,
            classifier = classifier.classifier_name(),
            "orchestrator built"
        );

        Ok(Orchestrator {
            config: self.config,
            detector,
            registry,
            resolver: DependencyResolver::new(),
            loader,
            merger,
            factories: self.factories,
            code_manifests: self.manifests,
            classifier,
            logger: self.logger,
            published: ArcSwapOption::empty(),
            tenant_snapshots: DashMap::new(),
            last_run: Mutex::new(OrchestrationStateMachine::new()),
        })
    }
}

/// The orchestration facade consumed by the host framework
pub struct Orchestrator {
    config: OrchestratorConfig,
    detector: ContextDetector,
    registry: PluginRegistry,
    resolver: DependencyResolver,
    loader: PluginLoader,
    merger: ConfigurationManager,
    factories: Arc<FactoryRegistry>,
    /// Registered in code; kept alongside every rediscovered candidate
    code_manifests: Vec<PluginManifest>,
    classifier: Arc<dyn ErrorClassifier>,
    logger: Arc<dyn OrchestrationLogger>,
    published: ArcSwapOption<OrchestrationResult>,
    tenant_snapshots: DashMap<BusinessContext, Arc<OrchestrationResult>>,
    /// State machine of the most recently finished run
    last_run: Mutex<OrchestrationStateMachine>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("tenant_snapshots", &self.tenant_snapshots.len())
            .field("registry_generation", &self.registry.snapshot().generation())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            factories: Arc::new(FactoryRegistry::new()),
            logger: Arc::new(TracingLogger),
            classifier: None,
            custom_rules: Vec::new(),
            manifests: Vec::new(),
        }
    }

    pub fn new(config: OrchestratorConfig) -> OrchestratorResult<Self> {
        Self::builder(config).build()
    }

    /// Run the full pipeline and publish the result as the primary snapshot
    pub async fn initialize(&self, signals: &RuntimeSignals) -> OrchestratorResult<Arc<OrchestrationResult>> {
        self.run(signals, RunMode::Initialize, None).await
    }

    /// Rediscover manifests and recompute configuration, then swap the primary snapshot
    ///
    /// On failure the previously published snapshot keeps serving.
    pub async fn reload(&self, signals: &RuntimeSignals) -> OrchestratorResult<Arc<OrchestrationResult>> {
        self.run(signals, RunMode::Reload, None).await
    }

    /// Cheap per-request path
    ///
    /// Returns the primary snapshot when detection lands on its tenant, a warm
    /// per-tenant snapshot when one exists, and otherwise resolves the tenant
    /// against the current registry snapshot.
    pub async fn resolve_for_request(
        &self,
        signals: &RuntimeSignals,
    ) -> OrchestratorResult<Arc<OrchestrationResult>> {
        let detection = self.detector.detect(signals);

        if let Some(published) = self.published.load_full() {
            if published.tenant() == &detection.context {
                debug!(tenant = %detection.context, "request served from published snapshot");
                return Ok(published);
            }
        }

        let warm = self
            .tenant_snapshots
            .get(&detection.context)
            .map(|entry| entry.value().clone());
        if let Some(snapshot) = warm {
            if self.is_current(&snapshot) {
                debug!(tenant = %detection.context, "request served from tenant snapshot");
                return Ok(snapshot);
            }
            debug!(
                tenant = %detection.context,
                registry_generation = snapshot.registry_generation,
                "tenant snapshot outdated, resolving again"
            );
            self.tenant_snapshots
                .remove_if(&detection.context, |_, held| Arc::ptr_eq(held, &snapshot));
        }

        self.run(signals, RunMode::Request, Some(detection)).await
    }

    pub fn published(&self) -> Option<Arc<OrchestrationResult>> {
        self.published.load_full()
    }

    pub fn tenant_snapshot(&self, context: &BusinessContext) -> Option<Arc<OrchestrationResult>> {
        self.tenant_snapshots
            .get(context)
            .map(|entry| entry.value().clone())
    }

    /// A warm tenant snapshot is usable while it was built against the
    /// published registry and its configuration is within the merge TTL
    fn is_current(&self, snapshot: &OrchestrationResult) -> bool {
        if snapshot.registry_generation != self.registry.snapshot().generation() {
            return false;
        }
        let age = (Utc::now() - snapshot.completed_at)
            .to_std()
            .unwrap_or_default();
        age < self.merger.cache().ttl()
    }

    /// Drop a tenant's warm snapshot and cached configurations
    ///
    /// The primary snapshot is left alone; `reload` replaces it.
    pub fn invalidate_tenant(&self, context: &BusinessContext) -> usize {
        self.tenant_snapshots.remove(context);
        self.merger.cache().invalidate_tenant(context)
    }

    /// State of the most recently finished run
    pub fn state(&self) -> OrchestrationState {
        self.last_run.lock().current()
    }

    pub fn history(&self) -> Vec<StateTransition> {
        self.last_run.lock().history().to_vec()
    }

    pub fn last_failure(&self) -> Option<StageFailure> {
        self.last_run.lock().last_failure().cloned()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn detector(&self) -> &ContextDetector {
        &self.detector
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn merger(&self) -> &ConfigurationManager {
        &self.merger
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn factories(&self) -> &Arc<FactoryRegistry> {
        &self.factories
    }

    async fn run(
        &self,
        signals: &RuntimeSignals,
        mode: RunMode,
        detection: Option<DetectionResult>,
    ) -> OrchestratorResult<Arc<OrchestrationResult>> {
        let mut run = RunState {
            id: Uuid::new_v4(),
            machine: self.last_run.lock().clone(),
            timings: Vec::new(),
            warnings: Vec::new(),
            tenant: None,
        };
        let entry = if run.machine.current() == OrchestrationState::Ready {
            OrchestrationEvent::Reload
        } else {
            OrchestrationEvent::Start
        };
        self.advance(&mut run, entry)?;

        // Detecting
        let started = Instant::now();
        let detection = detection.unwrap_or_else(|| self.detector.detect(signals));
        run.tenant = Some(detection.context.to_string());
        self.logger.log(
            LogLevel::Info,
            events::CONTEXT_DETECTED,
            &fields([
                ("run_id", run.id.to_string()),
                ("context", detection.context.to_string()),
                ("method", detection.method.to_string()),
                ("confidence", format!("{:.2}", detection.confidence)),
            ]),
        );
        if detection.is_fallback() {
            let message = format!(
                "{}: no strategy matched, using fallback context '{}' ({:.2})",
                ErrorKind::DetectionAmbiguity,
                detection.context,
                detection.confidence
            );
            warn!(run_id = %run.id, "{message}");
            run.warnings.push(message);
        }
        run.finish_stage(OrchestrationState::Detecting, started);
        self.advance(&mut run, OrchestrationEvent::ContextDetected)?;

        // Discovering
        let started = Instant::now();
        let (snapshot, fresh) = match self.discover(mode) {
            Ok(discovered) => discovered,
            Err(error) => return Err(self.fail(run, error)),
        };
        run.finish_stage(OrchestrationState::Discovering, started);
        self.advance(&mut run, OrchestrationEvent::PluginsDiscovered)?;

        // Resolving
        let started = Instant::now();
        let profile = self.config.tenant_profile(&detection.context);
        let requested = profile
            .map(TenantProfile::requested_plugins)
            .unwrap_or_default();
        let ordered = match self.resolver.resolve(&requested, &snapshot) {
            Ok(ordered) => ordered,
            Err(error) => return Err(self.fail(run, error.into())),
        };
        run.finish_stage(OrchestrationState::Resolving, started);
        self.advance(&mut run, OrchestrationEvent::DependenciesResolved)?;

        // Loading
        let started = Instant::now();
        let strategy = profile
            .and_then(|profile| profile.loading_strategy)
            .unwrap_or(self.config.loader.default_strategy);
        let required = profile.map(TenantProfile::required_set).unwrap_or_default();
        let plugins = match self
            .loader
            .load(&ordered, strategy, &self.config.security, &required)
            .await
        {
            Ok(plugins) => Arc::new(plugins),
            Err(error) => return Err(self.fail(run, error.into())),
        };
        self.log_load_report(&run, &plugins);
        run.warnings.extend(plugins.report().warnings.iter().cloned());
        run.finish_stage(OrchestrationState::Loading, started);
        self.advance(&mut run, OrchestrationEvent::PluginsLoaded)?;

        // ConfiguringMerge
        let started = Instant::now();
        let plugin_order = plugins.plugin_order();
        let key = ConfigCacheKey::new(detection.context.clone(), plugin_order.iter());
        let merge_strategy = profile
            .and_then(|profile| profile.merge_strategy)
            .unwrap_or(self.config.merge.strategy);
        let fragments = self.fragments(&detection.context, profile, &plugins);
        let lookup = if mode.refreshes_config() {
            self.merger.refresh(&key, fragments, merge_strategy).await
        } else {
            self.merger.merge_cached(&key, fragments, merge_strategy).await
        };
        let lookup = match lookup {
            Ok(lookup) => lookup,
            Err(error) => return Err(self.fail(run, error.into())),
        };
        self.log_cache_outcome(&mut run, &key, lookup.outcome);
        run.finish_stage(OrchestrationState::ConfiguringMerge, started);
        self.advance(&mut run, OrchestrationEvent::ConfigMerged)?;

        let result = Arc::new(OrchestrationResult {
            run_id: run.id,
            context: detection,
            plugin_order,
            merged_config: lookup.config,
            stage_timings: run.timings.clone(),
            warnings: run.warnings.clone(),
            load_report: plugins.report().clone(),
            cache_outcome: lookup.outcome,
            registry_generation: snapshot.generation(),
            completed_at: Utc::now(),
            plugins,
        });

        // publish only once every stage has succeeded
        let published_generation = if fresh {
            self.registry.publish(snapshot).generation()
        } else {
            self.registry.snapshot().generation()
        };
        if mode.publishes_primary() {
            self.published.store(Some(result.clone()));
            // warm snapshots of other tenants end with the snapshot they were served beside
            self.tenant_snapshots.clear();
            if fresh {
                let dropped = self.merger.cache().invalidate_except(&key);
                debug!(dropped, "configurations computed against the previous registry dropped");
            }
        }
        if result.registry_generation >= published_generation {
            self.tenant_snapshots
                .insert(result.tenant().clone(), result.clone());
        }
        *self.last_run.lock() = run.machine;

        self.logger.log(
            LogLevel::Info,
            events::SNAPSHOT_PUBLISHED,
            &fields([
                ("run_id", result.run_id.to_string()),
                ("tenant", result.tenant().to_string()),
                ("plugins", result.plugin_order.join(",")),
                ("primary", mode.publishes_primary().to_string()),
                ("duration_ms", result.total_duration_ms().to_string()),
            ]),
        );
        info!(
            run_id = %result.run_id,
            tenant = %result.tenant(),
            plugins = result.plugin_order.len(),
            warnings = result.warnings.len(),
            "orchestration ready"
        );

        Ok(result)
    }

    /// Registry snapshot for this run, and whether it is a fresh, unpublished candidate
    fn discover(&self, mode: RunMode) -> Result<(Arc<RegistrySnapshot>, bool), StageError> {
        let current = self.registry.snapshot();
        let has_search_paths = !self.registry.search_paths().is_empty();
        let rediscover =
            has_search_paths && (mode != RunMode::Request || current.generation() == 0);

        if !rediscover {
            return Ok((current, false));
        }
        let mut candidate = self.registry.discover()?;
        if !self.code_manifests.is_empty() {
            let combined = candidate
                .manifests()
                .iter()
                .map(|manifest| (**manifest).clone())
                .chain(self.code_manifests.iter().cloned())
                .collect();
            candidate = self.registry.build_snapshot(combined)?;
        }
        debug!(
            generation = candidate.generation(),
            manifests = candidate.len(),
            "registry candidate discovered"
        );
        Ok((Arc::new(candidate), true))
    }

    fn fragments(
        &self,
        context: &BusinessContext,
        profile: Option<&TenantProfile>,
        plugins: &LoadedPluginSet,
    ) -> Vec<ConfigFragment> {
        let mut fragments = vec![ConfigFragment::base("base", self.config.base_config.clone())];
        if let Some(profile) = profile {
            fragments.push(
                ConfigFragment::tenant(format!("tenant:{context}"), profile.config.clone())
                    .with_append_keys(profile.append_keys.iter().cloned()),
            );
        }
        for manifest in plugins.manifests() {
            if let Some(config) = &manifest.config {
                fragments.push(
                    ConfigFragment::plugin(format!("plugin:{}", manifest.id), config.clone())
                        .with_append_keys(manifest.append_keys.iter().cloned()),
                );
            }
        }
        fragments
    }

    fn advance(&self, run: &mut RunState, event: OrchestrationEvent) -> OrchestratorResult<()> {
        let from = run.machine.current();
        match run.machine.transition(event) {
            Ok(to) => {
                let tenant = run.tenant.as_deref();
                log_stage_transition(&run.id.to_string(), &from.to_string(), &to.to_string(), tenant);
                self.logger.log(
                    LogLevel::Info,
                    events::STAGE_TRANSITION,
                    &fields([
                        ("run_id", run.id.to_string()),
                        ("from", from.to_string()),
                        ("to", to.to_string()),
                        ("tenant", tenant.unwrap_or("-").to_string()),
                    ]),
                );
                Ok(())
            }
            Err(error) => {
                let error = StageError::from(error);
                let classification = self.classifier.classify_error(&error);
                log_error("orchestrator", "advance", &error.to_string(), run.tenant.as_deref());
                let failure = OrchestrationError::new(from, classification.kind, true, &error);
                Err(match &run.tenant {
                    Some(tenant) => failure.with_tenant(tenant.clone()),
                    None => failure,
                })
            }
        }
    }

    /// Record a stage failure and turn it into the facade error
    ///
    /// Nothing is published; the last good snapshot stays in place.
    fn fail(&self, mut run: RunState, error: StageError) -> OrchestrationError {
        let stage = run.machine.current();
        let classification = self.classifier.classify_error(&error);
        let message = error.to_string();

        if let Err(transition_error) = run
            .machine
            .transition(OrchestrationEvent::fail(stage, message.clone()))
        {
            warn!(error = %transition_error, "could not record failure transition");
        }

        log_error("orchestrator", &stage.to_string(), &message, run.tenant.as_deref());
        self.logger.log(
            LogLevel::Error,
            events::RUN_FAILED,
            &fields([
                ("run_id", run.id.to_string()),
                ("stage", stage.to_string()),
                ("kind", classification.kind.to_string()),
                ("code", classification.error_code.clone()),
                ("fatal", classification.fatal.to_string()),
                ("error", message),
                ("tenant", run.tenant.clone().unwrap_or_else(|| "-".to_string())),
            ]),
        );

        let failure = OrchestrationError::new(stage, classification.kind, classification.fatal, &error);
        let failure = match run.tenant.take() {
            Some(tenant) => failure.with_tenant(tenant),
            None => failure,
        };
        *self.last_run.lock() = run.machine;
        failure
    }

    fn log_load_report(&self, run: &RunState, plugins: &LoadedPluginSet) {
        let report = plugins.report();
        for outcome in &report.outcomes {
            let (level, event) = if outcome.status.is_excluded() {
                (LogLevel::Warn, events::PLUGIN_EXCLUDED)
            } else {
                (LogLevel::Info, events::PLUGIN_LOADED)
            };
            let mut event_fields = fields([
                ("run_id", run.id.to_string()),
                ("plugin", outcome.plugin.clone()),
                ("status", outcome.status.to_string()),
                ("strategy", outcome.strategy.to_string()),
            ]);
            if let Some(duration_ms) = outcome.duration_ms {
                event_fields.insert("duration_ms".to_string(), duration_ms.to_string());
            }
            if let Some(detail) = &outcome.detail {
                event_fields.insert("detail".to_string(), detail.clone());
            }
            if outcome.status == PluginLoadStatus::Rejected {
                event_fields.insert("kind".to_string(), ErrorKind::SecurityRejection.to_string());
            }
            self.logger.log(level, event, &event_fields);
        }

        if report.budget_exceeded {
            self.logger.log(
                LogLevel::Warn,
                events::BUDGET_EXCEEDED,
                &fields([
                    ("run_id", run.id.to_string()),
                    ("elapsed_ms", report.elapsed_ms.to_string()),
                    ("budget_ms", self.config.loader.performance_budget_ms.to_string()),
                ]),
            );
        }
    }

    fn log_cache_outcome(&self, run: &mut RunState, key: &ConfigCacheKey, outcome: CacheOutcome) {
        let (level, event) = match outcome {
            CacheOutcome::Hit | CacheOutcome::Coalesced => (LogLevel::Debug, events::CACHE_HIT),
            CacheOutcome::Stale => (LogLevel::Warn, events::CACHE_HIT),
            CacheOutcome::Miss | CacheOutcome::Refreshed => (LogLevel::Debug, events::CACHE_MISS),
        };
        if outcome == CacheOutcome::Stale {
            run.warnings.push(format!(
                "{}: served expired configuration for {key} while it recomputes",
                ErrorKind::CacheStale
            ));
        }
        self.logger.log(
            level,
            event,
            &fields([
                ("run_id", run.id.to_string()),
                ("key", key.to_string()),
                ("fingerprint", key.fingerprint()),
                ("outcome", outcome.to_string()),
            ]),
        );
    }
}
