//! # Tenancy Configuration Validator
//!
//! Command-line tool for checking an orchestrator configuration directory:
//! load and validate it, see which tenant a set of signals resolves to, and
//! dry-run the whole pipeline before deploying.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use tenancy_core::config::ConfigLoader;
use tenancy_core::context::RuntimeSignals;
use tenancy_core::orchestration::{OrchestrationResult, Orchestrator};
use tenancy_core::resolution::DependencyResolver;
use tenancy_core::{BusinessContext, OrchestratorConfig};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "tenancy-validator")]
#[command(about = "Validate multi-tenant orchestration configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration directory containing tenancy-config.yaml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Environment overlay to apply (development, test, production)
    #[arg(short, long)]
    environment: Option<String>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Args, Debug, Default)]
struct SignalArgs {
    /// Request domain, e.g. latinos.example.com
    #[arg(long)]
    domain: Option<String>,

    /// Listening port
    #[arg(long)]
    port: Option<u16>,

    /// Request header as NAME=VALUE (repeatable)
    #[arg(long = "header", value_parser = parse_pair)]
    headers: Vec<(String, String)>,

    /// Environment variable as NAME=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_pair)]
    env: Vec<(String, String)>,

    /// Include the validator's own process environment
    #[arg(long)]
    process_env: bool,
}

impl SignalArgs {
    fn to_signals(&self) -> RuntimeSignals {
        let mut signals = if self.process_env {
            RuntimeSignals::from_process_env()
        } else {
            RuntimeSignals::new()
        };
        if let Some(domain) = &self.domain {
            signals = signals.with_domain(domain.clone());
        }
        if let Some(port) = self.port {
            signals = signals.with_port(port);
        }
        for (name, value) in &self.headers {
            signals = signals.with_header(name, value.clone());
        }
        for (name, value) in &self.env {
            signals = signals.with_env(name.clone(), value.clone());
        }
        signals
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration
    Validate,

    /// Show which tenant the given signals resolve to
    Detect(SignalArgs),

    /// Resolve a tenant's plugin load order without instantiating anything
    Plugins {
        /// Tenant id
        tenant: String,
    },

    /// Run the full pipeline for the given signals
    Run(SignalArgs),
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Detect(signals)) => detect(&cli, signals),
        Some(Commands::Plugins { tenant }) => plugins(&cli, tenant),
        Some(Commands::Run(signals)) => run(&cli, signals).await,
    };

    match result {
        Ok(()) => {
            info!("Validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Validation failed: {e:#}");
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<ConfigLoader> {
    let loaded = match &cli.environment {
        Some(environment) => {
            let variables = std::env::vars().collect();
            ConfigLoader::load_from_directory_with_env(&cli.config_dir, environment, &variables)
        }
        None => ConfigLoader::load_from_directory(&cli.config_dir),
    };
    loaded.with_context(|| format!("loading {}", cli.config_dir.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn validate(cli: &Cli) -> Result<()> {
    let loaded = load(cli)?;
    let config = loaded.config();

    if cli.format == OutputFormat::Json {
        return print_json(&loaded.debug_config());
    }

    println!("Configuration: {}", loaded.config_directory().display());
    println!("Environment:   {}", loaded.environment());
    println!();
    println!("Tenants ({}):", config.tenants.len());
    for (tenant, profile) in &config.tenants {
        println!(
            "  {tenant:<20} plugins: {:<40} required: {}",
            profile.plugins.join(", "),
            profile.required_plugins.join(", ")
        );
    }
    println!();
    println!("Detection order: {}", join(&config.detection.strategy_order));
    println!("Fallback:        {}", config.detection.fallback_context);
    println!(
        "Loader:          {} (timeout {}ms, budget {}ms)",
        config.loader.default_strategy,
        config.loader.plugin_timeout_ms,
        config.loader.performance_budget_ms
    );
    println!(
        "Merge:           {} (cache ttl {}s)",
        config.merge.strategy, config.merge.cache_ttl_seconds
    );
    println!("Search paths:");
    for path in loaded.resolved_search_paths() {
        let marker = if path.is_dir() { "ok" } else { "missing" };
        println!("  [{marker}] {}", path.display());
    }
    Ok(())
}

fn detect(cli: &Cli, signals: &SignalArgs) -> Result<()> {
    let orchestrator = Orchestrator::new(load(cli)?.into_config())?;
    let detection = orchestrator.detector().detect(&signals.to_signals());

    if cli.format == OutputFormat::Json {
        return print_json(&detection);
    }
    println!("Context:    {}", detection.context);
    println!("Method:     {}", detection.method);
    println!("Confidence: {:.2}", detection.confidence);
    for (key, value) in &detection.metadata {
        println!("  {key}: {value}");
    }
    Ok(())
}

fn plugins(cli: &Cli, tenant: &str) -> Result<()> {
    let config: OrchestratorConfig = load(cli)?.into_config();
    let context = BusinessContext::parse(tenant);
    let Some(profile) = config.tenant_profile(&context) else {
        bail!("tenant '{tenant}' is not configured");
    };

    let orchestrator = Orchestrator::new(config.clone())?;
    let snapshot = orchestrator
        .registry()
        .refresh()
        .context("discovering plugin manifests")?;
    let resolver = DependencyResolver::new();
    let ordered = resolver.resolve(profile.requested_plugins(), &snapshot)?;

    if cli.format == OutputFormat::Json {
        let order: Vec<&str> = ordered.iter().map(|manifest| manifest.id.as_str()).collect();
        return print_json(&order);
    }
    println!("Load order for {context} ({} manifests discovered):", snapshot.len());
    for (wave, manifests) in resolver.waves(&ordered).iter().enumerate() {
        for manifest in manifests {
            println!(
                "  wave {wave}: {:<24} {:<10} deps: {}",
                manifest.id,
                manifest.version,
                manifest.depends_on.join(", ")
            );
        }
    }
    Ok(())
}

async fn run(cli: &Cli, signals: &SignalArgs) -> Result<()> {
    let orchestrator = Orchestrator::new(load(cli)?.into_config())?;
    let result = orchestrator.initialize(&signals.to_signals()).await?;

    if cli.format == OutputFormat::Json {
        return print_json(&*result);
    }
    print_result(&result);
    Ok(())
}

fn print_result(result: &OrchestrationResult) {
    println!("Run:        {}", result.run_id);
    println!(
        "Context:    {} via {} ({:.2})",
        result.context.context, result.context.method, result.context.confidence
    );
    println!("Plugins:    {}", result.plugin_order.join(" -> "));
    println!("Cache:      {}", result.cache_outcome);
    println!();
    println!("Stages:");
    for timing in &result.stage_timings {
        println!("  {:<20} {:>6}ms", timing.stage.to_string(), timing.duration_ms);
    }
    if !result.load_report.outcomes.is_empty() {
        println!();
        println!("Plugin outcomes:");
        for outcome in &result.load_report.outcomes {
            println!(
                "  {:<24} {:<20} {}",
                outcome.plugin,
                outcome.status.to_string(),
                outcome.detail.as_deref().unwrap_or("")
            );
        }
    }
    if !result.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &result.warnings {
            println!("  - {warning}");
        }
    }
    println!();
    println!("Merged configuration:");
    println!("{}", result.merged_config.sanitized_dump());
}

fn join<T: ToString>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(" > ")
}
