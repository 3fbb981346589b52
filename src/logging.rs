//! # Structured Logging Module
//!
//! Environment-aware structured logging for the resolution pipeline, plus the
//! abstract logger sink the orchestrator reports stage events through.
//!
//! Components log with `tracing` macros directly. The orchestrator additionally
//! reports every stage transition, plugin outcome, cache event and error to an
//! [`OrchestrationLogger`], so hosts can route those events to their own sink.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::constants::{defaults, env_vars};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level =
            std::env::var(env_vars::TENANCY_LOG).unwrap_or_else(|_| get_log_level(&environment));
        let json = std::env::var(env_vars::TENANCY_LOG_FORMAT)
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let console = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(EnvFilter::new(log_level.clone()))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(log_level.clone()))
                .boxed()
        };

        // A host framework may already own the global subscriber
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            log_level = %log_level,
            json = json,
            "structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var(env_vars::TENANCY_ENV)
        .or_else(|_| std::env::var(env_vars::APP_ENV))
        .unwrap_or_else(|_| defaults::ENVIRONMENT.to_string())
        .to_lowercase()
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Severity of an orchestration event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured field map attached to an orchestration event
pub type LogFields = BTreeMap<String, String>;

/// Abstract structured logger consumed by the orchestrator
///
/// Implementations must be cheap and non-blocking; they are called inline on
/// the resolution path.
pub trait OrchestrationLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &LogFields);
}

/// Forwards orchestration events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl OrchestrationLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &LogFields) {
        let fields = format_fields(fields);
        match level {
            LogLevel::Trace => tracing::trace!(fields = %fields, "{message}"),
            LogLevel::Debug => tracing::debug!(fields = %fields, "{message}"),
            LogLevel::Info => tracing::info!(fields = %fields, "{message}"),
            LogLevel::Warn => tracing::warn!(fields = %fields, "{message}"),
            LogLevel::Error => tracing::error!(fields = %fields, "{message}"),
        }
    }
}

/// A recorded orchestration event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub fields: LogFields,
    pub timestamp: chrono::DateTime<Utc>,
}

/// In-memory sink, used by tests and diagnostics tooling
#[derive(Debug, Default, Clone)]
pub struct MemoryLogger {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records captured so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records whose message equals `message`
    pub fn records_named(&self, message: &str) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.message == message)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl OrchestrationLogger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &LogFields) {
        self.records.lock().push(LogRecord {
            level,
            message: message.to_string(),
            fields: fields.clone(),
            timestamp: Utc::now(),
        });
    }
}

/// Build a field map from `(key, value)` pairs
pub fn fields<I, K, V>(pairs: I) -> LogFields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.to_string()))
        .collect()
}

fn format_fields(fields: &LogFields) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log structured data for a pipeline stage transition
pub fn log_stage_transition(run_id: &str, from: &str, to: &str, tenant: Option<&str>) {
    tracing::info!(
        run_id = %run_id,
        from = %from,
        to = %to,
        tenant = tenant,
        timestamp = %Utc::now().to_rfc3339(),
        "STAGE_TRANSITION"
    );
}

/// Log structured data for a plugin load outcome
pub fn log_plugin_operation(
    operation: &str,
    plugin_id: &str,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        plugin_id = %plugin_id,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "PLUGIN_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
