use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::headers;

/// Immutable runtime input to business context detection
///
/// Signals are threaded explicitly through every call; nothing in the
/// detection path reads process-global state on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSignals {
    pub domain: Option<String>,
    pub port: Option<u16>,
    /// Header names are stored lowercased
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl RuntimeSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current process environment into a signal set
    pub fn from_process_env() -> Self {
        Self {
            env: std::env::vars().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Environment lookup ignoring empty values
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// The host to match domain rules against: the explicit domain, else the
    /// `Host` header, lowercased and without a port suffix
    pub fn effective_host(&self) -> Option<String> {
        let raw = self
            .domain
            .as_deref()
            .filter(|domain| !domain.trim().is_empty())
            .or_else(|| self.header(headers::HOST))?;

        let without_scheme = raw
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let host = without_scheme
            .split(|c: char| c == '/' || c == ':')
            .next()
            .unwrap_or_default()
            .trim_end_matches('.')
            .to_lowercase();

        (!host.is_empty()).then_some(host)
    }

    /// The listening port, else the port carried by the `Host` header
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| {
            let host = self.header(headers::HOST)?;
            let (_, port) = host.rsplit_once(':')?;
            port.parse().ok()
        })
    }
}
