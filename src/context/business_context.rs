use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier reserved for "no tenant resolved"
pub const UNKNOWN: &str = "unknown";

/// Logical identity of one business unit served by the platform
///
/// The set of tenants is closed per configuration (see [`TenantCatalog`]) and
/// extensible by adding tenant profiles; `Unknown` is always a member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BusinessContext {
    Tenant(String),
    #[default]
    Unknown,
}

impl BusinessContext {
    /// Normalize an identifier into a context (`"Latinos "` → `Tenant("latinos")`)
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_lowercase();
        if normalized.is_empty() || normalized == UNKNOWN {
            Self::Unknown
        } else {
            Self::Tenant(normalized)
        }
    }

    pub fn tenant(id: impl AsRef<str>) -> Self {
        Self::parse(id.as_ref())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Tenant(id) => id,
            Self::Unknown => UNKNOWN,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for BusinessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BusinessContext {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for BusinessContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BusinessContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// The closed set of tenants a deployment knows about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCatalog {
    tenants: BTreeSet<String>,
}

impl TenantCatalog {
    pub fn new<I, S>(tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tenants = tenants
            .into_iter()
            .filter_map(|id| match BusinessContext::parse(id.as_ref()) {
                BusinessContext::Tenant(id) => Some(id),
                BusinessContext::Unknown => None,
            })
            .collect();
        Self { tenants }
    }

    /// Add a tenant at runtime; returns false if it was already known
    pub fn insert(&mut self, id: &str) -> bool {
        match BusinessContext::parse(id) {
            BusinessContext::Tenant(id) => self.tenants.insert(id),
            BusinessContext::Unknown => false,
        }
    }

    pub fn contains(&self, context: &BusinessContext) -> bool {
        match context {
            BusinessContext::Tenant(id) => self.tenants.contains(id),
            BusinessContext::Unknown => true,
        }
    }

    /// Resolve a raw identifier to a known tenant
    pub fn lookup(&self, raw: &str) -> Option<BusinessContext> {
        match BusinessContext::parse(raw) {
            BusinessContext::Tenant(id) if self.tenants.contains(&id) => {
                Some(BusinessContext::Tenant(id))
            }
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tenants.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
