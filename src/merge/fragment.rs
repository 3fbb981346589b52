use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::value::ConfigValue;

/// Contribution tier; later tiers take precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentTier {
    Base,
    Tenant,
    Plugin,
}

impl fmt::Display for FragmentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Tenant => write!(f, "tenant"),
            Self::Plugin => write!(f, "plugin"),
        }
    }
}

/// A named configuration tree contributed by the base system, a tenant or a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFragment {
    pub name: String,
    pub tier: FragmentTier,
    pub value: ConfigValue,
    /// Dotted paths whose arrays concatenate instead of being replaced
    #[serde(default)]
    pub append_keys: BTreeSet<String>,
}

impl ConfigFragment {
    pub fn new(name: impl Into<String>, tier: FragmentTier, value: ConfigValue) -> Self {
        Self {
            name: name.into(),
            tier,
            value,
            append_keys: BTreeSet::new(),
        }
    }

    pub fn base(name: impl Into<String>, value: ConfigValue) -> Self {
        Self::new(name, FragmentTier::Base, value)
    }

    pub fn tenant(name: impl Into<String>, value: ConfigValue) -> Self {
        Self::new(name, FragmentTier::Tenant, value)
    }

    pub fn plugin(name: impl Into<String>, value: ConfigValue) -> Self {
        Self::new(name, FragmentTier::Plugin, value)
    }

    #[must_use]
    pub fn with_append_key(mut self, path: impl Into<String>) -> Self {
        self.append_keys.insert(path.into());
        self
    }

    #[must_use]
    pub fn with_append_keys<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.append_keys.extend(paths.into_iter().map(Into::into));
        self
    }
}

/// Put fragments in precedence order: base < tenant < plugin, declaration
/// order kept within a tier
pub fn precedence_order(mut fragments: Vec<ConfigFragment>) -> Vec<ConfigFragment> {
    fragments.sort_by_key(|fragment| fragment.tier);
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_is_stable_within_tier() {
        let ordered = precedence_order(vec![
            ConfigFragment::plugin("reports", ConfigValue::Null),
            ConfigFragment::tenant("latinos", ConfigValue::Null),
            ConfigFragment::plugin("billing", ConfigValue::Null),
            ConfigFragment::base("base", ConfigValue::Null),
        ]);
        let names: Vec<_> = ordered.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["base", "latinos", "reports", "billing"]);
    }
}
