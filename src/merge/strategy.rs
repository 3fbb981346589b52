//! # Merge Strategies
//!
//! Combine fragments that are already in precedence order into one tree.
//!
//! - `deep`: recursive key-wise merge, later scalars win, arrays replaced unless
//!   a fragment flags the key path as append
//! - `shallow`: top-level keys only; nested structures replaced wholesale
//! - `replace`: the highest-precedence fragment alone

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::fragment::ConfigFragment;
use super::value::ConfigValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Deep,
    Shallow,
    Replace,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deep => write!(f, "deep"),
            Self::Shallow => write!(f, "shallow"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deep" => Ok(Self::Deep),
            "shallow" => Ok(Self::Shallow),
            "replace" => Ok(Self::Replace),
            _ => Err(format!("Unknown merge strategy: {s}")),
        }
    }
}

/// Merge precedence-ordered fragments with the given strategy
pub fn apply_strategy(strategy: MergeStrategy, fragments: &[ConfigFragment]) -> ConfigValue {
    // a key flagged as append by any fragment concatenates
    let append_keys: BTreeSet<&str> = fragments
        .iter()
        .flat_map(|fragment| fragment.append_keys.iter().map(String::as_str))
        .collect();

    // an empty (null) fragment contributes nothing
    let contributing = fragments
        .iter()
        .filter(|fragment| fragment.value != ConfigValue::Null);

    match strategy {
        MergeStrategy::Deep => contributing
            .fold(ConfigValue::empty_map(), |mut merged, fragment| {
                deep_merge(&mut merged, &fragment.value, "", &append_keys);
                merged
            }),
        MergeStrategy::Shallow => contributing
            .fold(ConfigValue::empty_map(), |mut merged, fragment| {
                shallow_merge(&mut merged, &fragment.value, &append_keys);
                merged
            }),
        MergeStrategy::Replace => contributing
            .last()
            .map(|fragment| fragment.value.clone())
            .unwrap_or_else(ConfigValue::empty_map),
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Recursive merge of `overlay` into `base`
pub fn deep_merge(base: &mut ConfigValue, overlay: &ConfigValue, path: &str, append: &BTreeSet<&str>) {
    match (base, overlay) {
        (ConfigValue::Map(base_map), ConfigValue::Map(overlay_map)) => {
            merge_maps(base_map, overlay_map, path, append);
        }
        (ConfigValue::Sequence(base_items), ConfigValue::Sequence(overlay_items))
            if append.contains(path) =>
        {
            base_items.extend(overlay_items.iter().cloned());
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

fn merge_maps(
    base: &mut BTreeMap<String, ConfigValue>,
    overlay: &BTreeMap<String, ConfigValue>,
    path: &str,
    append: &BTreeSet<&str>,
) {
    for (key, value) in overlay {
        match base.get_mut(key) {
            Some(existing) => deep_merge(existing, value, &child_path(path, key), append),
            None => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn shallow_merge(base: &mut ConfigValue, overlay: &ConfigValue, append: &BTreeSet<&str>) {
    match (base, overlay) {
        (ConfigValue::Map(base_map), ConfigValue::Map(overlay_map)) => {
            for (key, value) in overlay_map {
                match (base_map.get_mut(key), value) {
                    (Some(ConfigValue::Sequence(existing)), ConfigValue::Sequence(items))
                        if append.contains(key.as_str()) =>
                    {
                        existing.extend(items.iter().cloned());
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}
