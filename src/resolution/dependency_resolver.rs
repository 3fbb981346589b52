//! # Dependency Resolver
//!
//! Orders a tenant's plugin set so every plugin follows its dependencies.
//!
//! The requested ids are closed over `depends_on`, then sorted with Kahn's
//! algorithm. The ready set is keyed by declaration position, so plugins with
//! no ordering constraint between them keep their manifest declaration order
//! and the output is deterministic for a fixed input.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::registry::{PluginManifest, RegistrySnapshot};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Plugin '{plugin}' depends on '{missing}', which is not in the registry")]
    MissingDependency { plugin: String, missing: String },

    #[error("Plugin '{plugin}' is not in the registry")]
    UnknownPlugin { plugin: String },

    #[error("Dependency cycle among plugins: {}", .members.join(", "))]
    Cycle { members: Vec<String> },
}

pub type ResolutionResult<T> = Result<T, ResolutionError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `plugin_ids` (and their transitive dependencies) into load order
    pub fn resolve<I, S>(
        &self,
        plugin_ids: I,
        snapshot: &RegistrySnapshot,
    ) -> ResolutionResult<Vec<Arc<PluginManifest>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let closure = transitive_closure(plugin_ids, snapshot)?;
        let ordered = topological_order(&closure, snapshot)?;
        debug!(
            plugins = ordered.len(),
            order = %ordered
                .iter()
                .map(|manifest| manifest.id.as_str())
                .collect::<Vec<_>>()
                .join(" -> "),
            "plugin dependencies resolved"
        );
        Ok(ordered)
    }

    /// Group resolved manifests into waves; a wave only depends on earlier waves
    ///
    /// Plugins inside one wave share no dependency edge and may be instantiated
    /// concurrently.
    pub fn waves(&self, ordered: &[Arc<PluginManifest>]) -> Vec<Vec<Arc<PluginManifest>>> {
        let mut level_of: BTreeMap<&str, usize> = BTreeMap::new();
        let mut waves: Vec<Vec<Arc<PluginManifest>>> = Vec::new();

        for manifest in ordered {
            let level = manifest
                .depends_on
                .iter()
                .filter_map(|dependency| level_of.get(dependency.as_str()))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(manifest.id.as_str(), level);
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(manifest.clone());
        }
        waves
    }
}

/// Declaration positions of the requested plugins and everything they depend on
fn transitive_closure<I, S>(plugin_ids: I, snapshot: &RegistrySnapshot) -> ResolutionResult<BTreeSet<usize>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut closure = BTreeSet::new();
    let mut queue = VecDeque::new();

    for id in plugin_ids {
        let id = id.as_ref();
        let position = snapshot
            .position(id)
            .ok_or_else(|| ResolutionError::UnknownPlugin {
                plugin: id.to_string(),
            })?;
        if closure.insert(position) {
            queue.push_back(position);
        }
    }

    while let Some(position) = queue.pop_front() {
        let manifest = &snapshot.manifests()[position];
        for dependency in &manifest.depends_on {
            let dependency_position =
                snapshot
                    .position(dependency)
                    .ok_or_else(|| ResolutionError::MissingDependency {
                        plugin: manifest.id.clone(),
                        missing: dependency.clone(),
                    })?;
            if closure.insert(dependency_position) {
                queue.push_back(dependency_position);
            }
        }
    }

    Ok(closure)
}

fn topological_order(
    closure: &BTreeSet<usize>,
    snapshot: &RegistrySnapshot,
) -> ResolutionResult<Vec<Arc<PluginManifest>>> {
    let manifests = snapshot.manifests();
    let mut in_degree: BTreeMap<usize, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    for &position in closure {
        let mut degree = 0;
        for dependency in &manifests[position].depends_on {
            // closure construction already proved every dependency exists
            if let Some(dependency_position) = snapshot.position(dependency) {
                degree += 1;
                dependents
                    .entry(dependency_position)
                    .or_default()
                    .push(position);
            }
        }
        in_degree.insert(position, degree);
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(position, _)| *position)
        .collect();
    let mut ordered = Vec::with_capacity(closure.len());

    while let Some(position) = ready.pop_first() {
        ordered.push(manifests[position].clone());
        for dependent in dependents.get(&position).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if ordered.len() < closure.len() {
        let remaining: BTreeSet<usize> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(position, _)| position)
            .collect();
        let members = cycle_members(&remaining, snapshot)
            .into_iter()
            .map(|position| manifests[position].id.clone())
            .collect();
        return Err(ResolutionError::Cycle { members });
    }

    Ok(ordered)
}

/// Nodes among `remaining` that can reach themselves, in declaration order
///
/// Kahn leaves behind both cycle members and plugins that merely depend on a
/// cycle; only the former are reported.
fn cycle_members(remaining: &BTreeSet<usize>, snapshot: &RegistrySnapshot) -> Vec<usize> {
    let manifests = snapshot.manifests();
    let edges = |position: usize| -> Vec<usize> {
        manifests[position]
            .depends_on
            .iter()
            .filter_map(|dependency| snapshot.position(dependency))
            .filter(|dependency| remaining.contains(dependency))
            .collect()
    };

    remaining
        .iter()
        .copied()
        .filter(|&start| {
            let mut visited = BTreeSet::new();
            let mut stack = edges(start);
            while let Some(node) = stack.pop() {
                if node == start {
                    return true;
                }
                if visited.insert(node) {
                    stack.extend(edges(node));
                }
            }
            false
        })
        .collect()
}
