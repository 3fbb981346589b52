//! # Plugin Registry
//!
//! Inert catalogue of discovered plugin manifests.
//!
//! ## Overview
//!
//! Discovery reads every `*.yaml`/`*.yml` file in each configured search
//! location and builds a candidate [`RegistrySnapshot`]. Snapshots are
//! immutable; a candidate only becomes visible when it is published, which
//! swaps the shared pointer atomically. Readers holding an older snapshot keep
//! a consistent view for as long as they hold it.
//!
//! Writers are serialised, and a candidate older than the published snapshot
//! is never published over it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tenancy_core::registry::PluginRegistry;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = PluginRegistry::new(vec!["plugins".into()]);
//! let candidate = registry.discover()?;
//! registry.publish(candidate);
//!
//! let snapshot = registry.snapshot();
//! println!("{} manifests, generation {}", snapshot.len(), snapshot.generation());
//! # Ok(())
//! # }
//! ```

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::manifest::{
    LoadingStrategy, PluginManifest, RawPluginManifest, RegistryError, RegistryResult,
};

/// Manifests larger than this are rejected unread
const MAX_MANIFEST_FILE_SIZE: u64 = 1024 * 1024;

/// Immutable set of manifests in declaration (discovery) order
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    generation: u64,
    manifests: Vec<Arc<PluginManifest>>,
    index: HashMap<String, usize>,
    created_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// Build a snapshot, rejecting duplicate ids
    pub fn new(generation: u64, manifests: Vec<PluginManifest>) -> RegistryResult<Self> {
        let mut index = HashMap::with_capacity(manifests.len());
        for (position, manifest) in manifests.iter().enumerate() {
            if index.insert(manifest.id.clone(), position).is_some() {
                return Err(RegistryError::DuplicatePlugin {
                    plugin: manifest.id.clone(),
                });
            }
        }

        Ok(Self {
            generation,
            manifests: manifests.into_iter().map(Arc::new).collect(),
            index,
            created_at: Utc::now(),
        })
    }

    pub fn empty() -> Self {
        Self {
            generation: 0,
            manifests: Vec::new(),
            index: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<PluginManifest>> {
        self.index.get(id).map(|position| &self.manifests[*position])
    }

    /// Declaration position, used as the tie-break for dependency ordering
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn manifests(&self) -> &[Arc<PluginManifest>] {
        &self.manifests
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.manifests.iter().map(|manifest| manifest.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Statistics about the published snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_manifests: usize,
    pub generation: u64,
    /// Count per declared loading strategy; `default` for manifests without one
    pub by_strategy: BTreeMap<String, usize>,
    pub search_paths: Vec<PathBuf>,
}

/// Registry of plugin manifests with copy-on-write snapshots
pub struct PluginRegistry {
    current: ArcSwap<RegistrySnapshot>,
    search_paths: RwLock<Vec<PathBuf>>,
    generation: AtomicU64,
    /// Held across read, combine and swap
    writer: Mutex<()>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("generation", &self.current.load().generation())
            .field("manifests", &self.current.load().len())
            .field("search_paths", &*self.search_paths.read())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            search_paths: RwLock::new(search_paths),
            generation: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    /// The currently published snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    pub fn add_search_path(&self, path: impl Into<PathBuf>) {
        self.search_paths.write().push(path.into());
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.search_paths.read().clone()
    }

    /// Scan the search locations into a candidate snapshot without publishing it
    pub fn discover(&self) -> RegistryResult<RegistrySnapshot> {
        let search_paths = self.search_paths();
        let mut manifests = Vec::new();

        for directory in &search_paths {
            if !directory.is_dir() {
                warn!(path = %directory.display(), "plugin search location missing, skipping");
                continue;
            }
            debug!(path = %directory.display(), "scanning plugin search location");
            for path in manifest_files(directory)? {
                manifests.push(read_manifest(&path)?);
            }
        }

        let snapshot = self.build_snapshot(manifests)?;
        info!(
            manifests = snapshot.len(),
            generation = snapshot.generation(),
            "plugin discovery complete"
        );
        Ok(snapshot)
    }

    /// Candidate snapshot from manifests supplied in code
    pub fn build_snapshot(&self, manifests: Vec<PluginManifest>) -> RegistryResult<RegistrySnapshot> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        RegistrySnapshot::new(generation, manifests)
    }

    /// Atomically replace the published snapshot
    ///
    /// Returns the snapshot that is published afterwards: `snapshot`, or the
    /// current one when `snapshot` is older than it.
    pub fn publish(&self, snapshot: impl Into<Arc<RegistrySnapshot>>) -> Arc<RegistrySnapshot> {
        let _writer = self.writer.lock();
        self.store_if_newer(snapshot.into())
    }

    /// Discover and publish in one step
    pub fn refresh(&self) -> RegistryResult<Arc<RegistrySnapshot>> {
        let candidate = self.discover()?;
        Ok(self.publish(candidate))
    }

    /// Register manifests in code and publish them, appended after the current ones
    pub fn register_manifests(
        &self,
        manifests: Vec<PluginManifest>,
    ) -> RegistryResult<Arc<RegistrySnapshot>> {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        let combined = current
            .manifests()
            .iter()
            .map(|manifest| (**manifest).clone())
            .chain(manifests)
            .collect();
        let candidate = self.build_snapshot(combined)?;
        Ok(self.store_if_newer(Arc::new(candidate)))
    }

    /// Caller holds `writer`
    fn store_if_newer(&self, snapshot: Arc<RegistrySnapshot>) -> Arc<RegistrySnapshot> {
        let current = self.current.load_full();
        if snapshot.generation() < current.generation() {
            warn!(
                generation = snapshot.generation(),
                published_generation = current.generation(),
                "older registry snapshot not published"
            );
            return current;
        }
        self.current.store(snapshot.clone());
        debug!(
            previous_generation = current.generation(),
            generation = snapshot.generation(),
            "registry snapshot published"
        );
        snapshot
    }

    pub fn stats(&self) -> RegistryStats {
        let snapshot = self.snapshot();
        let mut by_strategy = BTreeMap::new();
        for manifest in snapshot.manifests() {
            let key = manifest
                .loading_strategy
                .map(|strategy: LoadingStrategy| strategy.to_string())
                .unwrap_or_else(|| "default".to_string());
            *by_strategy.entry(key).or_insert(0) += 1;
        }
        RegistryStats {
            total_manifests: snapshot.len(),
            generation: snapshot.generation(),
            by_strategy,
            search_paths: self.search_paths(),
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Manifest files directly inside `directory`, sorted by path
fn manifest_files(directory: &Path) -> RegistryResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(directory).map_err(|source| RegistryError::Io {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| RegistryError::Io {
                path: directory.to_path_buf(),
                source,
            })?
            .path();
        let is_manifest = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| matches!(extension, "yaml" | "yml"));
        if is_manifest && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_manifest(path: &Path) -> RegistryResult<PluginManifest> {
    let metadata = std::fs::metadata(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if metadata.len() > MAX_MANIFEST_FILE_SIZE {
        return Err(RegistryError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: MAX_MANIFEST_FILE_SIZE,
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawPluginManifest =
        serde_yaml::from_str(&content).map_err(|e| RegistryError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let manifest = PluginManifest::try_from(raw)?;
    debug!(plugin = %manifest.id, version = %manifest.version, path = %path.display(), "manifest read");
    Ok(manifest)
}
