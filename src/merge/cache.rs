//! # Merged Configuration Cache
//!
//! Keyed by (tenant, ordered plugin ids). Entries expire by TTL or explicit
//! bust. Concurrent lookups of a key with no usable value share a single
//! computation; once a value exists, an expired entry keeps being served to
//! concurrent callers while one caller recomputes it.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::error::{ConfigMergeError, ConfigMergeResult};
use super::manager::MergedConfig;
use crate::context::BusinessContext;

type SharedComputation = Shared<BoxFuture<'static, ConfigMergeResult<Arc<MergedConfig>>>>;

/// Cache key: tenant identity plus the ordered plugin-id set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigCacheKey {
    pub tenant: BusinessContext,
    pub plugin_ids: Vec<String>,
}

impl ConfigCacheKey {
    pub fn new<I, S>(tenant: BusinessContext, plugin_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tenant,
            plugin_ids: plugin_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Short hash of the key for log fields
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

impl fmt::Display for ConfigCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.tenant, self.plugin_ids.join(","))
    }
}

/// How a lookup was served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Fresh cached value
    Hit,
    /// No value; this caller ran the computation
    Miss,
    /// No value; this caller awaited another caller's computation
    Coalesced,
    /// Expired value served while another caller recomputes
    Stale,
    /// Expired value; this caller ran the recomputation
    Refreshed,
}

impl CacheOutcome {
    pub fn is_hit(self) -> bool {
        matches!(self, Self::Hit | Self::Stale)
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "hit"),
            Self::Miss => write!(f, "miss"),
            Self::Coalesced => write!(f, "coalesced"),
            Self::Stale => write!(f, "stale"),
            Self::Refreshed => write!(f, "refreshed"),
        }
    }
}

/// A served configuration and how it was obtained
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub config: Arc<MergedConfig>,
    pub outcome: CacheOutcome,
}

/// Counters since the cache was created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_served: u64,
    pub coalesced: u64,
    pub computations: u64,
    pub invalidations: u64,
}

struct CachedValue {
    config: Arc<MergedConfig>,
    computed_at: Instant,
}

struct InFlight {
    id: u64,
    computation: SharedComputation,
}

#[derive(Default)]
struct CacheEntry {
    value: Option<CachedValue>,
    in_flight: Option<InFlight>,
}

enum Plan {
    Ready(Arc<MergedConfig>, CacheOutcome),
    Await(u64, SharedComputation, CacheOutcome),
}

pub struct MergeCache {
    entries: DashMap<ConfigCacheKey, CacheEntry>,
    ttl: Duration,
    next_flight: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
    coalesced: AtomicU64,
    computations: AtomicU64,
    invalidations: AtomicU64,
}

impl fmt::Debug for MergeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl MergeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            next_flight: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Serve `key` from the cache, computing it at most once across concurrent callers
    ///
    /// `compute` is only invoked by the caller that starts a computation; the
    /// future it returns is driven by whichever waiters poll it, so a dropped
    /// caller does not strand the others.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &ConfigCacheKey,
        compute: F,
    ) -> ConfigMergeResult<CacheLookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConfigMergeResult<MergedConfig>> + Send + 'static,
    {
        // the entry guard must be released before any await
        let plan = {
            let mut entry = self.entries.entry(key.clone()).or_default();
            let fresh = entry
                .value
                .as_ref()
                .filter(|cached| cached.computed_at.elapsed() < self.ttl)
                .map(|cached| cached.config.clone());

            let pending = entry
                .in_flight
                .as_ref()
                .map(|flight| (flight.id, flight.computation.clone()));
            let stale = entry.value.as_ref().map(|cached| cached.config.clone());

            if let Some(config) = fresh {
                Plan::Ready(config, CacheOutcome::Hit)
            } else if let Some((id, computation)) = pending {
                match stale {
                    Some(config) => Plan::Ready(config, CacheOutcome::Stale),
                    None => Plan::Await(id, computation, CacheOutcome::Coalesced),
                }
            } else {
                let outcome = if entry.value.is_some() {
                    CacheOutcome::Refreshed
                } else {
                    CacheOutcome::Miss
                };
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let computation = contain_panics(key, compute()).boxed().shared();
                entry.in_flight = Some(InFlight {
                    id,
                    computation: computation.clone(),
                });
                Plan::Await(id, computation, outcome)
            }
        };

        match plan {
            Plan::Ready(config, outcome) => {
                self.record(outcome);
                debug!(key = %key, outcome = %outcome, "merged configuration served from cache");
                Ok(CacheLookup { config, outcome })
            }
            Plan::Await(id, computation, outcome) => {
                let result = computation.await;
                self.complete(key, id, &result);
                self.record(outcome);
                debug!(
                    key = %key,
                    outcome = %outcome,
                    success = result.is_ok(),
                    "merged configuration computed"
                );
                result.map(|config| CacheLookup { config, outcome })
            }
        }
    }

    /// Recompute `key` unconditionally and store the result on success
    ///
    /// The previous value keeps being served until the new one is stored.
    pub async fn refresh<Fut>(&self, key: &ConfigCacheKey, compute: Fut) -> ConfigMergeResult<Arc<MergedConfig>>
    where
        Fut: Future<Output = ConfigMergeResult<MergedConfig>>,
    {
        let config = contain_panics(key, compute).await?;
        self.computations.fetch_add(1, Ordering::Relaxed);
        self.entries.entry(key.clone()).or_default().value = Some(CachedValue {
            config: config.clone(),
            computed_at: Instant::now(),
        });
        Ok(config)
    }

    fn complete(&self, key: &ConfigCacheKey, id: u64, result: &ConfigMergeResult<Arc<MergedConfig>>) {
        let mut completed_empty = false;
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.in_flight.as_ref().map(|flight| flight.id) == Some(id) {
                entry.in_flight = None;
                if let Ok(config) = result {
                    entry.value = Some(CachedValue {
                        config: config.clone(),
                        computed_at: Instant::now(),
                    });
                }
                completed_empty = entry.value.is_none();
            }
        }
        if completed_empty {
            self.entries
                .remove_if(key, |_, entry| entry.value.is_none() && entry.in_flight.is_none());
        }
    }

    fn record(&self, outcome: CacheOutcome) {
        let counter = match outcome {
            CacheOutcome::Hit => &self.hits,
            CacheOutcome::Stale => &self.stale_served,
            CacheOutcome::Coalesced => &self.coalesced,
            CacheOutcome::Miss => {
                self.computations.fetch_add(1, Ordering::Relaxed);
                &self.misses
            }
            CacheOutcome::Refreshed => &self.computations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one key; an in-flight computation for it will not be stored
    pub fn invalidate(&self, key: &ConfigCacheKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drop every key belonging to a tenant
    pub fn invalidate_tenant(&self, tenant: &BusinessContext) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| &key.tenant != tenant);
        let removed = before.saturating_sub(self.entries.len());
        self.invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drop every key except `keep`
    pub fn invalidate_except(&self, keep: &ConfigCacheKey) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key == keep);
        let removed = before.saturating_sub(self.entries.len());
        self.invalidations
            .fetch_add(u64::try_from(removed).unwrap_or(u64::MAX), Ordering::Relaxed);
        removed
    }

    pub fn clear(&self) {
        let removed = self.entries.len();
        self.entries.clear();
        self.invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub fn contains(&self, key: &ConfigCacheKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.value.is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Turn a panic inside a merge computation into an error every waiter sees
fn contain_panics<Fut>(
    key: &ConfigCacheKey,
    computation: Fut,
) -> impl Future<Output = ConfigMergeResult<Arc<MergedConfig>>>
where
    Fut: Future<Output = ConfigMergeResult<MergedConfig>>,
{
    let key = key.to_string();
    AssertUnwindSafe(computation)
        .catch_unwind()
        .map(move |outcome| match outcome {
            Ok(result) => result.map(Arc::new),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|message| (*message).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "merge computation panicked".to_string());
                Err(ConfigMergeError::Computation { key, reason })
            }
        })
}
