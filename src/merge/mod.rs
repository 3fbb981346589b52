//! # Configuration Merging
//!
//! Base, tenant and plugin fragments combined into one validated, cached
//! configuration tree.

pub mod cache;
pub mod error;
pub mod fragment;
pub mod manager;
pub mod schema;
pub mod strategy;
pub mod value;

pub use cache::{CacheLookup, CacheOutcome, CacheStats, ConfigCacheKey, MergeCache};
pub use error::{ConfigMergeError, ConfigMergeResult};
pub use fragment::{ConfigFragment, FragmentTier};
pub use manager::{merge_fragments, ConfigurationManager, MergedConfig};
pub use schema::{ConfigSchema, SchemaKind};
pub use strategy::MergeStrategy;
pub use value::ConfigValue;
