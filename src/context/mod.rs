//! # Business Context Detection
//!
//! Runtime signals in, one tenant identity with a confidence score out.

pub mod business_context;
pub mod detector;
pub mod signals;
pub mod strategies;

pub use business_context::{BusinessContext, TenantCatalog};
pub use detector::{ContextDetector, DetectionConfig, DetectionResult};
pub use signals::RuntimeSignals;
pub use strategies::{
    CustomRule, DetectionError, DetectionMethod, DetectionRules, DomainMatch, DomainRule, EnvRule,
    PortRule, StrategyKind,
};
