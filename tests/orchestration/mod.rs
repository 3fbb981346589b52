//! Orchestration Integration Tests
//!
//! Full pipeline runs: detection, discovery, resolution, loading and merging.

pub mod concurrency_test;
pub mod detection_test;
pub mod loading_test;
pub mod pipeline_test;
pub mod reload_test;
