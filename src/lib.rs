//! oceanval: A Fast, Modular Ocean-Color/SST Cross-Validation Engine
//!
//! Derives per-pixel validity masks for satellite swaths, pairs a target
//! product with reference swaths or in-situ stations in time and space, and
//! computes agreement statistics for the pairs.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types
pub use types::{Observation, ObservationId, Parameter, SourceKind, ValError, ValResult};
pub use config::{ValidationConfig, SensorProfile, ProductSentinels};
pub use crate::core::{BatchProcessor, BatchSummary, FlagEngine, SpatialMatcher, TemporalMatcher, ValidationEngine};
