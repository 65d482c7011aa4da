//! Core flag, matching and validation modules

pub mod grid;
pub mod flag;
pub mod time_match;
pub mod triangulation;
pub mod space_match;
pub mod validate;
pub mod histogram;
pub mod pipeline;
pub mod audit;

// Re-export main types
pub use grid::{GridArray, infer_shape, reshape, flatten};
pub use flag::{FlagEngine, FlagParams, MaskOutcome, ProductLayer, ValidityMask};
pub use time_match::{TemporalMatcher, MatchCandidate, MatchedSource};
pub use triangulation::{Triangulation, LinearInterpolator};
pub use space_match::{SpatialMatcher, SpatialResult, GridMatch, PointMatch, SwathView};
pub use validate::{ValidationEngine, ValidationRecord, ValidationRow, DifferenceMetric, Statistics, RowPosition};
pub use histogram::{Histogram, Bin};
pub use pipeline::{BatchProcessor, BatchSummary, Catalog};
pub use audit::{AuditReport, audit_directory};
