use crate::config::ValidationConfig;
use crate::core::flag::ValidityMask;
use crate::core::space_match::{PointMatch, SpatialResult};
use crate::types::{check_length, FlatArray, Parameter, SourceKind, ValResult};
use num_traits::Float;

/// How a target/source pair is turned into a difference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferenceMetric {
    /// `|t - s|`, in the product's own unit
    Absolute,
    /// `|t - s| / |s| * 100`
    RelativePercent,
}

impl DifferenceMetric {
    pub fn for_parameter(parameter: Parameter) -> Self {
        if parameter.is_temperature_like() {
            DifferenceMetric::Absolute
        } else {
            DifferenceMetric::RelativePercent
        }
    }

    /// Difference of one pair; `None` when it is undefined
    pub fn difference(&self, target: f64, source: f64) -> Option<f64> {
        let diff = match self {
            DifferenceMetric::Absolute => (target - source).abs(),
            DifferenceMetric::RelativePercent => {
                if source == 0.0 {
                    return None;
                }
                (target - source).abs() / source.abs() * 100.0
            }
        };
        diff.is_finite().then_some(diff)
    }

    /// Unit of the difference values for a parameter
    pub fn unit(&self, parameter: Parameter) -> &'static str {
        match self {
            DifferenceMetric::Absolute => parameter.units(),
            DifferenceMetric::RelativePercent => "%",
        }
    }
}

/// Where a validation row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPosition {
    /// Flat target pixel index (0-based)
    Index(usize),
    /// Centre of an extraction window
    Cell { row: usize, col: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRow {
    pub position: RowPosition,
    pub target: f64,
    pub source: f64,
    pub difference: f64,
}

/// Aggregate agreement figures; `None` where the sample cannot define one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub bias: Option<f64>,
    pub std: Option<f64>,
    pub rms: Option<f64>,
    pub correlation: Option<f64>,
}

impl Statistics {
    pub fn from_rows(rows: &[ValidationRow]) -> Self {
        let targets: Vec<f64> = rows.iter().map(|r| r.target).collect();
        let sources: Vec<f64> = rows.iter().map(|r| r.source).collect();
        Self::from_pairs(&targets, &sources)
    }

    pub fn from_pairs(targets: &[f64], sources: &[f64]) -> Self {
        let deltas: Vec<f64> = targets.iter().zip(sources).map(|(t, s)| t - s).collect();
        let squares: Vec<f64> = deltas.iter().map(|d| d * d).collect();
        Self {
            bias: mean(&deltas),
            std: sample_std(&deltas),
            rms: mean(&squares).map(|v| v.sqrt()),
            correlation: pearson(targets, sources),
        }
    }
}

/// Persisted outcome of validating one match candidate
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRecord {
    pub target_file: String,
    pub source_file: String,
    pub target_sensor: String,
    pub source: SourceKind,
    pub parameter: Parameter,
    /// Target timestamp in file-name layout
    pub time_tag: String,
    pub metric: DifferenceMetric,
    pub rows: Vec<ValidationRow>,
    pub total_pixel_count: usize,
    pub statistics: Statistics,
}

impl ValidationRecord {
    pub fn effective_pixel_count(&self) -> usize {
        self.rows.len()
    }

    /// Mean of the per-row differences, the headline validation figure
    pub fn mean_difference(&self) -> Option<f64> {
        let diffs: Vec<f64> = self.differences();
        mean(&diffs)
    }

    pub fn differences(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.difference).collect()
    }
}

/// Turns matched target/source values into validation rows and statistics
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    source_fill_value: f64,
}

impl ValidationEngine {
    pub fn new(source_fill_value: f64) -> Self {
        Self { source_fill_value }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(config.source_fill_value)
    }

    fn usable_source(&self, source: f64) -> bool {
        source.is_finite() && source != self.source_fill_value && source != 0.0
    }

    /// One row per valid target pixel whose paired source value is usable
    pub fn pixel_rows(
        &self,
        parameter: Parameter,
        target: &FlatArray,
        source: &FlatArray,
        mask: &ValidityMask,
    ) -> ValResult<Vec<ValidationRow>> {
        check_length("validation source", target.len(), source.len())?;
        check_length("validation mask", target.len(), mask.len())?;
        let metric = DifferenceMetric::for_parameter(parameter);

        let rows: Vec<ValidationRow> = target
            .iter()
            .zip(source.iter())
            .enumerate()
            .filter(|&(i, (&t, &s))| mask.is_valid(i) && t.is_finite() && self.usable_source(s))
            .filter_map(|(i, (&t, &s))| {
                metric.difference(t, s).map(|difference| ValidationRow {
                    position: RowPosition::Index(i),
                    target: t,
                    source: s,
                    difference,
                })
            })
            .collect();

        log::debug!(
            "{}: {} of {} pixels enter the statistics",
            parameter,
            rows.len(),
            target.len()
        );
        Ok(rows)
    }

    /// Rows of either spatial result; point results need the reference value
    pub fn rows_for(
        &self,
        parameter: Parameter,
        target: &FlatArray,
        result: &SpatialResult,
        reference: Option<f64>,
    ) -> ValResult<Vec<ValidationRow>> {
        match (result, reference) {
            (SpatialResult::Grid(grid), _) => self.pixel_rows(parameter, target, &grid.interpolated, &grid.mask),
            (SpatialResult::Point(point), Some(value)) => Ok(self.window_rows(parameter, point, value)),
            (SpatialResult::Point(_), None) => Ok(Vec::new()),
        }
    }

    /// Single row comparing a window mean with its reference value
    pub fn window_rows(&self, parameter: Parameter, point: &PointMatch, reference: f64) -> Vec<ValidationRow> {
        let metric = DifferenceMetric::for_parameter(parameter);
        if !point.mean_value.is_finite() || !self.usable_source(reference) {
            log::debug!("{}: reference value {} is not usable", parameter, reference);
            return Vec::new();
        }
        metric
            .difference(point.mean_value, reference)
            .map(|difference| ValidationRow {
                position: RowPosition::Cell {
                    row: point.row,
                    col: point.col,
                },
                target: point.mean_value,
                source: reference,
                difference,
            })
            .into_iter()
            .collect()
    }
}

fn mean<F: Float>(values: &[F]) -> Option<F> {
    if values.is_empty() {
        return None;
    }
    let sum = values.iter().fold(F::zero(), |acc, &v| acc + v);
    F::from(values.len()).map(|n| sum / n)
}

/// Standard deviation with one delta degree of freedom
fn sample_std<F: Float>(values: &[F]) -> Option<F> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss = values.iter().fold(F::zero(), |acc, &v| acc + (v - m) * (v - m));
    F::from(values.len() - 1).map(|dof| (ss / dof).sqrt())
}

/// Pearson correlation; undefined for fewer than two pairs or a constant series
fn pearson<F: Float>(x: &[F], y: &[F]) -> Option<F> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let (mx, my) = (mean(x)?, mean(y)?);
    let (mut sxy, mut sxx, mut syy) = (F::zero(), F::zero(), F::zero());
    for (&a, &b) in x.iter().zip(y) {
        sxy = sxy + (a - mx) * (b - my);
        sxx = sxx + (a - mx) * (a - mx);
        syy = syy + (b - my) * (b - my);
    }
    if sxx == F::zero() || syy == F::zero() {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}
