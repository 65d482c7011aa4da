//! Per-pixel validity masks from raw quality bits, product sentinels and a
//! neighbourhood-consensus filter.
//!
//! The mask is built as a fold of invalidity sources combined with logical OR,
//! followed by two window passes that can only add invalid pixels. A pixel
//! invalid at any stage therefore stays invalid in the final mask.

use crate::config::{ProductSentinels, SensorProfile, ValidationConfig};
use crate::core::grid::{flatten, infer_shape_in, reshape, SWATH_ROW_RANGE};
use crate::types::{check_length, FlatArray, Parameter, RawFlagArray, ValError, ValResult};
use ndarray::{s, Array1, Array2};
use std::ops::Range;

/// Absolute tolerance when comparing a value against a sentinel
const SENTINEL_TOLERANCE: f64 = 1e-6;

/// Per-pixel invalidity over an observation's flat index space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    invalid: Array1<bool>,
}

impl ValidityMask {
    /// Mask with every pixel valid
    pub fn all_valid(len: usize) -> Self {
        Self {
            invalid: Array1::from_elem(len, false),
        }
    }

    pub fn from_invalid(invalid: Array1<bool>) -> Self {
        Self { invalid }
    }

    /// Read a persisted 0/1 flag array (non-zero = invalid)
    pub fn from_flag_values(flags: &FlatArray) -> Self {
        Self {
            invalid: flags.mapv(|f| f != 0.0),
        }
    }

    pub fn len(&self) -> usize {
        self.invalid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invalid.is_empty()
    }

    pub fn is_valid(&self, index: usize) -> bool {
        !self.invalid[index]
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid.iter().filter(|&&b| b).count()
    }

    pub fn valid_count(&self) -> usize {
        self.len() - self.invalid_count()
    }

    /// True when no pixel survived
    pub fn is_all_invalid(&self) -> bool {
        self.invalid.iter().all(|&b| b)
    }

    pub fn as_invalid(&self) -> &Array1<bool> {
        &self.invalid
    }

    /// Pixels invalid in either mask; invalidity never clears
    pub fn union(&self, other: &ValidityMask) -> ValResult<Self> {
        check_length("validity mask", self.len(), other.len())?;
        let mut invalid = self.invalid.clone();
        invalid.zip_mut_with(&other.invalid, |a, &b| *a |= b);
        Ok(Self { invalid })
    }

    /// 0/1 flag values as persisted in `flag1` files (1 = invalid)
    pub fn to_flag_array(&self) -> Array1<u8> {
        self.invalid.mapv(u8::from)
    }
}

/// One product array sharing the observation's pixel index space
#[derive(Debug, Clone, Copy)]
pub struct ProductLayer<'a> {
    pub parameter: Parameter,
    pub values: &'a FlatArray,
}

/// Window filter parameters
#[derive(Debug, Clone)]
pub struct FlagParams {
    /// Neighbourhood size (must be odd, >= 3)
    pub window_size: usize,
    /// Invalid fraction above which Pass 1 invalidates a pixel
    pub majority_threshold: f64,
    /// CV above which Pass 2 invalidates a pixel
    pub dispersion_cv_threshold: f64,
    /// Row counts tried when reshaping the flat mask
    pub shape_rows: Range<usize>,
}

impl Default for FlagParams {
    fn default() -> Self {
        Self {
            window_size: 5,
            majority_threshold: 0.5,
            dispersion_cv_threshold: 0.15,
            shape_rows: SWATH_ROW_RANGE,
        }
    }
}

impl FlagParams {
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            window_size: config.window_size,
            majority_threshold: config.majority_threshold,
            dispersion_cv_threshold: config.dispersion_cv_threshold,
            shape_rows: config.shape_row_range.clone(),
        }
    }
}

/// Mask produced for one observation
#[derive(Debug, Clone)]
pub struct MaskOutcome {
    pub mask: ValidityMask,
    /// Swath shape the window passes ran on
    pub shape: (usize, usize),
    /// Products skipped for a length mismatch
    pub skipped_products: Vec<Parameter>,
}

impl MaskOutcome {
    pub fn is_all_invalid(&self) -> bool {
        self.mask.is_all_invalid()
    }
}

/// Quality flag processor
pub struct FlagEngine {
    params: FlagParams,
}

impl FlagEngine {
    pub fn new(params: FlagParams) -> ValResult<Self> {
        if params.window_size < 3 || params.window_size % 2 == 0 {
            return Err(ValError::Config(format!(
                "Window size must be odd and at least 3, got {}",
                params.window_size
            )));
        }
        Ok(Self { params })
    }

    pub fn from_config(config: &ValidationConfig) -> ValResult<Self> {
        Self::new(FlagParams::from_config(config))
    }

    pub fn params(&self) -> &FlagParams {
        &self.params
    }

    /// Build the validity mask of one observation.
    ///
    /// The mask length follows `raw_flag` when present, the first product
    /// otherwise. Products of another length are skipped and reported.
    pub fn compute_mask(
        &self,
        raw_flag: Option<&RawFlagArray>,
        products: &[ProductLayer<'_>],
        profile: &SensorProfile,
        sentinels: &ProductSentinels,
    ) -> ValResult<MaskOutcome> {
        let len = match (raw_flag, products.first()) {
            (Some(flag), _) => flag.len(),
            (None, Some(first)) => first.values.len(),
            (None, None) => {
                return Err(ValError::InvalidFormat(format!(
                    "No flag or product arrays for sensor {}",
                    profile.name
                )))
            }
        };
        log::debug!(
            "Computing {} mask over {} pixels ({} products, bits {:?})",
            profile.name,
            len,
            products.len(),
            profile.flag_bits
        );

        let initial = match raw_flag {
            Some(flag) => decode_bits(flag, &profile.flag_bits),
            None => Array1::from_elem(len, false),
        };

        let mut skipped_products = Vec::new();
        let invalid = products.iter().fold(initial, |acc, layer| {
            if layer.values.len() != len {
                log::warn!(
                    "Product {} has {} values but the flag has {}, skipping",
                    layer.parameter,
                    layer.values.len(),
                    len
                );
                skipped_products.push(layer.parameter);
                return acc;
            }

            let sentinel = sentinel_for(profile, sentinels, layer.parameter);
            let before = acc.iter().filter(|&&b| b).count();
            let mut combined = acc;
            combined.zip_mut_with(layer.values, |inv, &v| *inv |= is_sentinel(v, sentinel));

            let added = combined.iter().filter(|&&b| b).count() - before;
            if added * 2 > len {
                log::warn!(
                    "Product {} invalidated {} of {} pixels",
                    layer.parameter,
                    added,
                    len
                );
            }
            combined
        });

        let (rows, cols) = infer_shape_in(len, self.params.shape_rows.clone())?;
        let grid = reshape(&invalid, rows, cols)?;
        let filtered = self.propagate(grid);

        let mask = ValidityMask::from_invalid(flatten(&filtered));
        if mask.is_all_invalid() {
            log::warn!("All {} pixels of the {} mask are invalid", len, profile.name);
        }
        log::info!(
            "{} mask: {} of {} pixels valid",
            profile.name,
            mask.valid_count(),
            len
        );

        Ok(MaskOutcome {
            mask,
            shape: (rows, cols),
            skipped_products,
        })
    }

    /// Border invalidation followed by the majority and dispersion passes
    pub fn propagate(&self, mut invalid: Array2<bool>) -> Array2<bool> {
        let (rows, cols) = invalid.dim();
        let half = (self.params.window_size - 1) / 2;

        invalidate_border(&mut invalid, half);
        if rows <= 2 * half || cols <= 2 * half {
            return invalid;
        }

        let window_len = (self.params.window_size * self.params.window_size) as f64;
        let threshold = self.params.majority_threshold;

        let snapshot = invalid.clone();
        let majority = interior_where(rows, cols, half, |i, j| {
            if snapshot[[i, j]] {
                return false;
            }
            let window = snapshot.slice(s![i - half..=i + half, j - half..=j + half]);
            let invalid_count = window.iter().filter(|&&b| b).count() as f64;
            invalid_count / window_len > threshold
        });
        for (i, j) in majority {
            invalid[[i, j]] = true;
        }

        // Pass 2 takes the CV of the validity indicator over the window's
        // valid pixels. Those indicators are all zero, so the mean is zero and
        // the CV collapses to 0; kept as-is pending domain review.
        let cv_threshold = self.params.dispersion_cv_threshold;
        let snapshot = invalid.clone();
        let dispersion = interior_where(rows, cols, half, |i, j| {
            if snapshot[[i, j]] {
                return false;
            }
            let window = snapshot.slice(s![i - half..=i + half, j - half..=j + half]);
            let indicators: Vec<f64> = window
                .iter()
                .filter(|&&b| !b)
                .map(|&b| f64::from(u8::from(b)))
                .collect();
            indicator_cv(&indicators) > cv_threshold
        });
        for (i, j) in dispersion {
            invalid[[i, j]] = true;
        }

        invalid
    }
}

/// OR together the configured bits of every raw flag value
pub fn decode_bits(raw_flag: &RawFlagArray, bits: &[u32]) -> Array1<bool> {
    raw_flag.mapv(|flag| bits.iter().any(|&bit| bit < 64 && (flag >> bit) & 1 != 0))
}

/// Sentinel for a product: a product-specific constant wins over the sensor fill
pub fn sentinel_for(profile: &SensorProfile, sentinels: &ProductSentinels, parameter: Parameter) -> Option<f64> {
    sentinels.get(parameter).or(profile.fill_value)
}

/// NaN is always a sentinel; otherwise compare against `sentinel`
pub fn is_sentinel(value: f64, sentinel: Option<f64>) -> bool {
    value.is_nan() || sentinel.map_or(false, |s| (value - s).abs() < SENTINEL_TOLERANCE)
}

fn invalidate_border(invalid: &mut Array2<bool>, half: usize) {
    let (rows, cols) = invalid.dim();
    let top = half.min(rows);
    let left = half.min(cols);
    invalid.slice_mut(s![..top, ..]).fill(true);
    invalid.slice_mut(s![rows - top.., ..]).fill(true);
    invalid.slice_mut(s![.., ..left]).fill(true);
    invalid.slice_mut(s![.., cols - left..]).fill(true);
}

/// Coordinates of interior pixels for which `pred` holds
fn interior_where<F>(rows: usize, cols: usize, half: usize, pred: F) -> Vec<(usize, usize)>
where
    F: Fn(usize, usize) -> bool + Sync,
{
    let pred = &pred;
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        (half..rows - half)
            .into_par_iter()
            .flat_map_iter(|i| (half..cols - half).filter(move |&j| pred(i, j)).map(move |j| (i, j)))
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        (half..rows - half)
            .flat_map(|i| (half..cols - half).filter(move |&j| pred(i, j)).map(move |j| (i, j)))
            .collect()
    }
}

/// Population CV, 0 when empty or zero-mean
fn indicator_cv(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    variance.sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_engine(window_size: usize) -> FlagEngine {
        FlagEngine::new(FlagParams {
            window_size,
            shape_rows: 5..100,
            ..FlagParams::default()
        })
        .unwrap()
    }

    #[test]
    fn test_decode_bits() {
        let raw = Array1::from(vec![0i64, 1 << 8, 1 << 22, 1 << 3, (1 << 8) | 1]);
        let decoded = decode_bits(&raw, &[8, 22]);
        assert_eq!(decoded.to_vec(), vec![false, true, true, false, true]);
    }

    #[test]
    fn test_sentinels() {
        let hy3a = SensorProfile::hy3a();
        let sentinels = ProductSentinels::default();

        let fill = sentinel_for(&hy3a, &sentinels, Parameter::Sst);
        assert!(is_sentinel(-999.0, fill));
        assert!(is_sentinel(f64::NAN, fill));
        assert!(!is_sentinel(12.5, fill));

        let ipar = sentinel_for(&hy3a, &sentinels, Parameter::Ipar);
        assert!(is_sentinel(-717.002197265625, ipar));
        assert!(!is_sentinel(-999.0, ipar));

        let terra = SensorProfile::terra();
        assert_eq!(sentinel_for(&terra, &sentinels, Parameter::Chl), None);
        assert!(!is_sentinel(-999.0, None));
    }

    #[test]
    fn test_border_invalidation() {
        let engine = small_engine(3);
        let out = engine.propagate(Array2::from_elem((5, 6), false));
        for i in 0..5 {
            for j in 0..6 {
                if i == 0 || i == 4 || j == 0 || j == 5 {
                    assert!(out[[i, j]], "border pixel ({}, {})", i, j);
                }
            }
        }
        // interior corners see 5 of 9 border pixels
        assert!(out[[1, 1]]);
        assert!(out[[3, 4]]);
        assert!(!out[[2, 2]]);
        assert!(!out[[1, 2]]);
    }

    #[test]
    fn test_majority_pass_uses_pre_pass_snapshot() {
        let engine = small_engine(3);
        let mut grid = Array2::from_elem((7, 7), false);
        // block of invalid pixels around (3, 3) leaving the centre valid
        for (i, j) in [(2, 2), (2, 3), (2, 4), (3, 2), (3, 4)] {
            grid[[i, j]] = true;
        }
        let out = engine.propagate(grid);
        // 5 of 9 neighbours invalid -> centre invalidated
        assert!(out[[3, 3]]);
        // (4, 3) sees 2 invalid interior pixels plus none on the border
        assert!(!out[[4, 3]]);
    }

    #[test]
    fn test_window_larger_than_grid_invalidates_everything() {
        let engine = small_engine(5);
        let out = engine.propagate(Array2::from_elem((3, 8), false));
        assert!(out.iter().all(|&b| b));
    }

    #[test]
    fn test_dispersion_pass_on_indicators_is_inert() {
        assert_eq!(indicator_cv(&[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(indicator_cv(&[]), 0.0);
        assert!((indicator_cv(&[1.0, 3.0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_compute_mask_skips_mismatched_products() {
        let engine = small_engine(3);
        let profile = SensorProfile::hy3a();
        let sentinels = ProductSentinels::default();

        let raw = Array1::from_elem(25, 0i64);
        let mut good = Array1::from_elem(25, 1.0);
        good[12] = -999.0;
        let short = Array1::from_elem(10, f64::NAN);

        let outcome = engine
            .compute_mask(
                Some(&raw),
                &[
                    ProductLayer { parameter: Parameter::Sst, values: &good },
                    ProductLayer { parameter: Parameter::Chl, values: &short },
                ],
                &profile,
                &sentinels,
            )
            .unwrap();

        assert_eq!(outcome.mask.len(), 25);
        assert_eq!(outcome.skipped_products, vec![Parameter::Chl]);
        assert!(!outcome.mask.is_valid(12));
        // 3x3 interior: the fill pixel and the four interior corners (each
        // touching five border pixels) are lost, the edge midpoints survive
        assert_eq!(outcome.mask.valid_count(), 4);
        assert!(outcome.mask.is_valid(7));
        assert!(!outcome.mask.is_valid(6));
    }

    #[test]
    fn test_union_only_accumulates() {
        let a = ValidityMask::from_invalid(Array1::from(vec![true, false, false]));
        let b = ValidityMask::from_invalid(Array1::from(vec![false, false, true]));
        let u = a.union(&b).unwrap();
        assert_eq!(u.to_flag_array().to_vec(), vec![1, 0, 1]);
        assert!(a.union(&ValidityMask::all_valid(2)).is_err());
    }
}
