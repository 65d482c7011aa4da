use crate::config::ValidationConfig;
use crate::core::flag::ValidityMask;
use crate::core::grid::GridArray;
use crate::core::triangulation::LinearInterpolator;
use crate::types::{check_length, FlatArray, ValError, ValResult};
use ndarray::s;

/// Coordinates and validity of one swath in flat pixel order
#[derive(Debug, Clone, Copy)]
pub struct SwathView<'a> {
    pub latitude: &'a FlatArray,
    pub longitude: &'a FlatArray,
    pub mask: &'a ValidityMask,
}

impl<'a> SwathView<'a> {
    pub fn new(latitude: &'a FlatArray, longitude: &'a FlatArray, mask: &'a ValidityMask) -> ValResult<Self> {
        check_length("swath longitude", latitude.len(), longitude.len())?;
        check_length("swath mask", latitude.len(), mask.len())?;
        Ok(Self {
            latitude,
            longitude,
            mask,
        })
    }

    pub fn len(&self) -> usize {
        self.latitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latitude.is_empty()
    }
}

/// Source values resampled onto the target grid
#[derive(Debug, Clone)]
pub struct GridMatch {
    /// Interpolated source value per target pixel, NaN where unavailable
    pub interpolated: FlatArray,
    /// Target mask with every pixel lacking an interpolated value added
    pub mask: ValidityMask,
    /// Number of source pixels used as control points
    pub control_points: usize,
}

/// Nearest target pixel to a reference point and its window aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct PointMatch {
    pub row: usize,
    pub col: usize,
    pub mean_value: f64,
    pub valid_ratio: f64,
    /// Population std / mean of the valid window values, `None` for a zero mean
    pub cv: Option<f64>,
}

/// Result of spatial correspondence for one candidate
#[derive(Debug, Clone)]
pub enum SpatialResult {
    Grid(GridMatch),
    Point(PointMatch),
}

/// Spatial correspondence between a target swath and its reference
#[derive(Debug, Clone)]
pub struct SpatialMatcher {
    window_size: usize,
}

impl SpatialMatcher {
    pub fn new(window_size: usize) -> ValResult<Self> {
        if window_size < 3 || window_size % 2 == 0 {
            return Err(ValError::Config(format!(
                "Window size must be odd and at least 3, got {}",
                window_size
            )));
        }
        Ok(Self { window_size })
    }

    pub fn from_config(config: &ValidationConfig) -> ValResult<Self> {
        Self::new(config.window_size)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Resample source values onto the target pixels by linear interpolation
    /// over the Delaunay triangulation of valid source pixels.
    ///
    /// Target pixels outside the source hull become invalid in the returned
    /// mask; pixels already invalid stay invalid.
    pub fn match_grid(&self, target: SwathView<'_>, source: SwathView<'_>, source_values: &FlatArray) -> ValResult<GridMatch> {
        check_length("source values", source.len(), source_values.len())?;

        let mut xs = Vec::new();
        let mut ys = Vec::new();
        let mut vs = Vec::new();
        for i in 0..source.len() {
            let (lon, lat, v) = (source.longitude[i], source.latitude[i], source_values[i]);
            if source.mask.is_valid(i) && v.is_finite() && lon.is_finite() && lat.is_finite() {
                xs.push(lon);
                ys.push(lat);
                vs.push(v);
            }
        }
        if xs.is_empty() {
            return Err(ValError::Geometry("No valid source pixels to interpolate from".to_string()));
        }
        log::debug!("Interpolating from {} of {} source pixels", xs.len(), source.len());

        let interpolator = LinearInterpolator::new(&xs, &ys, &vs)?;
        let lon: Vec<f64> = target.longitude.to_vec();
        let lat: Vec<f64> = target.latitude.to_vec();
        let interpolated = FlatArray::from(interpolator.interpolate(&lon, &lat));

        let missing = ValidityMask::from_invalid(interpolated.mapv(|v| v.is_nan()));
        let mask = target.mask.union(&missing)?;
        log::info!(
            "Interpolation left {} of {} target pixels valid",
            mask.valid_count(),
            mask.len()
        );

        Ok(GridMatch {
            interpolated,
            mask,
            control_points: xs.len(),
        })
    }

    /// Locate the target pixel nearest to `(lat0, lon0)` (planar distance in
    /// degrees) and aggregate the valid pixels of its window.
    pub fn match_point(&self, grid: &GridArray, lat0: f64, lon0: f64) -> ValResult<PointMatch> {
        let (rows, cols) = grid.dim();
        let (row, col) = nearest_pixel(grid, lat0, lon0)
            .ok_or_else(|| ValError::Geometry("Target grid has no finite coordinates".to_string()))?;

        let half = (self.window_size - 1) / 2;
        if row < half || col < half || row + half >= rows || col + half >= cols {
            return Err(ValError::Geometry(format!(
                "Boundary match at ({}, {}) in {}x{} grid, skipping",
                row, col, rows, cols
            )));
        }

        let window = s![row - half..=row + half, col - half..=col + half];
        let values: Vec<f64> = grid
            .values
            .slice(window)
            .iter()
            .zip(grid.flag.slice(window).iter())
            .filter(|(_, &f)| f == 0)
            .map(|(&v, _)| v)
            .collect();

        if values.is_empty() {
            return Err(ValError::Geometry(format!(
                "No valid pixels in the window around ({}, {})",
                row, col
            )));
        }

        let n = values.len() as f64;
        let mean_value = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / n;
        let cv = if mean_value == 0.0 {
            None
        } else {
            Some(variance.sqrt() / mean_value)
        };
        let valid_ratio = n / (self.window_size * self.window_size) as f64;

        log::debug!(
            "Point match at ({}, {}): mean {:.4}, valid ratio {:.4}",
            row,
            col,
            mean_value,
            valid_ratio
        );

        Ok(PointMatch {
            row,
            col,
            mean_value,
            valid_ratio,
            cv,
        })
    }
}

/// Index of the pixel centre with the smallest planar lat/lon distance
fn nearest_pixel(grid: &GridArray, lat0: f64, lon0: f64) -> Option<(usize, usize)> {
    grid.latitude
        .indexed_iter()
        .zip(grid.longitude.iter())
        .filter_map(|(((r, c), &lat), &lon)| {
            let d = (lat - lat0).powi(2) + (lon - lon0).powi(2);
            d.is_finite().then_some(((r, c), d))
        })
        .fold(None, |best: Option<((usize, usize), f64)>, (idx, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((idx, d)),
        })
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn regular_grid(rows: usize, cols: usize) -> GridArray {
        GridArray {
            values: Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f64),
            latitude: Array2::from_shape_fn((rows, cols), |(r, _)| 30.0 + r as f64 * 0.01),
            longitude: Array2::from_shape_fn((rows, cols), |(_, c)| 120.0 + c as f64 * 0.01),
            flag: Array2::zeros((rows, cols)),
        }
    }

    #[test]
    fn test_point_window_statistics() {
        let mut grid = regular_grid(5, 5);
        grid.flag[[1, 3]] = 1;
        grid.flag[[3, 1]] = 1;
        let matcher = SpatialMatcher::new(3).unwrap();

        let m = matcher.match_point(&grid, 30.021, 120.019).unwrap();
        assert_eq!((m.row, m.col), (2, 2));
        assert_abs_diff_eq!(m.valid_ratio, 7.0 / 9.0, epsilon = 1e-12);
        // window values 6,7,8,11,12,13,16,17,18 without 8 and 16
        let expected = (6.0 + 7.0 + 11.0 + 12.0 + 13.0 + 17.0 + 18.0) / 7.0;
        assert_abs_diff_eq!(m.mean_value, expected, epsilon = 1e-12);
        assert!(m.cv.unwrap() > 0.0);
    }

    #[test]
    fn test_point_boundary_is_skipped() {
        let grid = regular_grid(5, 5);
        let matcher = SpatialMatcher::new(3).unwrap();
        let result = matcher.match_point(&grid, 30.0, 120.02);
        assert!(matches!(result, Err(ValError::Geometry(_))));
    }

    #[test]
    fn test_point_zero_mean_has_no_cv() {
        let mut grid = regular_grid(5, 5);
        grid.values.fill(0.0);
        let m = SpatialMatcher::new(3).unwrap().match_point(&grid, 30.02, 120.02).unwrap();
        assert_eq!(m.cv, None);
        assert_eq!(m.valid_ratio, 1.0);
    }

    #[test]
    fn test_grid_match_accumulates_invalidity() {
        let src_lat = FlatArray::from(vec![0.0, 0.0, 1.0, 1.0]);
        let src_lon = FlatArray::from(vec![0.0, 1.0, 0.0, 1.0]);
        let src_val = FlatArray::from(vec![1.0, 2.0, 3.0, 4.0]);
        let src_mask = ValidityMask::all_valid(4);

        let tgt_lat = FlatArray::from(vec![0.5, 0.5, 2.0]);
        let tgt_lon = FlatArray::from(vec![0.5, 0.25, 0.5]);
        let mut invalid = ndarray::Array1::from_elem(3, false);
        invalid[1] = true;
        let tgt_mask = ValidityMask::from_invalid(invalid);

        let matcher = SpatialMatcher::new(3).unwrap();
        let m = matcher
            .match_grid(
                SwathView::new(&tgt_lat, &tgt_lon, &tgt_mask).unwrap(),
                SwathView::new(&src_lat, &src_lon, &src_mask).unwrap(),
                &src_val,
            )
            .unwrap();

        // bilinear field 1 + x + 2y at the square centre
        assert_abs_diff_eq!(m.interpolated[0], 2.5, epsilon = 1e-12);
        assert!(m.interpolated[2].is_nan());
        assert!(m.mask.is_valid(0));
        assert!(!m.mask.is_valid(1));
        assert!(!m.mask.is_valid(2));
        assert_eq!(m.control_points, 4);
    }

    #[test]
    fn test_grid_match_without_valid_sources_fails() {
        let lat = FlatArray::from(vec![0.0, 1.0, 2.0]);
        let lon = FlatArray::from(vec![0.0, 1.0, 0.0]);
        let vals = FlatArray::from(vec![f64::NAN; 3]);
        let mask = ValidityMask::all_valid(3);
        let view = SwathView::new(&lat, &lon, &mask).unwrap();
        let result = SpatialMatcher::new(3).unwrap().match_grid(view, view, &vals);
        assert!(matches!(result, Err(ValError::Geometry(_))));
    }
}
