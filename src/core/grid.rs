use crate::types::{check_length, ValError, ValResult};
use ndarray::{Array1, Array2};
use std::ops::Range;

/// Row counts scanned by [`infer_shape`].
///
/// This range is a compatibility contract with the swath layouts the
/// extraction collaborator produces: downstream files are indexed with the
/// row width chosen here, so the bound must not be widened or replaced by a
/// general factorization.
pub const SWATH_ROW_RANGE: Range<usize> = 1000..6000;

/// Infer `(rows, cols)` of a flattened swath using the default row range
pub fn infer_shape(flat_length: usize) -> ValResult<(usize, usize)> {
    infer_shape_in(flat_length, SWATH_ROW_RANGE)
}

/// Return the first row count in `rows` (ascending) dividing `flat_length`
pub fn infer_shape_in(flat_length: usize, rows: Range<usize>) -> ValResult<(usize, usize)> {
    if flat_length == 0 {
        return Err(ValError::ShapeInference { len: 0 });
    }
    rows.filter(|&r| r > 0)
        .find(|&r| flat_length % r == 0)
        .map(|r| (r, flat_length / r))
        .ok_or(ValError::ShapeInference { len: flat_length })
}

/// Reshape a flat row-major array into `rows x cols`
pub fn reshape<T: Clone>(flat: &Array1<T>, rows: usize, cols: usize) -> ValResult<Array2<T>> {
    check_length("reshape", rows * cols, flat.len())?;
    Array2::from_shape_vec((rows, cols), flat.to_vec())
        .map_err(|e| ValError::Processing(format!("Failed to reshape array: {}", e)))
}

/// Flatten a 2-D grid back to row-major order
pub fn flatten<T: Clone>(grid: &Array2<T>) -> Array1<T> {
    grid.iter().cloned().collect()
}

/// Value/lat/lon/flag quadruple laid out as a 2-D swath
#[derive(Debug, Clone)]
pub struct GridArray {
    pub values: Array2<f64>,
    pub latitude: Array2<f64>,
    pub longitude: Array2<f64>,
    /// Validity flags, 1 = invalid
    pub flag: Array2<u8>,
}

impl GridArray {
    /// Build a grid from flat companion arrays sharing one pixel index space.
    ///
    /// The shape is inferred from the value count with `rows`.
    pub fn from_flat(
        values: &Array1<f64>,
        latitude: &Array1<f64>,
        longitude: &Array1<f64>,
        flag: &Array1<u8>,
        rows: Range<usize>,
    ) -> ValResult<Self> {
        let n = values.len();
        check_length("latitude", n, latitude.len())?;
        check_length("longitude", n, longitude.len())?;
        check_length("flag", n, flag.len())?;

        let (r, c) = infer_shape_in(n, rows)?;
        log::debug!("Reshaping {} pixels into {}x{} swath", n, r, c);

        Ok(Self {
            values: reshape(values, r, c)?,
            latitude: reshape(latitude, r, c)?,
            longitude: reshape(longitude, r, c)?,
            flag: reshape(flag, r, c)?,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }
}
