//! Python bindings (feature `python`)

use crate::config::{ProductSentinels, SensorProfile, ValidationConfig};
use crate::core::flag::{FlagEngine, FlagParams, ProductLayer};
use crate::core::grid;
use crate::core::histogram::difference_classes;
use crate::core::validate::{DifferenceMetric, Statistics};
use crate::types::{FlatArray, Parameter};
use numpy::{PyReadonlyArray1, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn parse_parameter(token: &str) -> PyResult<Parameter> {
    Parameter::from_token(token).ok_or_else(|| PyValueError::new_err(format!("Unknown parameter: {}", token)))
}

fn profile_for(sensor: &str) -> PyResult<SensorProfile> {
    ValidationConfig::default()
        .profile(sensor)
        .cloned()
        .ok_or_else(|| PyValueError::new_err(format!("Unknown sensor: {}", sensor)))
}

/// Validity mask (1 = invalid) of one swath
#[pyfunction]
#[pyo3(signature = (sensor, products, raw_flag=None, window_size=5))]
fn validity_mask(
    py: Python,
    sensor: String,
    products: Vec<(String, PyReadonlyArray1<f64>)>,
    raw_flag: Option<PyReadonlyArray1<i64>>,
    window_size: usize,
) -> PyResult<PyObject> {
    let profile = profile_for(&sensor)?;
    let engine = FlagEngine::new(FlagParams {
        window_size,
        ..FlagParams::default()
    })
    .map_err(|e| PyValueError::new_err(format!("{}", e)))?;

    let arrays: Vec<(Parameter, FlatArray)> = products
        .iter()
        .map(|(name, values)| Ok((parse_parameter(name)?, values.as_array().to_owned())))
        .collect::<PyResult<_>>()?;
    let layers: Vec<ProductLayer<'_>> = arrays
        .iter()
        .map(|(parameter, values)| ProductLayer {
            parameter: *parameter,
            values,
        })
        .collect();
    let raw = raw_flag.map(|f| f.as_array().to_owned());

    let outcome = engine
        .compute_mask(raw.as_ref(), &layers, &profile, &ProductSentinels::default())
        .map_err(|e| PyRuntimeError::new_err(format!("Mask computation failed: {}", e)))?;

    Ok(outcome.mask.to_flag_array().to_pyarray(py).into())
}

/// `(rows, cols)` of a flattened swath
#[pyfunction]
fn infer_shape(flat_length: usize) -> PyResult<(usize, usize)> {
    grid::infer_shape(flat_length).map_err(|e| PyValueError::new_err(format!("{}", e)))
}

/// Bias, STD, RMS, R and the difference histogram of paired values
#[pyfunction]
fn difference_statistics(
    py: Python,
    target: PyReadonlyArray1<f64>,
    source: PyReadonlyArray1<f64>,
    parameter: String,
) -> PyResult<PyObject> {
    let parameter = parse_parameter(&parameter)?;
    let target = target.as_array();
    let source = source.as_array();
    if target.len() != source.len() {
        return Err(PyValueError::new_err(format!(
            "Length mismatch: {} targets, {} sources",
            target.len(),
            source.len()
        )));
    }

    let metric = DifferenceMetric::for_parameter(parameter);
    let (mut t, mut s, mut diffs) = (Vec::new(), Vec::new(), Vec::new());
    for (&tv, &sv) in target.iter().zip(source.iter()) {
        if let Some(d) = metric.difference(tv, sv) {
            t.push(tv);
            s.push(sv);
            diffs.push(d);
        }
    }
    let stats = Statistics::from_pairs(&t, &s);
    let histogram = difference_classes(parameter, &diffs);

    let result = PyDict::new(py);
    result.set_item("bias", stats.bias)?;
    result.set_item("std", stats.std)?;
    result.set_item("rms", stats.rms)?;
    result.set_item("R", stats.correlation)?;
    result.set_item("effective_pixel_count", t.len())?;
    result.set_item("histogram_labels", histogram.bins.iter().map(|b| b.label.clone()).collect::<Vec<_>>())?;
    result.set_item("histogram_counts", histogram.counts())?;
    Ok(result.into())
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(validity_mask, m)?)?;
    m.add_function(wrap_pyfunction!(infer_shape, m)?)?;
    m.add_function(wrap_pyfunction!(difference_statistics, m)?)?;
    Ok(())
}
