use chrono::NaiveDateTime;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp layout shared by every file name and result record
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Flat per-pixel value array
pub type FlatArray = Array1<f64>;

/// Flat per-pixel raw quality bitmask
pub type RawFlagArray = Array1<i64>;

/// Geophysical parameter carried by an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Parameter {
    /// Remote-sensing reflectance at a band centre (nm)
    Rrs(u16),
    /// Sea surface temperature
    Sst,
    /// Aerosol optical thickness
    Aot,
    /// Chlorophyll-a concentration
    Chl,
    /// Diffuse attenuation coefficient
    Kd,
    /// Instantaneous photosynthetically available radiation
    Ipar,
    /// Normalized water-leaving radiance
    Nlw,
    /// Coloured dissolved organic matter
    Cdom,
    /// Total suspended matter
    Tsm,
}

impl Parameter {
    /// Parse a parameter token as it appears in file names.
    ///
    /// Matching is case-insensitive; `chl_a` is the file spelling of `chl`.
    pub fn from_token(token: &str) -> Option<Self> {
        let lower = token.to_ascii_lowercase();
        if let Some(band) = lower.strip_prefix("rrs") {
            return band.parse::<u16>().ok().map(Parameter::Rrs);
        }
        match lower.as_str() {
            "sst" => Some(Parameter::Sst),
            "aot" => Some(Parameter::Aot),
            "chl" | "chl_a" => Some(Parameter::Chl),
            "kd" => Some(Parameter::Kd),
            "ipar" => Some(Parameter::Ipar),
            "nlw" => Some(Parameter::Nlw),
            "cdom" => Some(Parameter::Cdom),
            "tsm" => Some(Parameter::Tsm),
            _ => None,
        }
    }

    /// Token used when this parameter is written into a product file name
    pub fn file_token(&self) -> String {
        match self {
            Parameter::Chl => "chl_a".to_string(),
            other => other.to_string(),
        }
    }

    /// Physical units written into validation headers
    pub fn units(&self) -> &'static str {
        match self {
            Parameter::Chl => "mg/m3",
            Parameter::Aot => "NA",
            Parameter::Tsm => "mg/L",
            Parameter::Cdom => "1/m",
            Parameter::Sst => "C",
            _ => "1/sr",
        }
    }

    /// Temperature-like products are compared by absolute difference
    pub fn is_temperature_like(&self) -> bool {
        matches!(self, Parameter::Sst)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Rrs(band) => write!(f, "Rrs{}", band),
            Parameter::Sst => write!(f, "sst"),
            Parameter::Aot => write!(f, "AOT"),
            Parameter::Chl => write!(f, "chl"),
            Parameter::Kd => write!(f, "Kd"),
            Parameter::Ipar => write!(f, "ipar"),
            Parameter::Nlw => write!(f, "nLw"),
            Parameter::Cdom => write!(f, "CDOM"),
            Parameter::Tsm => write!(f, "TSM"),
        }
    }
}

impl FromStr for Parameter {
    type Err = ValError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parameter::from_token(s)
            .ok_or_else(|| ValError::InvalidFormat(format!("Unknown parameter: {}", s)))
    }
}

impl TryFrom<String> for Parameter {
    type Error = ValError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Parameter> for String {
    fn from(value: Parameter) -> Self {
        value.to_string()
    }
}

/// Kind of reference the target product is validated against
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    /// Another satellite swath, named by its sensor
    Satellite(String),
    /// Ground station / buoy readings
    InSitu,
}

impl SourceKind {
    /// Tag used in result file names
    pub fn tag(&self) -> &str {
        match self {
            SourceKind::Satellite(name) => name,
            SourceKind::InSitu => "XC",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Identity of one sensor/product/timestamp instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationId {
    pub sensor: String,
    pub parameter: Parameter,
    pub timestamp: NaiveDateTime,
}

impl ObservationId {
    pub fn new(sensor: impl Into<String>, parameter: Parameter, timestamp: NaiveDateTime) -> Self {
        Self {
            sensor: sensor.into(),
            parameter,
            timestamp,
        }
    }

    /// Timestamp in file-name layout
    pub fn time_tag(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Name of the product file this identity was read from
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.txt", self.sensor, self.parameter.file_token(), self.time_tag())
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.sensor, self.parameter, self.time_tag())
    }
}

/// One swath of a product with its coordinates and optional raw flags.
///
/// All arrays share the same flat pixel index space.
#[derive(Debug, Clone)]
pub struct Observation {
    pub id: ObservationId,
    pub values: FlatArray,
    pub latitude: FlatArray,
    pub longitude: FlatArray,
    pub raw_flag: Option<RawFlagArray>,
}

impl Observation {
    /// Assemble an observation, rejecting companion arrays of another length
    pub fn new(
        id: ObservationId,
        values: FlatArray,
        latitude: FlatArray,
        longitude: FlatArray,
        raw_flag: Option<RawFlagArray>,
    ) -> ValResult<Self> {
        let expected = values.len();
        check_length("latitude", expected, latitude.len())?;
        check_length("longitude", expected, longitude.len())?;
        if let Some(flag) = &raw_flag {
            check_length("raw flag", expected, flag.len())?;
        }

        Ok(Self {
            id,
            values,
            latitude,
            longitude,
            raw_flag,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Return `LengthMismatch` unless both lengths agree
pub fn check_length(what: &str, expected: usize, actual: usize) -> ValResult<()> {
    if expected != actual {
        return Err(ValError::LengthMismatch {
            what: what.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Error types for cross-validation processing
#[derive(Debug, thiserror::Error)]
pub enum ValError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("No row count in the supported range divides {len} pixels")]
    ShapeInference { len: usize },

    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for cross-validation operations
pub type ValResult<T> = Result<T, ValError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parameter_tokens() {
        assert_eq!(Parameter::from_token("Rrs443"), Some(Parameter::Rrs(443)));
        assert_eq!(Parameter::from_token("chl_a"), Some(Parameter::Chl));
        assert_eq!(Parameter::from_token("Chl"), Some(Parameter::Chl));
        assert_eq!(Parameter::from_token("SST"), Some(Parameter::Sst));
        assert_eq!(Parameter::from_token("lat"), None);
        assert_eq!(Parameter::from_token("Rrsabc"), None);

        assert_eq!(Parameter::Chl.file_token(), "chl_a");
        assert_eq!(Parameter::Nlw.to_string(), "nLw");
        assert!(Parameter::Sst.is_temperature_like());
        assert!(!Parameter::Rrs(490).is_temperature_like());
    }

    #[test]
    fn test_observation_rejects_mismatched_coordinates() {
        let ts = NaiveDate::from_ymd_opt(2024, 11, 6)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let id = ObservationId::new("HY3A", Parameter::Sst, ts);
        assert_eq!(id.file_name(), "HY3A_sst_20241106023000.txt");

        let result = Observation::new(
            id,
            Array1::zeros(4),
            Array1::zeros(3),
            Array1::zeros(4),
            None,
        );
        assert!(matches!(
            result,
            Err(ValError::LengthMismatch { expected: 4, actual: 3, .. })
        ));
    }
}
