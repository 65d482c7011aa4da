use crate::types::{Parameter, ValError, ValResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

/// Environment variable naming a JSON configuration file
pub const CONFIG_ENV_VAR: &str = "OCEANVAL_CONFIG";

/// Per-sensor quality and naming rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    /// Sensor name as it prefixes file names (HY3A, TERRA, ...)
    pub name: String,
    /// Raw flag bit positions that mark a pixel invalid
    pub flag_bits: Vec<u32>,
    /// Sensor-wide fill value for missing product data
    pub fill_value: Option<f64>,
    /// Target parameter -> this sensor's parameter (None = no counterpart)
    #[serde(default)]
    pub parameter_map: BTreeMap<Parameter, Option<Parameter>>,
}

impl SensorProfile {
    /// Primary target satellite profile (2-bit flag test)
    pub fn hy3a() -> Self {
        Self {
            name: "HY3A".to_string(),
            flag_bits: vec![8, 22],
            fill_value: Some(-999.0),
            parameter_map: BTreeMap::new(),
        }
    }

    /// MODIS on Aqua
    pub fn aqua() -> Self {
        Self::modis("AQUA")
    }

    /// MODIS on Terra
    pub fn terra() -> Self {
        Self::modis("TERRA")
    }

    /// VIIRS on Suomi-NPP
    pub fn snpp() -> Self {
        let mut map = Self::ocean_color_common();
        map.insert(Parameter::Rrs(412), Some(Parameter::Rrs(410)));
        map.insert(Parameter::Rrs(443), Some(Parameter::Rrs(443)));
        map.insert(Parameter::Rrs(490), Some(Parameter::Rrs(486)));
        map.insert(Parameter::Rrs(520), None);
        map.insert(Parameter::Rrs(565), Some(Parameter::Rrs(551)));
        map.insert(Parameter::Rrs(670), Some(Parameter::Rrs(671)));
        map.insert(Parameter::Ipar, None);
        Self::cross_sensor("SNPP", map)
    }

    /// VIIRS on NOAA-20
    pub fn jpss() -> Self {
        let mut map = Self::ocean_color_common();
        map.insert(Parameter::Rrs(412), Some(Parameter::Rrs(411)));
        map.insert(Parameter::Rrs(443), Some(Parameter::Rrs(445)));
        map.insert(Parameter::Rrs(490), Some(Parameter::Rrs(489)));
        map.insert(Parameter::Rrs(565), Some(Parameter::Rrs(556)));
        map.insert(Parameter::Rrs(670), Some(Parameter::Rrs(667)));
        map.insert(Parameter::Ipar, None);
        Self::cross_sensor("JPSS", map)
    }

    fn modis(name: &str) -> Self {
        let mut map = Self::ocean_color_common();
        map.insert(Parameter::Rrs(412), Some(Parameter::Rrs(412)));
        map.insert(Parameter::Rrs(443), Some(Parameter::Rrs(443)));
        map.insert(Parameter::Rrs(490), Some(Parameter::Rrs(488)));
        map.insert(Parameter::Rrs(520), Some(Parameter::Rrs(531)));
        map.insert(Parameter::Rrs(565), Some(Parameter::Rrs(555)));
        map.insert(Parameter::Rrs(670), Some(Parameter::Rrs(667)));
        map.insert(Parameter::Ipar, Some(Parameter::Ipar));
        Self::cross_sensor(name, map)
    }

    fn ocean_color_common() -> BTreeMap<Parameter, Option<Parameter>> {
        let mut map = BTreeMap::new();
        map.insert(Parameter::Rrs(750), None);
        map.insert(Parameter::Rrs(865), None);
        for param in [Parameter::Sst, Parameter::Aot, Parameter::Chl, Parameter::Kd] {
            map.insert(param, Some(param));
        }
        map
    }

    fn cross_sensor(name: &str, parameter_map: BTreeMap<Parameter, Option<Parameter>>) -> Self {
        Self {
            name: name.to_string(),
            flag_bits: vec![0, 3, 4, 6, 22, 24],
            fill_value: None,
            parameter_map,
        }
    }

    /// Translate a target parameter into this sensor's naming.
    ///
    /// Returns `None` both for explicit "no counterpart" entries and for
    /// parameters absent from the table.
    pub fn map_parameter(&self, target: Parameter) -> Option<Parameter> {
        self.parameter_map.get(&target).copied().flatten()
    }
}

/// Product-specific sentinel values, applied on top of the sensor fill value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSentinels {
    pub values: BTreeMap<Parameter, f64>,
}

impl Default for ProductSentinels {
    fn default() -> Self {
        let mut values = BTreeMap::new();
        values.insert(Parameter::Ipar, -717.002197265625);
        Self { values }
    }
}

impl ProductSentinels {
    pub fn get(&self, parameter: Parameter) -> Option<f64> {
        self.values.get(&parameter).copied()
    }
}

/// Complete configuration of a validation batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Product under validation
    pub target: SensorProfile,
    /// Satellite reference sensors
    pub sources: Vec<SensorProfile>,
    /// Product sentinel table
    pub product_sentinels: ProductSentinels,
    /// Neighbourhood / extraction window (odd, >= 3)
    pub window_size: usize,
    /// Maximum accepted |target - source| time difference
    pub time_threshold_hours: f64,
    /// Pass 1 invalid-fraction threshold
    pub majority_threshold: f64,
    /// Pass 2 coefficient of variation threshold
    pub dispersion_cv_threshold: f64,
    /// Source value excluded from statistics
    pub source_fill_value: f64,
    /// Row counts tried by shape inference
    pub shape_row_range: Range<usize>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            target: SensorProfile::hy3a(),
            sources: vec![
                SensorProfile::aqua(),
                SensorProfile::terra(),
                SensorProfile::snpp(),
                SensorProfile::jpss(),
            ],
            product_sentinels: ProductSentinels::default(),
            window_size: 5,
            time_threshold_hours: 3.0,
            majority_threshold: 0.5,
            dispersion_cv_threshold: 0.15,
            source_fill_value: -999.0,
            shape_row_range: 1000..6000,
        }
    }
}

impl ValidationConfig {
    /// Load and validate a JSON configuration; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ValResult<Self> {
        log::info!("Loading validation config from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ValidationConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Use the file named by `OCEANVAL_CONFIG` when set, defaults otherwise
    pub fn from_env_or_default() -> ValResult<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_json_file(path.trim()),
            _ => {
                log::debug!("{} not set, using default configuration", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> ValResult<()> {
        if self.window_size < 3 || self.window_size % 2 == 0 {
            return Err(ValError::Config(format!(
                "Window size must be odd and at least 3, got {}",
                self.window_size
            )));
        }
        if !(self.time_threshold_hours >= 0.0) {
            return Err(ValError::Config(format!(
                "Time threshold must be non-negative, got {}",
                self.time_threshold_hours
            )));
        }
        if !(0.0..=1.0).contains(&self.majority_threshold) {
            return Err(ValError::Config(format!(
                "Majority threshold must lie in [0, 1], got {}",
                self.majority_threshold
            )));
        }
        if !(self.dispersion_cv_threshold >= 0.0) {
            return Err(ValError::Config(format!(
                "Dispersion CV threshold must be non-negative, got {}",
                self.dispersion_cv_threshold
            )));
        }
        if self.shape_row_range.is_empty() || self.shape_row_range.start == 0 {
            return Err(ValError::Config(format!(
                "Invalid shape row range {:?}",
                self.shape_row_range
            )));
        }
        Ok(())
    }

    /// Profile for a named satellite reference
    pub fn source_profile(&self, name: &str) -> ValResult<&SensorProfile> {
        self.sources
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ValError::Config(format!("No sensor profile for source {}", name)))
    }

    /// Profile for any sensor name, target included
    pub fn profile(&self, name: &str) -> Option<&SensorProfile> {
        if self.target.name == name {
            Some(&self.target)
        } else {
            self.sources.iter().find(|p| p.name == name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ValidationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target.flag_bits, vec![8, 22]);
        assert_eq!(config.source_profile("TERRA").unwrap().flag_bits.len(), 6);
    }

    #[test]
    fn test_parameter_mapping() {
        let config = ValidationConfig::default();
        let aqua = config.source_profile("AQUA").unwrap();
        let snpp = config.source_profile("SNPP").unwrap();

        assert_eq!(aqua.map_parameter(Parameter::Rrs(490)), Some(Parameter::Rrs(488)));
        assert_eq!(snpp.map_parameter(Parameter::Ipar), None);
        assert_eq!(aqua.map_parameter(Parameter::Rrs(865)), None);
        assert_eq!(aqua.map_parameter(Parameter::Tsm), None);
        assert!(config.source_profile("GOCI").is_err());
    }

    #[test]
    fn test_rejects_even_window() {
        let config = ValidationConfig {
            window_size: 4,
            ..ValidationConfig::default()
        };
        assert!(matches!(config.validate(), Err(ValError::Config(_))));
    }

    #[test]
    fn test_json_roundtrip_keeps_parameter_names() {
        let config = ValidationConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"Rrs490\":\"Rrs488\""));

        let parsed: ValidationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let partial: ValidationConfig = serde_json::from_str(r#"{"window_size": 3}"#).unwrap();
        assert_eq!(partial.window_size, 3);
        assert_eq!(partial.target.name, "HY3A");
    }
}
