use crate::types::{FlatArray, Parameter, RawFlagArray, ValError, ValResult, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use ndarray::Array1;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Display;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// What a per-variable product file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    Product(Parameter),
    Latitude,
    Longitude,
    /// Raw sensor quality bitmask
    Flag,
    /// Derived 0/1 validity array (1 = invalid)
    Mask,
}

impl Variable {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "lat" | "latitude" => Some(Variable::Latitude),
            "lon" | "longitude" => Some(Variable::Longitude),
            "flag" => Some(Variable::Flag),
            "flag1" => Some(Variable::Mask),
            _ => Parameter::from_token(token).map(Variable::Product),
        }
    }

    pub fn file_token(&self) -> String {
        match self {
            Variable::Product(p) => p.file_token(),
            Variable::Latitude => "lat".to_string(),
            Variable::Longitude => "lon".to_string(),
            Variable::Flag => "flag".to_string(),
            Variable::Mask => "flag1".to_string(),
        }
    }
}

static OBSERVATION_NAME_RE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9]+)_(.+)_(\d{14})\.txt$"));

/// A `<sensor>_<variable>_<YYYYmmddHHMMSS>.txt` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationFile {
    pub sensor: String,
    pub variable: Variable,
    pub timestamp: NaiveDateTime,
    pub path: PathBuf,
}

impl ObservationFile {
    /// Parse a path whose file name follows the product grammar
    pub fn parse(path: &Path) -> ValResult<Option<Self>> {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return Ok(None),
        };
        let re = OBSERVATION_NAME_RE
            .as_ref()
            .map_err(|e| ValError::Processing(format!("Regex error: {}", e)))?;
        let caps = match re.captures(name) {
            Some(c) => c,
            None => return Ok(None),
        };

        let variable = match Variable::from_token(&caps[2]) {
            Some(v) => v,
            None => return Ok(None),
        };
        let timestamp = NaiveDateTime::parse_from_str(&caps[3], TIMESTAMP_FORMAT)
            .map_err(|e| ValError::InvalidFormat(format!("Bad timestamp in {}: {}", name, e)))?;

        Ok(Some(Self {
            sensor: caps[1].to_string(),
            variable,
            timestamp,
            path: path.to_path_buf(),
        }))
    }

    pub fn time_tag(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// File name for one variable of one sensor swath
pub fn observation_file_name(sensor: &str, variable: Variable, timestamp: &NaiveDateTime) -> String {
    format!(
        "{}_{}_{}.txt",
        sensor,
        variable.file_token(),
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

fn tokens(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .flat_map(|(lineno, line)| line.split_whitespace().map(move |t| (lineno + 1, t)))
}

/// Read a flat float array; multi-column rows are flattened row-major
pub fn read_flat_array<P: AsRef<Path>>(path: P) -> ValResult<FlatArray> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let values = tokens(&content)
        .map(|(lineno, t)| {
            t.parse::<f64>().map_err(|e| {
                ValError::InvalidFormat(format!("{}:{}: bad value {:?}: {}", path.display(), lineno, t, e))
            })
        })
        .collect::<ValResult<Vec<f64>>>()?;
    log::debug!("Read {} values from {}", values.len(), path.display());
    Ok(Array1::from(values))
}

/// Read a raw bitmask array; integral float spellings (`8.0`) are accepted
pub fn read_flag_array<P: AsRef<Path>>(path: P) -> ValResult<RawFlagArray> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let values = tokens(&content)
        .map(|(lineno, t)| {
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i64))
                .ok_or_else(|| {
                    ValError::InvalidFormat(format!("{}:{}: bad flag {:?}", path.display(), lineno, t))
                })
        })
        .collect::<ValResult<Vec<i64>>>()?;
    Ok(Array1::from(values))
}

/// Write one value per line with a fixed number of decimals
pub fn write_flat_array<P: AsRef<Path>>(path: P, values: &FlatArray, decimals: usize) -> ValResult<()> {
    let file = std::fs::File::create(path.as_ref())?;
    let mut out = BufWriter::new(file);
    for v in values.iter() {
        if v.is_nan() {
            writeln!(out, "nan")?;
        } else {
            writeln!(out, "{:.*}", decimals, v)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Write one displayable item per line
pub fn write_lines<P: AsRef<Path>, T: Display>(path: P, values: impl IntoIterator<Item = T>) -> ValResult<()> {
    let file = std::fs::File::create(path.as_ref())?;
    let mut out = BufWriter::new(file);
    for v in values {
        writeln!(out, "{}", v)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_observation_file_names() {
        let f = ObservationFile::parse(Path::new("/data/HY3A_chl_a_20241106023000.txt"))
            .unwrap()
            .unwrap();
        assert_eq!(f.sensor, "HY3A");
        assert_eq!(f.variable, Variable::Product(Parameter::Chl));
        assert_eq!(f.time_tag(), "20241106023000");

        let lat = ObservationFile::parse(Path::new("AQUA_Lat_20241106030000.txt")).unwrap().unwrap();
        assert_eq!(lat.variable, Variable::Latitude);
        let mask = ObservationFile::parse(Path::new("AQUA_flag1_20241106030000.txt")).unwrap().unwrap();
        assert_eq!(mask.variable, Variable::Mask);

        for other in [
            "timeresult_HY3A_AQUA_sst_20241106023000.txt",
            "HY3A_flag1_sst_20241106023000.txt",
            "XC_sst_20241106.txt",
            "notes.md",
        ] {
            assert!(ObservationFile::parse(Path::new(other)).unwrap().is_none(), "{}", other);
        }
    }

    #[test]
    fn test_read_write_arrays() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("HY3A_sst_20241106023000.txt");
        std::fs::write(&path, "1.5\n2.25\tnan\n\n-999\n").unwrap();
        let values = read_flat_array(&path).unwrap();
        assert_eq!(values.len(), 4);
        assert!(values[2].is_nan());

        let out = dir.path().join("copy.txt");
        write_flat_array(&out, &values, 6).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(text.lines().next(), Some("1.500000"));
        assert_eq!(text.lines().nth(2), Some("nan"));

        let flags = dir.path().join("HY3A_flag_20241106023000.txt");
        std::fs::write(&flags, "0\n256\n4194304.0\n").unwrap();
        assert_eq!(read_flag_array(&flags).unwrap().to_vec(), vec![0, 256, 4194304]);
        std::fs::write(&flags, "0\nx\n").unwrap();
        assert!(matches!(read_flag_array(&flags), Err(ValError::InvalidFormat(_))));
    }
}
