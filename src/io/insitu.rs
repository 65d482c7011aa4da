use crate::types::{Parameter, ValError, ValResult, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::path::Path;

/// Prefix of raw in-situ reference files
pub const INSITU_PREFIX: &str = "XC_";
/// Prefix of flag-screened in-situ reference files
pub const SCREENED_PREFIX: &str = "XCf_";

/// Single timed reading of a ground station or buoy
#[derive(Debug, Clone, PartialEq)]
pub struct InSituRecord {
    pub timestamp: NaiveDateTime,
    pub value: f64,
    /// Quality flag column, 1 = rejected
    pub flag: Option<i64>,
}

/// One in-situ reference file: station position plus its timed readings
#[derive(Debug, Clone, PartialEq)]
pub struct InSituSeries {
    pub file_name: String,
    pub parameter: Parameter,
    pub latitude: f64,
    pub longitude: f64,
    /// Column header line following `Data:`
    pub header: String,
    pub records: Vec<InSituRecord>,
}

impl InSituSeries {
    /// Read and parse an in-situ file; the parameter comes from its name
    pub fn from_file<P: AsRef<Path>>(path: P) -> ValResult<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ValError::InvalidFormat(format!("Bad in-situ path: {}", path.display())))?
            .to_string();
        let content = std::fs::read_to_string(path)?;
        Self::parse(&file_name, &content)
    }

    /// Parse the preamble (`Latitude:`, `Longitude:`, `Data:`), the column
    /// header and `date time value [flag]` rows.
    pub fn parse(file_name: &str, content: &str) -> ValResult<Self> {
        let parameter = insitu_parameter(file_name)?;

        let mut latitude = None;
        let mut longitude = None;
        let mut lines = content.lines();

        for line in lines.by_ref() {
            let line = line.trim();
            if line.starts_with("Data:") {
                break;
            }
            if let Some(v) = line.strip_prefix("Latitude:") {
                latitude = Some(parse_coordinate(v, "Latitude", file_name)?);
            } else if let Some(v) = line.strip_prefix("Longitude:") {
                longitude = Some(parse_coordinate(v, "Longitude", file_name)?);
            }
        }

        let latitude = latitude
            .ok_or_else(|| ValError::InvalidFormat(format!("{}: missing Latitude", file_name)))?;
        let longitude = longitude
            .ok_or_else(|| ValError::InvalidFormat(format!("{}: missing Longitude", file_name)))?;

        let mut header = String::new();
        for line in lines.by_ref() {
            if !line.trim().is_empty() {
                header = line.trim().to_string();
                break;
            }
        }

        let mut records = Vec::new();
        for (lineno, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_row(line) {
                Some(record) => records.push(record),
                None => log::warn!("{}: skipping malformed data row {}: {:?}", file_name, lineno + 1, line),
            }
        }

        log::debug!(
            "Parsed {} in-situ rows from {} at ({}, {})",
            records.len(),
            file_name,
            latitude,
            longitude
        );

        Ok(Self {
            file_name: file_name.to_string(),
            parameter,
            latitude,
            longitude,
            header,
            records,
        })
    }

    /// Copy without rows whose flag column is 1, named as a screened file
    pub fn screened(&self) -> Self {
        let records: Vec<InSituRecord> = self
            .records
            .iter()
            .filter(|r| r.flag != Some(1))
            .cloned()
            .collect();
        let dropped = self.records.len() - records.len();
        if dropped > 0 {
            log::info!("{}: dropped {} flagged rows", self.file_name, dropped);
        }
        Self {
            file_name: screened_file_name(&self.file_name),
            records,
            ..self.clone()
        }
    }

    /// Serialize in the same layout [`InSituSeries::parse`] reads
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Latitude: {}", self.latitude);
        let _ = writeln!(out, "Longitude: {}", self.longitude);
        let _ = writeln!(out, "Data:");
        let _ = writeln!(out, "{}", self.header);
        for r in &self.records {
            let _ = write!(
                out,
                "{}\t{}\t{}",
                r.timestamp.format("%Y%m%d"),
                r.timestamp.format("%H%M%S"),
                r.value
            );
            if let Some(flag) = r.flag {
                let _ = write!(out, "\t{}", flag);
            }
            out.push('\n');
        }
        out
    }

    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> ValResult<std::path::PathBuf> {
        let path = dir.as_ref().join(&self.file_name);
        std::fs::write(&path, self.to_text())?;
        Ok(path)
    }
}

/// `XC_<param>_<date>.txt` -> `XCf_<param>_<date>.txt`
pub fn screened_file_name(file_name: &str) -> String {
    match file_name.strip_prefix(INSITU_PREFIX) {
        Some(rest) => format!("{}{}", SCREENED_PREFIX, rest),
        None => file_name.to_string(),
    }
}

static INSITU_NAME_RE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"^XCf?_(.+)_\d+\.txt$"));

/// Parameter token of an in-situ file name
fn insitu_parameter(file_name: &str) -> ValResult<Parameter> {
    let re = INSITU_NAME_RE
        .as_ref()
        .map_err(|e| ValError::Processing(format!("Regex error: {}", e)))?;
    re.captures(file_name)
        .and_then(|c| c.get(1))
        .and_then(|m| Parameter::from_token(m.as_str()))
        .ok_or_else(|| ValError::InvalidFormat(format!("Not an in-situ file name: {}", file_name)))
}

fn parse_coordinate(text: &str, what: &str, file_name: &str) -> ValResult<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|e| ValError::InvalidFormat(format!("{}: bad {} {:?}: {}", file_name, what, text.trim(), e)))
}

fn parse_row(line: &str) -> Option<InSituRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return None;
    }
    let timestamp = parse_row_time(fields[0], fields[1])?;
    let value = fields[2].parse::<f64>().ok()?;
    let flag = match fields.get(3) {
        Some(f) => Some(f.parse::<f64>().ok()? as i64),
        None => None,
    };
    Some(InSituRecord { timestamp, value, flag })
}

/// Join a date and a time field; times shorter than six digits are zero-padded
pub fn parse_row_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date: String = date.chars().filter(|c| c.is_ascii_digit()).collect();
    let time: String = time.chars().filter(|c| c.is_ascii_digit()).collect();
    if date.len() != 8 || time.is_empty() || time.len() > 6 {
        return None;
    }
    let stamp = format!("{}{:0>6}", date, time);
    NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).ok()
}
