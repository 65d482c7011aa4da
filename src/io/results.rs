//! Text records exchanged with the reporting side: temporal and spatial
//! match results, validation rows and statistic summaries.

use crate::core::histogram::Histogram;
use crate::core::space_match::PointMatch;
use crate::core::time_match::{MatchCandidate, MatchedSource};
use crate::core::validate::{RowPosition, ValidationRecord};
use crate::types::{Parameter, ValError, ValResult, TIMESTAMP_FORMAT};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const HEADER_BEGIN: &str = "/begin header";
pub const HEADER_END: &str = "/end header";
pub const EFFECTIVE_COUNT_KEY: &str = "Effective pixel count";
pub const TOTAL_COUNT_KEY: &str = "Total pixel count";

/// Identity shared by every result file of one candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    pub target: String,
    /// Source sensor name or the in-situ tag
    pub source: String,
    pub parameter: Parameter,
    /// Target timestamp in file-name layout
    pub time_tag: String,
}

impl ResultKey {
    pub fn new(target: impl Into<String>, source: impl Into<String>, parameter: Parameter, time_tag: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
            parameter,
            time_tag: time_tag.into(),
        }
    }

    fn file_name(&self, kind: &str) -> String {
        format!(
            "{}_{}_{}_{}_{}.txt",
            kind,
            self.target,
            self.source,
            self.parameter.file_token(),
            self.time_tag
        )
    }

    pub fn time_result_name(&self) -> String {
        self.file_name("timeresult")
    }

    pub fn space_result_name(&self) -> String {
        self.file_name("spaceresult")
    }

    pub fn validation_name(&self) -> String {
        self.file_name("valresult")
    }

    pub fn statistic_name(&self) -> String {
        self.file_name("statistic")
    }

    /// Target mask after interpolating one source, keyed like every other result
    pub fn updated_mask_name(&self) -> String {
        format!(
            "{}_flag1_{}_{}_{}.txt",
            self.target,
            self.source,
            self.parameter.file_token(),
            self.time_tag
        )
    }
}

/// Interpolated source values on the target grid
pub fn interpolated_name(source: &str, source_parameter: Parameter, source_time_tag: &str) -> String {
    format!("{}1_{}_{}.txt", source, source_parameter.file_token(), source_time_tag)
}

/// Per (target, source, parameter) classification summary
pub fn classification_name(target: &str, source: &str, parameter: Parameter) -> String {
    format!("classification_{}_{}_{}.txt", target, source, parameter.file_token())
}

/// Render an optional figure, `nan` when undefined
pub fn format_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*}", decimals, v),
        _ => "nan".to_string(),
    }
}

/// Create an empty marker file (no correspondence or a skipped match)
pub fn write_empty<P: AsRef<Path>>(dir: P, name: &str) -> ValResult<PathBuf> {
    let path = dir.as_ref().join(name);
    std::fs::write(&path, "")?;
    Ok(path)
}

/// Temporal result: target file, source file, [reference time,] delta
pub fn time_result_text(candidate: &MatchCandidate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", candidate.target.file_name());
    let _ = writeln!(out, "{}", candidate.source_file_name());
    if matches!(candidate.source, MatchedSource::InSitu { .. }) {
        let _ = writeln!(out, "{}", candidate.source_time().format(TIMESTAMP_FORMAT));
    }
    let _ = writeln!(out, "{:.1}", candidate.time_delta_hours);
    out
}

/// Write the temporal result, or an empty file when nothing matched
pub fn write_time_result<P: AsRef<Path>>(dir: P, key: &ResultKey, candidate: Option<&MatchCandidate>) -> ValResult<PathBuf> {
    let path = dir.as_ref().join(key.time_result_name());
    let text = candidate.map(time_result_text).unwrap_or_default();
    std::fs::write(&path, text)?;
    Ok(path)
}

/// Parsed temporal result
#[derive(Debug, Clone, PartialEq)]
pub struct TimeResult {
    pub target_file: String,
    pub source_file: String,
    pub reference_time: Option<String>,
    pub time_delta_hours: f64,
}

/// Read a temporal result; `None` for the empty no-match marker
pub fn read_time_result<P: AsRef<Path>>(path: P) -> ValResult<Option<TimeResult>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let lines: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let bad = || ValError::InvalidFormat(format!("Malformed time result {}", path.as_ref().display()));

    let (reference_time, delta) = match lines.len() {
        0 => return Ok(None),
        3 => (None, lines[2]),
        4 => (Some(lines[2].to_string()), lines[3]),
        _ => return Err(bad()),
    };
    Ok(Some(TimeResult {
        target_file: lines[0].to_string(),
        source_file: lines[1].to_string(),
        reference_time,
        time_delta_hours: delta.parse().map_err(|_| bad())?,
    }))
}

/// Grid-to-grid spatial result: target file, source file, delta
pub fn write_grid_space_result<P: AsRef<Path>>(dir: P, key: &ResultKey, candidate: &MatchCandidate) -> ValResult<PathBuf> {
    let path = dir.as_ref().join(key.space_result_name());
    let text = format!(
        "{}\n{}\n{:.1}\n",
        candidate.target.file_name(),
        candidate.source_file_name(),
        candidate.time_delta_hours
    );
    std::fs::write(&path, text)?;
    Ok(path)
}

/// Point spatial result, ten lines
pub fn write_point_space_result<P: AsRef<Path>>(
    dir: P,
    key: &ResultKey,
    candidate: &MatchCandidate,
    point: &PointMatch,
    reference_value: f64,
) -> ValResult<PathBuf> {
    let path = dir.as_ref().join(key.space_result_name());
    let mut out = String::new();
    let _ = writeln!(out, "{}", candidate.target.file_name());
    let _ = writeln!(out, "{}", candidate.source_file_name());
    let _ = writeln!(out, "{}", point.row);
    let _ = writeln!(out, "{}", point.col);
    let _ = writeln!(out, "{:.4}", point.mean_value);
    let _ = writeln!(out, "{:.4}", point.valid_ratio);
    let _ = writeln!(out, "{}", format_opt(point.cv, 4));
    let _ = writeln!(out, "{}", candidate.source_time().format(TIMESTAMP_FORMAT));
    let _ = writeln!(out, "{:.4}", reference_value);
    let _ = writeln!(out, "{:.1}", candidate.time_delta_hours);
    std::fs::write(&path, out)?;
    Ok(path)
}

/// Parsed point spatial result
#[derive(Debug, Clone, PartialEq)]
pub struct PointSpaceResult {
    pub target_file: String,
    pub source_file: String,
    pub row: usize,
    pub col: usize,
    pub mean_value: f64,
    pub valid_ratio: f64,
    pub cv: Option<f64>,
    pub reference_time: String,
    pub reference_value: f64,
    pub time_delta_hours: f64,
}

/// Read a ten-line point result; `None` for an empty marker
pub fn read_point_space_result<P: AsRef<Path>>(path: P) -> ValResult<Option<PointSpaceResult>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    if lines.iter().all(|l| l.is_empty()) {
        return Ok(None);
    }
    let bad = || ValError::InvalidFormat(format!("Malformed point result {}", path.as_ref().display()));
    if lines.len() < 10 {
        return Err(bad());
    }
    let num = |i: usize| lines[i].parse::<f64>().map_err(|_| bad());

    Ok(Some(PointSpaceResult {
        target_file: lines[0].to_string(),
        source_file: lines[1].to_string(),
        row: lines[2].parse().map_err(|_| bad())?,
        col: lines[3].parse().map_err(|_| bad())?,
        mean_value: num(4)?,
        valid_ratio: num(5)?,
        cv: num(6).ok().filter(|v| v.is_finite()),
        reference_time: lines[7].to_string(),
        reference_value: num(8)?,
        time_delta_hours: num(9)?,
    }))
}

fn write_header(out: &mut String, fields: &[(&str, String)]) {
    let _ = writeln!(out, "{}", HEADER_BEGIN);
    for (key, value) in fields {
        let _ = writeln!(out, "/{}={}", key, value);
    }
    let _ = writeln!(out, "{}", HEADER_END);
}

fn common_header(record: &ValidationRecord, fields: &str) -> Vec<(&'static str, String)> {
    vec![
        ("target file", record.target_file.clone()),
        ("source file", record.source_file.clone()),
        ("parameter", record.parameter.to_string()),
        ("units", record.parameter.units().to_string()),
        ("fields", fields.to_string()),
        (TOTAL_COUNT_KEY, record.total_pixel_count.to_string()),
        (EFFECTIVE_COUNT_KEY, record.effective_pixel_count().to_string()),
    ]
}

/// Validation rows under a metadata header; pixel indices are written 1-based
pub fn validation_text(record: &ValidationRecord) -> String {
    let windowed = record
        .rows
        .iter()
        .any(|r| matches!(r.position, RowPosition::Cell { .. }));
    let fields = if windowed {
        "row,col,target,source,difference"
    } else {
        "index,target,source,difference"
    };

    let mut header = common_header(record, fields);
    header.push((
        "validation result",
        format!(
            "{} {}",
            format_opt(record.mean_difference(), 4),
            record.metric.unit(record.parameter)
        ),
    ));

    let mut out = String::new();
    write_header(&mut out, &header);
    for row in &record.rows {
        match row.position {
            RowPosition::Index(i) => {
                let _ = write!(out, "{}", i + 1);
            }
            RowPosition::Cell { row, col } => {
                let _ = write!(out, "{}\t{}", row, col);
            }
        }
        let _ = writeln!(out, "\t{:.6}\t{:.6}\t{:.6}", row.target, row.source, row.difference);
    }
    out
}

/// One `bias std rms R` row under a metadata header
pub fn statistic_text(record: &ValidationRecord) -> String {
    let s = &record.statistics;
    let mut out = String::new();
    write_header(&mut out, &common_header(record, "bias,std,rms,R"));
    let _ = writeln!(
        out,
        "{}\t{}\t{}\t{}",
        format_opt(s.bias, 6),
        format_opt(s.std, 6),
        format_opt(s.rms, 6),
        format_opt(s.correlation, 6)
    );
    out
}

/// Write the valresult and statistic files of a record
pub fn write_validation<P: AsRef<Path>>(dir: P, key: &ResultKey, record: &ValidationRecord) -> ValResult<(PathBuf, PathBuf)> {
    let val_path = dir.as_ref().join(key.validation_name());
    let stat_path = dir.as_ref().join(key.statistic_name());
    std::fs::write(&val_path, validation_text(record))?;
    std::fs::write(&stat_path, statistic_text(record))?;
    log::info!(
        "Wrote {} ({} of {} pixels)",
        val_path.display(),
        record.effective_pixel_count(),
        record.total_pixel_count
    );
    Ok((val_path, stat_path))
}

/// `key=value` pairs between the header markers
pub fn parse_header(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .skip_while(|l| *l != HEADER_BEGIN)
        .skip(1)
        .take_while(|l| *l != HEADER_END)
        .filter_map(|l| l.strip_prefix('/'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

pub fn read_header<P: AsRef<Path>>(path: P) -> ValResult<BTreeMap<String, String>> {
    Ok(parse_header(&std::fs::read_to_string(path)?))
}

/// Histograms as `/title` blocks of `label count percent` lines
pub fn classification_text(histograms: &[Histogram]) -> String {
    let mut out = String::new();
    for h in histograms {
        let _ = writeln!(out, "/{}", h.title);
        for (bin, pct) in h.bins.iter().zip(h.percentages()) {
            let _ = writeln!(out, "{}\t{}\t{:.2}", bin.label, bin.count, pct);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validate::{DifferenceMetric, Statistics, ValidationRow};
    use crate::types::SourceKind;

    fn record(rows: Vec<ValidationRow>) -> ValidationRecord {
        ValidationRecord {
            target_file: "HY3A_chl_a_20241106023000.txt".to_string(),
            source_file: "AQUA_chl_a_20241106030000.txt".to_string(),
            target_sensor: "HY3A".to_string(),
            source: SourceKind::Satellite("AQUA".to_string()),
            parameter: Parameter::Chl,
            time_tag: "20241106023000".to_string(),
            metric: DifferenceMetric::RelativePercent,
            statistics: Statistics::from_rows(&rows),
            rows,
            total_pixel_count: 10,
        }
    }

    #[test]
    fn test_result_names() {
        let key = ResultKey::new("HY3A", "AQUA", Parameter::Chl, "20241106023000");
        assert_eq!(key.time_result_name(), "timeresult_HY3A_AQUA_chl_a_20241106023000.txt");
        assert_eq!(key.updated_mask_name(), "HY3A_flag1_AQUA_chl_a_20241106023000.txt");
        let terra = ResultKey::new("HY3A", "TERRA", Parameter::Chl, "20241106023000");
        assert_ne!(terra.updated_mask_name(), key.updated_mask_name());
        assert_eq!(
            interpolated_name("AQUA", Parameter::Rrs(488), "20241106030000"),
            "AQUA1_Rrs488_20241106030000.txt"
        );
    }

    #[test]
    fn test_validation_header_and_rows() {
        let rows = vec![
            ValidationRow {
                position: RowPosition::Index(0),
                target: 10.0,
                source: 8.0,
                difference: 25.0,
            },
            ValidationRow {
                position: RowPosition::Index(4),
                target: 12.0,
                source: 10.0,
                difference: 20.0,
            },
        ];
        let rec = record(rows);
        let text = validation_text(&rec);
        let header = parse_header(&text);
        assert_eq!(header[EFFECTIVE_COUNT_KEY], "2");
        assert_eq!(header[TOTAL_COUNT_KEY], "10");
        assert_eq!(header["units"], "mg/m3");
        assert_eq!(header["validation result"], "22.5000 %");

        let data: Vec<&str> = text.lines().skip_while(|l| *l != HEADER_END).skip(1).collect();
        assert_eq!(data, vec!["1\t10.000000\t8.000000\t25.000000", "5\t12.000000\t10.000000\t20.000000"]);

        let stats = statistic_text(&rec);
        assert_eq!(stats.lines().last(), Some("2.000000\t0.000000\t2.000000\t1.000000"));
    }

    #[test]
    fn test_empty_record_is_well_formed() {
        let rec = record(Vec::new());
        let header = parse_header(&validation_text(&rec));
        assert_eq!(header[EFFECTIVE_COUNT_KEY], "0");
        assert_eq!(header["validation result"], "nan %");
        assert_eq!(statistic_text(&rec).lines().last(), Some("nan\tnan\tnan\tnan"));
    }
}
