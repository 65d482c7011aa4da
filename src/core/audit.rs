use crate::io::results::{read_header, EFFECTIVE_COUNT_KEY};
use crate::types::{ValResult, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Outputs of a batch that carry no usable result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub empty_time_results: Vec<String>,
    pub empty_space_results: Vec<String>,
    pub zero_pixel_validations: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.empty_time_results.is_empty()
            && self.empty_space_results.is_empty()
            && self.zero_pixel_validations.is_empty()
    }

    pub fn issue_count(&self) -> usize {
        self.empty_time_results.len() + self.empty_space_results.len() + self.zero_pixel_validations.len()
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let sections = [
            ("Empty time match results", &self.empty_time_results),
            ("Empty space match results", &self.empty_space_results),
            ("Validation results with zero effective pixels", &self.zero_pixel_validations),
        ];
        for (title, names) in sections {
            let _ = writeln!(out, "{} ({}):", title, names.len());
            for name in names {
                let _ = writeln!(out, "  {}", name);
            }
        }
        out
    }
}

/// Scan an output directory for empty match markers and zero-pixel validations
pub fn audit_directory<P: AsRef<Path>>(dir: P) -> ValResult<AuditReport> {
    let mut names: Vec<(String, PathBuf)> = std::fs::read_dir(dir.as_ref())?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(|n| (n.to_string(), e.path())))
        .collect();
    names.sort();

    let mut report = AuditReport::default();
    for (name, path) in names {
        if name.starts_with("timeresult_") {
            if is_blank(&path)? {
                report.empty_time_results.push(name);
            }
        } else if name.starts_with("spaceresult_") {
            if is_blank(&path)? {
                report.empty_space_results.push(name);
            }
        } else if name.starts_with("valresult_") {
            let header = read_header(&path)?;
            if header.get(EFFECTIVE_COUNT_KEY).map(String::as_str) == Some("0") {
                report.zero_pixel_validations.push(name);
            }
        }
    }

    log::info!(
        "Audit of {}: {} empty time results, {} empty space results, {} zero-pixel validations",
        dir.as_ref().display(),
        report.empty_time_results.len(),
        report.empty_space_results.len(),
        report.zero_pixel_validations.len()
    );
    Ok(report)
}

/// Write `error_summary_<YYYYmmddHHMMSS>.txt`
pub fn write_error_summary<P: AsRef<Path>>(dir: P, report: &AuditReport, at: NaiveDateTime) -> ValResult<PathBuf> {
    let path = dir
        .as_ref()
        .join(format!("error_summary_{}.txt", at.format(TIMESTAMP_FORMAT)));
    std::fs::write(&path, report.to_text())?;
    Ok(path)
}

fn is_blank(path: &Path) -> ValResult<bool> {
    Ok(std::fs::read_to_string(path)?.trim().is_empty())
}
