use crate::config::{SensorProfile, ValidationConfig};
use crate::io::insitu::{InSituRecord, InSituSeries};
use crate::types::{ObservationId, Parameter, SourceKind, ValError, ValResult, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

static TIMESTAMP_RE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"\d{14}"));

/// Absolute time difference in hours
pub fn hours_between(a: NaiveDateTime, b: NaiveDateTime) -> f64 {
    (a - b).num_seconds().abs() as f64 / 3600.0
}

/// Extract the first 14-digit `YYYYmmddHHMMSS` stamp found in a file name
pub fn extract_timestamp(name: &str) -> ValResult<NaiveDateTime> {
    let re = TIMESTAMP_RE
        .as_ref()
        .map_err(|e| ValError::Processing(format!("Regex error: {}", e)))?;
    let stamp = re
        .find(name)
        .ok_or_else(|| ValError::InvalidFormat(format!("No timestamp in {}", name)))?;
    NaiveDateTime::parse_from_str(stamp.as_str(), TIMESTAMP_FORMAT)
        .map_err(|e| ValError::InvalidFormat(format!("Bad timestamp {}: {}", stamp.as_str(), e)))
}

/// Pick the candidate closest in time to `target`, if within the threshold.
///
/// Equal deltas keep the earliest candidate in iteration order.
pub fn select_nearest<T, I>(target: NaiveDateTime, candidates: I, threshold_hours: f64) -> Option<(T, f64)>
where
    I: IntoIterator<Item = (NaiveDateTime, T)>,
{
    let mut best: Option<(T, f64)> = None;
    for (timestamp, item) in candidates {
        let delta = hours_between(target, timestamp);
        if best.as_ref().map_or(true, |(_, b)| delta < *b) {
            best = Some((item, delta));
        }
    }
    best.filter(|(_, delta)| *delta <= threshold_hours)
}

/// Reference side of a temporal match
#[derive(Debug, Clone, PartialEq)]
pub enum MatchedSource {
    /// A swath of another satellite
    Satellite(ObservationId),
    /// The closest row of an in-situ reference file
    InSitu {
        file_name: String,
        latitude: f64,
        longitude: f64,
        record: InSituRecord,
    },
}

/// Target observation paired with its closest reference in time
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub target: ObservationId,
    pub source: MatchedSource,
    pub time_delta_hours: f64,
}

impl MatchCandidate {
    pub fn parameter(&self) -> Parameter {
        self.target.parameter
    }

    pub fn source_kind(&self) -> SourceKind {
        match &self.source {
            MatchedSource::Satellite(id) => SourceKind::Satellite(id.sensor.clone()),
            MatchedSource::InSitu { .. } => SourceKind::InSitu,
        }
    }

    /// File name of the reference the target was paired with
    pub fn source_file_name(&self) -> String {
        match &self.source {
            MatchedSource::Satellite(id) => id.file_name(),
            MatchedSource::InSitu { file_name, .. } => file_name.clone(),
        }
    }

    /// Time of the chosen reference
    pub fn source_time(&self) -> NaiveDateTime {
        match &self.source {
            MatchedSource::Satellite(id) => id.timestamp,
            MatchedSource::InSitu { record, .. } => record.timestamp,
        }
    }
}

/// Nearest-in-time pairing of target observations with references
#[derive(Debug, Clone)]
pub struct TemporalMatcher {
    threshold_hours: f64,
    sources: Vec<SensorProfile>,
}

impl TemporalMatcher {
    pub fn new(threshold_hours: f64, sources: Vec<SensorProfile>) -> ValResult<Self> {
        if !(threshold_hours >= 0.0) {
            return Err(ValError::Config(format!(
                "Time threshold must be non-negative, got {}",
                threshold_hours
            )));
        }
        Ok(Self {
            threshold_hours,
            sources,
        })
    }

    pub fn from_config(config: &ValidationConfig) -> ValResult<Self> {
        Self::new(config.time_threshold_hours, config.sources.clone())
    }

    pub fn threshold_hours(&self) -> f64 {
        self.threshold_hours
    }

    fn source_profile(&self, name: &str) -> ValResult<&SensorProfile> {
        self.sources
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ValError::Config(format!("No sensor profile for source {}", name)))
    }

    /// Pair a target swath with the closest swath of `source_sensor`.
    ///
    /// `Ok(None)` covers both an unmapped parameter and no swath in the window.
    pub fn match_satellite(
        &self,
        target: &ObservationId,
        source_sensor: &str,
        pool: &[ObservationId],
    ) -> ValResult<Option<MatchCandidate>> {
        let mapped = match self.source_profile(source_sensor)?.map_parameter(target.parameter) {
            Some(p) => p,
            None => {
                log::debug!("{} has no {} counterpart for {}", source_sensor, target.parameter, target);
                return Ok(None);
            }
        };

        let candidates = pool
            .iter()
            .filter(|id| id.sensor == source_sensor && id.parameter == mapped)
            .map(|id| (id.timestamp, id));

        let matched = select_nearest(target.timestamp, candidates, self.threshold_hours).map(|(id, delta)| {
            MatchCandidate {
                target: target.clone(),
                source: MatchedSource::Satellite(id.clone()),
                time_delta_hours: delta,
            }
        });

        match &matched {
            Some(m) => log::info!(
                "Matched {} with {} ({:.1} h)",
                target,
                m.source_file_name(),
                m.time_delta_hours
            ),
            None => log::info!("No {} swath within {} h of {}", source_sensor, self.threshold_hours, target),
        }
        Ok(matched)
    }

    /// Pair a target swath with the closest in-situ row across all files
    /// measuring the same parameter.
    pub fn match_insitu(&self, target: &ObservationId, series: &[InSituSeries]) -> Option<MatchCandidate> {
        let candidates = series
            .iter()
            .filter(|s| s.parameter == target.parameter)
            .flat_map(|s| s.records.iter().map(move |r| (r.timestamp, (s, r))));

        let matched = select_nearest(target.timestamp, candidates, self.threshold_hours).map(
            |((s, r), delta)| MatchCandidate {
                target: target.clone(),
                source: MatchedSource::InSitu {
                    file_name: s.file_name.clone(),
                    latitude: s.latitude,
                    longitude: s.longitude,
                    record: r.clone(),
                },
                time_delta_hours: delta,
            },
        );

        match &matched {
            Some(m) => log::info!(
                "Matched {} with in-situ {} at {} ({:.1} h)",
                target,
                m.source_file_name(),
                m.source_time().format(TIMESTAMP_FORMAT),
                m.time_delta_hours
            ),
            None => log::info!("No in-situ row within {} h of {}", self.threshold_hours, target),
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 11, 6)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_extract_timestamp() {
        let ts = extract_timestamp("AQUA_Rrs488_20241106030000.txt").unwrap();
        assert_eq!(ts, base());
        assert!(extract_timestamp("AQUA_Rrs488.txt").is_err());
    }

    #[test]
    fn test_select_nearest_tie_keeps_first() {
        let t = base();
        let candidates = vec![
            (t + Duration::minutes(30), "late"),
            (t - Duration::minutes(30), "early"),
        ];
        let (item, delta) = select_nearest(t, candidates, 1.0).unwrap();
        assert_eq!(item, "late");
        assert_eq!(delta, 0.5);
    }

    #[test]
    fn test_unmapped_parameter_is_no_correspondence() {
        let config = ValidationConfig::default();
        let matcher = TemporalMatcher::from_config(&config).unwrap();
        let target = ObservationId::new("HY3A", Parameter::Ipar, base());
        let pool = vec![ObservationId::new("SNPP", Parameter::Ipar, base())];
        assert_eq!(matcher.match_satellite(&target, "SNPP", &pool).unwrap(), None);
        assert!(matcher.match_satellite(&target, "GOCI", &pool).is_err());
    }

    #[test]
    fn test_mapped_parameter_selects_source_band() {
        let config = ValidationConfig::default();
        let matcher = TemporalMatcher::from_config(&config).unwrap();
        let target = ObservationId::new("HY3A", Parameter::Rrs(490), base());
        let pool = vec![
            ObservationId::new("AQUA", Parameter::Rrs(490), base()),
            ObservationId::new("AQUA", Parameter::Rrs(488), base() + Duration::hours(2)),
        ];
        let m = matcher.match_satellite(&target, "AQUA", &pool).unwrap().unwrap();
        assert_eq!(m.source_file_name(), "AQUA_Rrs488_20241106050000.txt");
        assert_eq!(m.time_delta_hours, 2.0);
    }
}
