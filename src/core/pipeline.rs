//! Batch driver: scans a directory snapshot once, builds validity masks,
//! pairs every target swath with its references in time and runs spatial
//! matching and validation for each pair.
//!
//! Candidates are processed in parallel. Candidates that would write the same
//! interpolated file run one after another inside a group.

use crate::config::ValidationConfig;
use crate::core::audit::{audit_directory, write_error_summary};
use crate::core::flag::{FlagEngine, ProductLayer, ValidityMask};
use crate::core::grid::GridArray;
use crate::core::histogram::{cv_classes, difference_classes, time_delta_classes, valid_ratio_classes};
use crate::core::space_match::{PointMatch, SpatialMatcher, SpatialResult, SwathView};
use crate::core::time_match::{MatchCandidate, MatchedSource, TemporalMatcher};
use crate::core::validate::{DifferenceMetric, Statistics, ValidationEngine, ValidationRecord, ValidationRow};
use crate::io::insitu::{InSituSeries, INSITU_PREFIX, SCREENED_PREFIX};
use crate::io::results::{
    classification_name, classification_text, interpolated_name, write_empty, write_grid_space_result,
    write_point_space_result, write_time_result, write_validation, ResultKey,
};
use crate::io::text_array::{
    observation_file_name, read_flag_array, read_flat_array, write_flat_array, write_lines, ObservationFile,
    Variable,
};
use crate::types::{Observation, ObservationId, Parameter, SourceKind, ValError, ValResult};
use anyhow::Context;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Name of the file recording the time threshold of a batch
pub const TIME_THRESHOLD_FILE: &str = "timesize.txt";

/// Counts reported at the end of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// (target swath, parameter, reference) tuples considered
    pub candidates: usize,
    /// Candidates with a reference inside the time window
    pub matched: usize,
    /// Matched candidates that produced a validation record
    pub validated: usize,
    /// Matched candidates skipped for missing inputs or geometry
    pub skipped: usize,
    /// Matched candidates that failed with an error
    pub failed: usize,
}

/// Validity masks keyed by sensor and swath time
pub type MaskStore = HashMap<(String, NaiveDateTime), ValidityMask>;

/// Files of one directory snapshot, resolved once
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    files: Vec<ObservationFile>,
    insitu: Vec<PathBuf>,
}

impl Catalog {
    pub fn scan<P: AsRef<Path>>(dir: P) -> ValResult<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut catalog = Catalog::default();
        for path in paths {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with(INSITU_PREFIX) || name.starts_with(SCREENED_PREFIX) {
                catalog.insitu.push(path);
            } else if let Some(file) = ObservationFile::parse(&path)? {
                catalog.files.push(file);
            }
        }
        log::info!(
            "Catalogued {} swath files and {} in-situ files in {}",
            catalog.files.len(),
            catalog.insitu.len(),
            dir.as_ref().display()
        );
        Ok(catalog)
    }

    pub fn files(&self) -> &[ObservationFile] {
        &self.files
    }

    pub fn insitu_files(&self) -> &[PathBuf] {
        &self.insitu
    }

    pub fn find(&self, sensor: &str, variable: Variable, timestamp: NaiveDateTime) -> Option<&ObservationFile> {
        self.files
            .iter()
            .find(|f| f.sensor == sensor && f.variable == variable && f.timestamp == timestamp)
    }

    /// Product identities of one sensor, in file-name order
    pub fn products(&self, sensor: &str) -> Vec<ObservationId> {
        self.files
            .iter()
            .filter(|f| f.sensor == sensor)
            .filter_map(|f| match f.variable {
                Variable::Product(p) => Some(ObservationId::new(f.sensor.clone(), p, f.timestamp)),
                _ => None,
            })
            .collect()
    }

    /// Files grouped per (sensor, timestamp) swath
    pub fn swaths(&self) -> BTreeMap<(String, NaiveDateTime), Vec<&ObservationFile>> {
        let mut swaths: BTreeMap<(String, NaiveDateTime), Vec<&ObservationFile>> = BTreeMap::new();
        for f in &self.files {
            swaths.entry((f.sensor.clone(), f.timestamp)).or_default().push(f);
        }
        swaths
    }

    /// Read a product with its coordinates and, if present, its raw flag
    pub fn load_observation(&self, id: &ObservationId) -> ValResult<Observation> {
        let require = |variable: Variable| {
            self.find(&id.sensor, variable, id.timestamp)
                .map(|f| f.path.clone())
                .ok_or_else(|| ValError::InvalidFormat(format!("Missing {} file for {}", variable.file_token(), id)))
        };
        let values = read_flat_array(require(Variable::Product(id.parameter))?)?;
        let latitude = read_flat_array(require(Variable::Latitude)?)?;
        let longitude = read_flat_array(require(Variable::Longitude)?)?;
        let raw_flag = match self.find(&id.sensor, Variable::Flag, id.timestamp) {
            Some(f) => Some(read_flag_array(&f.path)?),
            None => None,
        };
        Observation::new(id.clone(), values, latitude, longitude, raw_flag)
    }
}

/// Temporal match of one (target, reference, parameter) tuple
#[derive(Debug, Clone)]
pub struct PendingMatch {
    pub key: ResultKey,
    pub candidate: Option<MatchCandidate>,
}

/// Validation of one matched candidate
#[derive(Debug, Clone)]
pub struct CandidateReport {
    pub key: ResultKey,
    pub record: ValidationRecord,
    pub time_delta_hours: f64,
    pub point: Option<PointMatch>,
}

enum Outcome {
    Validated(Box<CandidateReport>),
    Skipped,
    Failed,
}

/// Runs the flag, match and validation stages over a directory
pub struct BatchProcessor {
    config: ValidationConfig,
    flag_engine: FlagEngine,
    matcher: TemporalMatcher,
    spatial: SpatialMatcher,
    validator: ValidationEngine,
}

impl BatchProcessor {
    pub fn new(config: ValidationConfig) -> ValResult<Self> {
        config.validate()?;
        Ok(Self {
            flag_engine: FlagEngine::from_config(&config)?,
            matcher: TemporalMatcher::from_config(&config)?,
            spatial: SpatialMatcher::from_config(&config)?,
            validator: ValidationEngine::from_config(&config),
            config,
        })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Run every stage over `input_dir`, writing all outputs to `output_dir`
    pub fn run_batch<P: AsRef<Path>, Q: AsRef<Path>>(&self, input_dir: P, output_dir: Q) -> anyhow::Result<BatchSummary> {
        let input_dir = input_dir.as_ref();
        let output_dir = output_dir.as_ref();
        log::info!(
            "Starting validation of {} against {} sources (window {}, threshold {} h)",
            self.config.target.name,
            self.config.sources.len(),
            self.config.window_size,
            self.config.time_threshold_hours
        );

        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("creating output directory {}", output_dir.display()))?;
        let catalog = Catalog::scan(input_dir).with_context(|| format!("scanning {}", input_dir.display()))?;

        let masks = self.run_flag_stage(&catalog, output_dir);
        let insitu = self.screen_insitu(&catalog, output_dir);

        std::fs::write(
            output_dir.join(TIME_THRESHOLD_FILE),
            format!("{}\n", self.config.time_threshold_hours),
        )
        .context("writing time threshold record")?;

        let pending = self
            .match_candidates(&catalog, &masks, &insitu, output_dir)
            .context("temporal matching")?;

        let mut summary = BatchSummary {
            candidates: pending.len(),
            matched: pending.iter().filter(|p| p.candidate.is_some()).count(),
            ..BatchSummary::default()
        };

        let outcomes = self.process_matches(&catalog, &masks, &pending, output_dir);
        let mut reports = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Validated(report) => {
                    summary.validated += 1;
                    reports.push(*report);
                }
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Failed => summary.failed += 1,
            }
        }

        self.write_classifications(&reports, output_dir)
            .context("writing classification summaries")?;

        let audit = audit_directory(output_dir).context("auditing outputs")?;
        if !audit.is_clean() {
            let path = write_error_summary(output_dir, &audit, chrono::Local::now().naive_local())
                .context("writing error summary")?;
            log::warn!("{} outputs without a result, see {}", audit.issue_count(), path.display());
        }

        log::info!(
            "Batch complete: {} candidates, {} matched, {} validated, {} skipped, {} failed",
            summary.candidates,
            summary.matched,
            summary.validated,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }

    /// Build and persist a validity mask for every swath of a known sensor.
    ///
    /// A swath whose mask cannot be built is logged and left out of the store.
    pub fn run_flag_stage(&self, catalog: &Catalog, output_dir: &Path) -> MaskStore {
        let swaths: Vec<((String, NaiveDateTime), Vec<&ObservationFile>)> = catalog
            .swaths()
            .into_iter()
            .filter(|((sensor, _), files)| {
                self.config.profile(sensor).is_some()
                    && files
                        .iter()
                        .any(|f| matches!(f.variable, Variable::Product(_) | Variable::Flag))
            })
            .collect();

        #[cfg(feature = "parallel")]
        let iter = swaths.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = swaths.iter();

        let results: Vec<_> = iter
            .map(|((sensor, ts), files)| {
                let result = self.swath_mask(sensor, *ts, files, output_dir);
                ((sensor.clone(), *ts), result)
            })
            .collect();

        let mut store = MaskStore::new();
        for (key, result) in results {
            match result {
                Ok(mask) => {
                    store.insert(key, mask);
                }
                Err(e) => log::error!("Flag stage failed for {} {}: {}", key.0, key.1, e),
            }
        }
        log::info!("Flag stage produced {} of {} masks", store.len(), swaths.len());
        store
    }

    fn swath_mask(
        &self,
        sensor: &str,
        timestamp: NaiveDateTime,
        files: &[&ObservationFile],
        output_dir: &Path,
    ) -> ValResult<ValidityMask> {
        let profile = self
            .config
            .profile(sensor)
            .ok_or_else(|| ValError::Config(format!("No sensor profile for {}", sensor)))?;

        let raw_flag = match files.iter().find(|f| f.variable == Variable::Flag) {
            Some(f) => Some(read_flag_array(&f.path)?),
            None => None,
        };
        let products = files
            .iter()
            .filter_map(|f| match f.variable {
                Variable::Product(p) => Some((p, &f.path)),
                _ => None,
            })
            .map(|(p, path)| read_flat_array(path).map(|values| (p, values)))
            .collect::<ValResult<Vec<(Parameter, _)>>>()?;
        let layers: Vec<ProductLayer<'_>> = products
            .iter()
            .map(|(parameter, values)| ProductLayer {
                parameter: *parameter,
                values,
            })
            .collect();

        let outcome = self
            .flag_engine
            .compute_mask(raw_flag.as_ref(), &layers, profile, &self.config.product_sentinels)?;

        let path = output_dir.join(observation_file_name(sensor, Variable::Mask, &timestamp));
        write_lines(&path, outcome.mask.to_flag_array().iter())?;
        Ok(outcome.mask)
    }

    /// Drop flagged rows of raw in-situ files and write them as `XCf_` files.
    ///
    /// Already screened files without a raw counterpart are used as they are.
    pub fn screen_insitu(&self, catalog: &Catalog, output_dir: &Path) -> Vec<InSituSeries> {
        let mut series: Vec<InSituSeries> = Vec::new();
        let mut screened_names = Vec::new();

        for path in catalog.insitu_files() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !name.starts_with(INSITU_PREFIX) {
                continue;
            }
            match InSituSeries::from_file(path) {
                Ok(raw) => {
                    let screened = raw.screened();
                    if let Err(e) = screened.write_to(output_dir) {
                        log::error!("Failed to write {}: {}", screened.file_name, e);
                    }
                    screened_names.push(screened.file_name.clone());
                    series.push(screened);
                }
                Err(e) => log::warn!("Skipping in-situ file {}: {}", path.display(), e),
            }
        }

        for path in catalog.insitu_files() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !name.starts_with(SCREENED_PREFIX) || screened_names.iter().any(|n| n == name) {
                continue;
            }
            match InSituSeries::from_file(path) {
                Ok(s) => series.push(s),
                Err(e) => log::warn!("Skipping in-situ file {}: {}", path.display(), e),
            }
        }

        log::info!("Loaded {} in-situ reference files", series.len());
        series
    }

    /// Pair each target product with every reference and persist the time results
    pub fn match_candidates(
        &self,
        catalog: &Catalog,
        masks: &MaskStore,
        insitu: &[InSituSeries],
        output_dir: &Path,
    ) -> ValResult<Vec<PendingMatch>> {
        let target_name = &self.config.target.name;
        let targets = catalog.products(target_name);
        let pool: Vec<ObservationId> = self
            .config
            .sources
            .iter()
            .flat_map(|s| catalog.products(&s.name))
            .collect();

        let mut pending = Vec::new();
        for target in &targets {
            let usable = masks
                .get(&(target.sensor.clone(), target.timestamp))
                .map(|m| !m.is_all_invalid())
                .unwrap_or(false);
            if !usable {
                log::warn!("{} has no usable validity mask", target);
            }

            for source in &self.config.sources {
                let key = ResultKey::new(target_name.clone(), source.name.clone(), target.parameter, target.time_tag());
                let candidate = if usable {
                    self.matcher.match_satellite(target, &source.name, &pool)?
                } else {
                    None
                };
                write_time_result(output_dir, &key, candidate.as_ref())?;
                pending.push(PendingMatch { key, candidate });
            }

            if insitu.iter().any(|s| s.parameter == target.parameter) {
                let key = ResultKey::new(
                    target_name.clone(),
                    SourceKind::InSitu.tag(),
                    target.parameter,
                    target.time_tag(),
                );
                let candidate = if usable {
                    self.matcher.match_insitu(target, insitu)
                } else {
                    None
                };
                write_time_result(output_dir, &key, candidate.as_ref())?;
                pending.push(PendingMatch { key, candidate });
            }
        }
        Ok(pending)
    }

    fn process_matches(
        &self,
        catalog: &Catalog,
        masks: &MaskStore,
        pending: &[PendingMatch],
        output_dir: &Path,
    ) -> Vec<Outcome> {
        // Candidates sharing an output file form one sequential group
        let mut groups: BTreeMap<String, Vec<(&ResultKey, &MatchCandidate)>> = BTreeMap::new();
        for p in pending {
            if let Some(candidate) = &p.candidate {
                let file = match &candidate.source {
                    MatchedSource::Satellite(id) => interpolated_name(&id.sensor, id.parameter, &id.time_tag()),
                    MatchedSource::InSitu { .. } => p.key.space_result_name(),
                };
                groups.entry(file).or_default().push((&p.key, candidate));
            }
        }
        let groups: Vec<Vec<(&ResultKey, &MatchCandidate)>> = groups.into_values().collect();
        log::debug!("Processing {} candidate groups", groups.len());

        let run_group = |group: &Vec<(&ResultKey, &MatchCandidate)>| -> Vec<Outcome> {
            group
                .iter()
                .map(|(key, candidate)| self.run_candidate(catalog, masks, key, candidate, output_dir))
                .collect()
        };

        #[cfg(feature = "parallel")]
        let outcomes = groups.par_iter().flat_map_iter(run_group).collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes = groups.iter().flat_map(run_group).collect();
        outcomes
    }

    fn run_candidate(
        &self,
        catalog: &Catalog,
        masks: &MaskStore,
        key: &ResultKey,
        candidate: &MatchCandidate,
        output_dir: &Path,
    ) -> Outcome {
        let result = match &candidate.source {
            MatchedSource::Satellite(source) => self.validate_grid(catalog, masks, key, candidate, source, output_dir),
            MatchedSource::InSitu { .. } => self.validate_point(catalog, masks, key, candidate, output_dir),
        };

        match result {
            Ok(report) => Outcome::Validated(Box::new(report)),
            Err(e @ ValError::Geometry(_)) => {
                if let Err(write_err) = write_empty(output_dir, &key.space_result_name()) {
                    log::error!("Failed to write empty space result for {}: {}", key.space_result_name(), write_err);
                }
                log::warn!("Skipping {}: {}", key.space_result_name(), e);
                Outcome::Skipped
            }
            Err(e @ (ValError::InvalidFormat(_) | ValError::LengthMismatch { .. })) => {
                log::warn!("Skipping {}: {}", key.space_result_name(), e);
                Outcome::Skipped
            }
            Err(e) => {
                let err = anyhow::Error::new(e).context(format!(
                    "candidate {} vs {}",
                    candidate.target.file_name(),
                    candidate.source_file_name()
                ));
                log::error!("{:#}", err);
                Outcome::Failed
            }
        }
    }

    fn mask_for<'a>(&self, masks: &'a MaskStore, id: &ObservationId) -> ValResult<&'a ValidityMask> {
        masks
            .get(&(id.sensor.clone(), id.timestamp))
            .ok_or_else(|| ValError::InvalidFormat(format!("No validity mask for {}", id)))
    }

    fn validate_grid(
        &self,
        catalog: &Catalog,
        masks: &MaskStore,
        key: &ResultKey,
        candidate: &MatchCandidate,
        source_id: &ObservationId,
        output_dir: &Path,
    ) -> ValResult<CandidateReport> {
        log::info!("Grid match {} -> {}", source_id, candidate.target);
        let target = catalog.load_observation(&candidate.target)?;
        let source = catalog.load_observation(source_id)?;
        let target_mask = self.mask_for(masks, &candidate.target)?;
        let source_mask = self.mask_for(masks, source_id)?;

        let grid = self.spatial.match_grid(
            SwathView::new(&target.latitude, &target.longitude, target_mask)?,
            SwathView::new(&source.latitude, &source.longitude, source_mask)?,
            &source.values,
        )?;

        write_flat_array(
            output_dir.join(interpolated_name(&source_id.sensor, source_id.parameter, &source_id.time_tag())),
            &grid.interpolated,
            6,
        )?;
        write_lines(output_dir.join(key.updated_mask_name()), grid.mask.to_flag_array().iter())?;
        write_grid_space_result(output_dir, key, candidate)?;

        let result = SpatialResult::Grid(grid);
        let rows = self
            .validator
            .rows_for(candidate.parameter(), &target.values, &result, None)?;
        let record = self.record(candidate, rows, target.len());
        write_validation(output_dir, key, &record)?;

        Ok(CandidateReport {
            key: key.clone(),
            record,
            time_delta_hours: candidate.time_delta_hours,
            point: None,
        })
    }

    fn validate_point(
        &self,
        catalog: &Catalog,
        masks: &MaskStore,
        key: &ResultKey,
        candidate: &MatchCandidate,
        output_dir: &Path,
    ) -> ValResult<CandidateReport> {
        let (latitude, longitude, reference) = match &candidate.source {
            MatchedSource::InSitu {
                latitude,
                longitude,
                record,
                ..
            } => (*latitude, *longitude, record.value),
            MatchedSource::Satellite(_) => {
                return Err(ValError::Processing("Point match needs an in-situ reference".to_string()))
            }
        };
        log::info!("Point match ({}, {}) -> {}", latitude, longitude, candidate.target);

        let target = catalog.load_observation(&candidate.target)?;
        let mask = self.mask_for(masks, &candidate.target)?;
        let grid = GridArray::from_flat(
            &target.values,
            &target.latitude,
            &target.longitude,
            &mask.to_flag_array(),
            self.config.shape_row_range.clone(),
        )?;

        let point = self.spatial.match_point(&grid, latitude, longitude)?;
        write_point_space_result(output_dir, key, candidate, &point, reference)?;

        let result = SpatialResult::Point(point);
        let rows = self
            .validator
            .rows_for(candidate.parameter(), &target.values, &result, Some(reference))?;
        let record = self.record(candidate, rows, 1);
        write_validation(output_dir, key, &record)?;

        let point = match result {
            SpatialResult::Point(point) => Some(point),
            SpatialResult::Grid(_) => None,
        };
        Ok(CandidateReport {
            key: key.clone(),
            record,
            time_delta_hours: candidate.time_delta_hours,
            point,
        })
    }

    fn record(&self, candidate: &MatchCandidate, rows: Vec<ValidationRow>, total_pixel_count: usize) -> ValidationRecord {
        let parameter = candidate.parameter();
        ValidationRecord {
            target_file: candidate.target.file_name(),
            source_file: candidate.source_file_name(),
            target_sensor: candidate.target.sensor.clone(),
            source: candidate.source_kind(),
            parameter,
            time_tag: candidate.target.time_tag(),
            metric: DifferenceMetric::for_parameter(parameter),
            statistics: Statistics::from_rows(&rows),
            rows,
            total_pixel_count,
        }
    }

    /// One classification file per (target, source, parameter)
    fn write_classifications(&self, reports: &[CandidateReport], output_dir: &Path) -> ValResult<usize> {
        let mut grouped: BTreeMap<(String, String, Parameter), Vec<&CandidateReport>> = BTreeMap::new();
        for r in reports {
            grouped
                .entry((r.key.target.clone(), r.key.source.clone(), r.key.parameter))
                .or_default()
                .push(r);
        }

        for ((target, source, parameter), group) in &grouped {
            let diffs: Vec<f64> = group.iter().flat_map(|r| r.record.differences()).collect();
            let deltas: Vec<f64> = group.iter().map(|r| r.time_delta_hours).collect();
            let mut histograms = vec![difference_classes(*parameter, &diffs), time_delta_classes(&deltas)];

            let points: Vec<&PointMatch> = group.iter().filter_map(|r| r.point.as_ref()).collect();
            if !points.is_empty() {
                let ratios: Vec<f64> = points.iter().map(|p| p.valid_ratio).collect();
                let cvs: Vec<f64> = points.iter().filter_map(|p| p.cv).collect();
                histograms.push(valid_ratio_classes(&ratios));
                histograms.push(cv_classes(&cvs));
            }

            let path = output_dir.join(classification_name(target, source, *parameter));
            std::fs::write(&path, classification_text(&histograms))?;
            log::debug!("Wrote {}", path.display());
        }
        Ok(grouped.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_catalog_groups_swaths() {
        let dir = TempDir::new().unwrap();
        for name in [
            "HY3A_sst_20241106023000.txt",
            "HY3A_lat_20241106023000.txt",
            "HY3A_lon_20241106023000.txt",
            "AQUA_sst_20241106030000.txt",
            "XC_sst_20241106.txt",
            "readme.txt",
        ] {
            std::fs::write(dir.path().join(name), "1\n").unwrap();
        }
        let catalog = Catalog::scan(dir.path()).unwrap();
        assert_eq!(catalog.files().len(), 4);
        assert_eq!(catalog.insitu_files().len(), 1);
        assert_eq!(catalog.products("HY3A").len(), 1);
        assert_eq!(catalog.swaths().len(), 2);

        let id = catalog.products("AQUA")[0].clone();
        assert!(matches!(catalog.load_observation(&id), Err(ValError::InvalidFormat(_))));
    }

    #[test]
    fn test_processor_rejects_invalid_config() {
        let config = ValidationConfig {
            window_size: 2,
            ..ValidationConfig::default()
        };
        assert!(BatchProcessor::new(config).is_err());
    }
}
