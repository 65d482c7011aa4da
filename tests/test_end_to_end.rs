use oceanval::config::{SensorProfile, ValidationConfig};
use oceanval::core::pipeline::BatchProcessor;
use oceanval::io::results::{parse_header, read_point_space_result, read_time_result, EFFECTIVE_COUNT_KEY, HEADER_END};
use std::fmt::Write as _;
use std::path::Path;
use tempfile::TempDir;

const ROWS: usize = 20;
const COLS: usize = 20;
const TARGET_TS: &str = "20241106023000";
const SOURCE_TS: &str = "20241106030000";
/// Pixel (10, 10) carries a target flag bit
const FLAGGED: usize = 10 * COLS + 10;

fn write_column<T: std::fmt::Display>(dir: &Path, name: &str, values: impl Iterator<Item = T>) {
    let mut text = String::new();
    for v in values {
        writeln!(text, "{}", v).unwrap();
    }
    std::fs::write(dir.join(name), text).unwrap();
}

fn source_field(lat: f64, lon: f64) -> f64 {
    0.5 + (lat - 30.0) + 0.5 * (lon - 120.0)
}

fn write_swath(dir: &Path, sensor: &str, ts: &str, origin: (f64, f64), step: f64, scale: f64, flagged: Option<usize>) {
    let n = ROWS * COLS;
    let lat: Vec<f64> = (0..n).map(|i| origin.0 + (i / COLS) as f64 * step).collect();
    let lon: Vec<f64> = (0..n).map(|i| origin.1 + (i % COLS) as f64 * step).collect();
    let chl: Vec<f64> = (0..n).map(|i| source_field(lat[i], lon[i]) * scale).collect();
    let flag: Vec<i64> = (0..n).map(|i| if Some(i) == flagged { 1 << 8 } else { 0 }).collect();

    write_column(dir, &format!("{}_lat_{}.txt", sensor, ts), lat.iter());
    write_column(dir, &format!("{}_lon_{}.txt", sensor, ts), lon.iter());
    write_column(dir, &format!("{}_chl_a_{}.txt", sensor, ts), chl.iter());
    write_column(dir, &format!("{}_flag_{}.txt", sensor, ts), flag.iter());
}

fn config() -> ValidationConfig {
    ValidationConfig {
        sources: vec![SensorProfile::aqua()],
        shape_row_range: 20..100,
        ..ValidationConfig::default()
    }
}

fn setup(input: &Path, with_insitu: bool) {
    write_swath(input, "HY3A", TARGET_TS, (30.0, 120.0), 0.01, 1.1, Some(FLAGGED));
    write_swath(input, "AQUA", SOURCE_TS, (29.9, 119.9), 0.02, 1.0, None);
    if with_insitu {
        std::fs::write(
            input.join("XC_chl_a_20241106.txt"),
            "Latitude: 30.1\nLongitude: 120.1\nData:\nDate\tTime\tchl\tFlag\n\
             20241106\t20000\t0.61\t0\n\
             20241106\t23500\t0.99\t1\n\
             20241106\t24200\t0.60\t0\n",
        )
        .unwrap();
    }
}

#[test]
fn test_flagged_pixel_never_reaches_statistics() {
    let _ = env_logger::builder().is_test(true).try_init();
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    setup(input.path(), false);

    let processor = BatchProcessor::new(config()).expect("Failed to create processor");
    let summary = processor
        .run_batch(input.path(), output.path())
        .expect("Batch failed");
    println!("Summary: {:?}", summary);

    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.validated, 1);
    assert_eq!(summary.skipped + summary.failed, 0);

    let out = output.path();
    assert!(out.join(format!("HY3A_flag1_{}.txt", TARGET_TS)).exists());
    assert!(out.join(format!("AQUA_flag1_{}.txt", SOURCE_TS)).exists());
    assert!(out.join(format!("AQUA1_chl_a_{}.txt", SOURCE_TS)).exists());
    assert!(out.join(format!("HY3A_flag1_AQUA_chl_a_{}.txt", TARGET_TS)).exists());
    assert!(out.join("classification_HY3A_AQUA_chl_a.txt").exists());
    assert_eq!(std::fs::read_to_string(out.join("timesize.txt")).unwrap().trim(), "3");

    let time = read_time_result(out.join(format!("timeresult_HY3A_AQUA_chl_a_{}.txt", TARGET_TS)))
        .unwrap()
        .expect("Expected a temporal match");
    assert_eq!(time.source_file, format!("AQUA_chl_a_{}.txt", SOURCE_TS));
    assert_eq!(time.time_delta_hours, 0.5);

    let val = std::fs::read_to_string(out.join(format!("valresult_HY3A_AQUA_chl_a_{}.txt", TARGET_TS))).unwrap();
    let header = parse_header(&val);
    let effective: usize = header[EFFECTIVE_COUNT_KEY].parse().unwrap();
    assert_eq!(header["Total pixel count"], "400");
    assert!(effective > 0 && effective < 400);

    let rows: Vec<&str> = val.lines().skip_while(|l| *l != HEADER_END).skip(1).collect();
    assert_eq!(rows.len(), effective);
    let flagged_index = (FLAGGED + 1).to_string();
    for row in &rows {
        let fields: Vec<&str> = row.split('\t').collect();
        assert_ne!(fields[0], flagged_index, "flagged pixel entered the statistics");
        // target is 1.1x the interpolated linear source field
        let diff: f64 = fields[3].parse().unwrap();
        assert!((diff - 10.0).abs() < 1e-3, "unexpected difference {}", diff);
    }

    // all outputs carry a result, so the audit leaves no error summary
    let summaries = std::fs::read_dir(out)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("error_summary_"))
        .count();
    assert_eq!(summaries, 0);
}

#[test]
fn test_insitu_point_validation() {
    let _ = env_logger::builder().is_test(true).try_init();
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    setup(input.path(), true);

    let processor = BatchProcessor::new(config()).unwrap();
    let summary = processor.run_batch(input.path(), output.path()).unwrap();
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.validated, 2);

    let out = output.path();
    let screened = std::fs::read_to_string(out.join("XCf_chl_a_20241106.txt")).unwrap();
    assert!(!screened.contains("0.99"));

    let time = read_time_result(out.join(format!("timeresult_HY3A_XC_chl_a_{}.txt", TARGET_TS)))
        .unwrap()
        .unwrap();
    assert_eq!(time.reference_time.as_deref(), Some("20241106024200"));

    let point = read_point_space_result(out.join(format!("spaceresult_HY3A_XC_chl_a_{}.txt", TARGET_TS)))
        .unwrap()
        .expect("Expected a point match");
    assert_eq!((point.row, point.col), (10, 10));
    // the flagged centre pixel is left out of the 5x5 window
    assert!((point.valid_ratio - 0.96).abs() < 1e-9);
    assert!((point.reference_value - 0.60).abs() < 1e-9);

    let stat = std::fs::read_to_string(out.join(format!("statistic_HY3A_XC_chl_a_{}.txt", TARGET_TS))).unwrap();
    let last: Vec<&str> = stat.lines().last().unwrap().split('\t').collect();
    assert_eq!(last[1], "nan");
    assert_eq!(last[3], "nan");
    assert!(out.join("classification_HY3A_XC_chl_a.txt").exists());
}

fn effective_count(out: &Path, source: &str) -> usize {
    let val = std::fs::read_to_string(out.join(format!("valresult_HY3A_{}_chl_a_{}.txt", source, TARGET_TS))).unwrap();
    parse_header(&val)[EFFECTIVE_COUNT_KEY].parse().unwrap()
}

fn valid_in_updated_mask(out: &Path, source: &str) -> usize {
    let mask = std::fs::read_to_string(out.join(format!("HY3A_flag1_{}_chl_a_{}.txt", source, TARGET_TS))).unwrap();
    mask.lines().filter(|l| l.trim() == "0").count()
}

#[test]
fn test_each_source_keeps_its_own_updated_mask() {
    let _ = env_logger::builder().is_test(true).try_init();
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    setup(input.path(), false);
    // TERRA only covers the upper part of the target swath
    write_swath(input.path(), "TERRA", "20241106031000", (30.05, 120.05), 0.02, 1.0, None);

    let config = ValidationConfig {
        sources: vec![SensorProfile::aqua(), SensorProfile::terra()],
        ..config()
    };
    let summary = BatchProcessor::new(config)
        .expect("Failed to create processor")
        .run_batch(input.path(), output.path())
        .expect("Batch failed");
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.validated, 2);

    let out = output.path();
    let aqua = effective_count(out, "AQUA");
    let terra = effective_count(out, "TERRA");
    println!("Effective pixels: AQUA {}, TERRA {}", aqua, terra);
    assert!(terra > 0 && terra < aqua);
    assert_eq!(valid_in_updated_mask(out, "AQUA"), aqua);
    assert_eq!(valid_in_updated_mask(out, "TERRA"), terra);
}
