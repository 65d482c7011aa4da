use chrono::{Duration, NaiveDate, NaiveDateTime};
use oceanval::config::{SensorProfile, ValidationConfig};
use oceanval::core::time_match::{MatchedSource, TemporalMatcher};
use oceanval::io::insitu::InSituSeries;
use oceanval::io::results::{read_time_result, write_time_result, ResultKey};
use oceanval::types::{ObservationId, Parameter};
use tempfile::TempDir;

fn target_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 11, 6)
        .unwrap()
        .and_hms_opt(2, 30, 0)
        .unwrap()
}

fn pool() -> Vec<ObservationId> {
    let t = target_time();
    vec![
        ObservationId::new("TERRA", Parameter::Sst, t + Duration::minutes(36)),
        ObservationId::new("TERRA", Parameter::Sst, t - Duration::minutes(66)),
        ObservationId::new("TERRA", Parameter::Sst, t + Duration::minutes(12)),
        ObservationId::new("AQUA", Parameter::Sst, t),
    ]
}

#[test]
fn test_nearest_candidate_within_threshold() {
    let _ = env_logger::builder().is_test(true).try_init();
    let target = ObservationId::new("HY3A", Parameter::Sst, target_time());

    let matcher = TemporalMatcher::new(1.0, vec![SensorProfile::terra()]).unwrap();
    let m = matcher
        .match_satellite(&target, "TERRA", &pool())
        .unwrap()
        .expect("Expected a match within one hour");
    assert_eq!(m.source_file_name(), "TERRA_sst_20241106024200.txt");
    assert!((m.time_delta_hours - 0.2).abs() < 1e-9);

    let strict = TemporalMatcher::new(0.1, vec![SensorProfile::terra()]).unwrap();
    assert!(strict.match_satellite(&target, "TERRA", &pool()).unwrap().is_none());
}

#[test]
fn test_time_result_files() {
    let dir = TempDir::new().unwrap();
    let target = ObservationId::new("HY3A", Parameter::Sst, target_time());
    let matcher = TemporalMatcher::from_config(&ValidationConfig::default()).unwrap();
    let key = ResultKey::new("HY3A", "TERRA", Parameter::Sst, target.time_tag());

    let m = matcher.match_satellite(&target, "TERRA", &pool()).unwrap();
    let path = write_time_result(dir.path(), &key, m.as_ref()).unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "HY3A_sst_20241106023000.txt\nTERRA_sst_20241106024200.txt\n0.2\n"
    );

    let parsed = read_time_result(&path).unwrap().unwrap();
    assert_eq!(parsed.source_file, "TERRA_sst_20241106024200.txt");
    assert_eq!(parsed.reference_time, None);

    let empty = write_time_result(dir.path(), &ResultKey::new("HY3A", "JPSS", Parameter::Sst, "x"), None).unwrap();
    assert_eq!(std::fs::read_to_string(&empty).unwrap(), "");
    assert!(read_time_result(&empty).unwrap().is_none());
}

#[test]
fn test_insitu_rows_across_files() {
    let _ = env_logger::builder().is_test(true).try_init();
    let a = InSituSeries::parse(
        "XCf_chl_a_20241106.txt",
        "Latitude: 30.1\nLongitude: 120.1\nData:\nDate Time chl\n20241106 10000 1.1\n20241106 40000 1.3\n",
    )
    .unwrap();
    let b = InSituSeries::parse(
        "XCf_chl_a_20241107.txt",
        "Latitude: 30.2\nLongitude: 120.3\nData:\nDate Time chl\n20241106 024500 1.2\n",
    )
    .unwrap();
    let sst = InSituSeries::parse(
        "XCf_sst_20241106.txt",
        "Latitude: 30.1\nLongitude: 120.1\nData:\nDate Time sst\n20241106 023000 18.0\n",
    )
    .unwrap();

    let matcher = TemporalMatcher::from_config(&ValidationConfig::default()).unwrap();
    let target = ObservationId::new("HY3A", Parameter::Chl, target_time());
    let m = matcher
        .match_insitu(&target, &[a, b, sst])
        .expect("Expected an in-situ match");

    assert_eq!(m.source_file_name(), "XCf_chl_a_20241107.txt");
    assert!((m.time_delta_hours - 0.25).abs() < 1e-9);
    match &m.source {
        MatchedSource::InSitu { latitude, record, .. } => {
            assert_eq!(*latitude, 30.2);
            assert_eq!(record.value, 1.2);
        }
        other => panic!("unexpected source {:?}", other),
    }

    let dir = TempDir::new().unwrap();
    let key = ResultKey::new("HY3A", "XC", Parameter::Chl, target.time_tag());
    let parsed = read_time_result(write_time_result(dir.path(), &key, Some(&m)).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(parsed.reference_time.as_deref(), Some("20241106024500"));
}
