//! Integration tests for job partitioning and the persisted name list

use std::fs;
use std::time::Duration;

use eventgrid::config::{Config, WholeTerm};
use eventgrid::jobs::{jobname, parse_jobname, ArtifactLayout, JobList};
use eventgrid::source::SourceMap;
use eventgrid::types::{parse_timestamp, TimeRange, MS_PER_DAY};
use eventgrid::Error;
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(86_400);
const HOUR: Duration = Duration::from_secs(3_600);

fn window(start: &str, end: &str) -> TimeRange {
    TimeRange::new(parse_timestamp(start).unwrap(), parse_timestamp(end).unwrap()).unwrap()
}

fn areas(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn no_hosts(_: &TimeRange) -> eventgrid::Result<Vec<String>> {
    Ok(Vec::new())
}

// ============================================================================
// PARTITIONING
// ============================================================================

#[test]
fn test_two_day_window_single_area() {
    let w = window("2020-01-01", "2020-01-03");
    let jobs = JobList::generate(&w, DAY, DAY, &areas(&["core"]), no_hosts).unwrap();

    assert_eq!(jobs.names(), vec!["core_20200101", "core_20200102"]);
    for unit in &jobs {
        assert_eq!(unit.range.duration_ms(), MS_PER_DAY);
    }
}

#[test]
fn test_overlapping_units_extend_past_window() {
    let w = window("2020-01-01", "2020-01-02");
    let jobs = JobList::generate(&w, 12 * HOUR, 6 * HOUR, &areas(&["all"]), no_hosts).unwrap();

    assert_eq!(
        jobs.names(),
        vec![
            "all_20200101_000000",
            "all_20200101_060000",
            "all_20200101_120000",
            "all_20200101_180000",
        ]
    );
    // The last unit keeps the full term
    let last = jobs.get(3).unwrap();
    assert_eq!(last.range.end, w.end + 6 * 3_600_000);
}

#[test]
fn test_each_expands_per_range() {
    let w = window("2020-01-01", "2020-01-03");
    let day2 = parse_timestamp("2020-01-02").unwrap();
    let jobs = JobList::generate(&w, DAY, DAY, &areas(&["each", "core"]), |range| {
        if range.start < day2 {
            Ok(vec!["sw02".to_string(), "rt01".to_string(), "sw02".to_string()])
        } else {
            Ok(vec!["rt01".to_string()])
        }
    })
    .unwrap();

    assert_eq!(
        jobs.names(),
        vec![
            "core_20200101",
            "host_rt01_20200101",
            "host_sw02_20200101",
            "core_20200102",
            "host_rt01_20200102",
        ]
    );
    assert_eq!(jobs.areas(), vec!["core", "host_rt01", "host_sw02"]);
    assert_eq!(jobs.units_in_area("host_sw02").len(), 1);
}

#[test]
fn test_zero_step_is_rejected() {
    let w = window("2020-01-01", "2020-01-03");
    let result = JobList::generate(&w, DAY, Duration::ZERO, &areas(&["core"]), no_hosts);
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_from_config_uses_whole_term() {
    let mut config = Config::default();
    config.jobs.whole_term = Some(WholeTerm {
        start: "2020-03-01".to_string(),
        end: "2020-03-04".to_string(),
    });
    config.jobs.areas = areas(&["edge"]);

    config.source.kinds.clear();
    let loaders = eventgrid::LoaderSet::from_config(&config, &SourceMap::new()).unwrap();
    let jobs = JobList::from_config(&config, &loaders).unwrap();

    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0].name(), "edge_20200301");
    assert_eq!(jobs.units_at(parse_timestamp("2020-03-02 12:00:00").unwrap()).len(), 1);
}

// ============================================================================
// NAMES
// ============================================================================

#[test]
fn test_name_round_trip_with_underscored_area() {
    let w = window("2021-06-30", "2021-07-01");
    let jobs = JobList::generate(&w, DAY, DAY, &areas(&["host_core_sw_01"]), no_hosts).unwrap();
    let unit = &jobs[0];

    let name = jobname(unit);
    assert_eq!(name, "host_core_sw_01_20210630");
    assert_eq!(&parse_jobname(&name, DAY).unwrap(), unit);
}

#[test]
fn test_malformed_names_are_rejected() {
    for name in ["core", "core_2020", "_20200101", "core_20201345"] {
        assert!(
            matches!(parse_jobname(name, DAY), Err(Error::JobName { .. })),
            "{} should not parse",
            name
        );
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn test_dump_and_load_preserve_units() {
    let dir = TempDir::new().unwrap();
    let layout = ArtifactLayout::new(dir.path());
    layout.ensure_root().unwrap();

    let w = window("2020-01-01", "2020-01-03");
    let jobs = JobList::generate(&w, DAY, DAY, &areas(&["core", "edge"]), no_hosts).unwrap();
    jobs.dump(&layout.args_path()).unwrap();

    let loaded = JobList::load(&layout.args_path(), DAY).unwrap();
    assert_eq!(loaded, jobs);
}

#[test]
fn test_stored_term_wins_over_configuration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("args");

    let w = window("2020-01-01", "2020-01-02");
    let jobs = JobList::generate(&w, 6 * HOUR, 6 * HOUR, &areas(&["core"]), no_hosts).unwrap();
    jobs.dump(&path).unwrap();

    let loaded = JobList::load(&path, DAY).unwrap();
    assert_eq!(loaded.term(), 6 * HOUR);
    assert_eq!(loaded.time_ranges(), jobs.time_ranges());
}

#[test]
fn test_legacy_list_uses_configured_term() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("args");
    fs::write(&path, "core_20200101\n\ncore_20200102\n").unwrap();

    let loaded = JobList::load(&path, DAY).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.term(), DAY);
    assert_eq!(loaded[1].range, window("2020-01-02", "2020-01-03"));
}

#[test]
fn test_unsupported_header_version() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("args");
    fs::write(&path, "# eventgrid-args v9 term_ms=86400000\ncore_20200101\n").unwrap();

    assert!(matches!(
        JobList::load(&path, DAY),
        Err(Error::JobName { .. })
    ));
}

#[test]
fn test_missing_list_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = JobList::load(&dir.path().join("args"), DAY);
    assert!(matches!(result, Err(Error::Io(_))));
}
