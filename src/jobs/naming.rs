//! Canonical unit names
//!
//! `"{area}_{start}"` where `start` is `%Y%m%d` when the unit covers whole
//! UTC days, `%Y%m%d_%H%M%S` otherwise, with three millisecond digits
//! appended when the start is not on a whole second
//! (`core_20200101_000000500`). Names are parsed from the right so an area
//! may itself contain underscores (`host_web_01_20200101`).

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use super::AnalysisUnit;
use crate::error::{Error, Result};
use crate::types::{to_datetime, TimeRange};

/// Start format of whole-day units
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Start format of every other unit
pub const DATETIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Start format of units starting between whole seconds
pub const DATETIME_MS_FORMAT: &str = "%Y%m%d_%H%M%S%3f";

/// Canonical name of a unit
pub fn jobname(unit: &AnalysisUnit) -> String {
    let format = if unit.range.is_whole_days() {
        DATE_FORMAT
    } else if unit.range.start.rem_euclid(1000) != 0 {
        DATETIME_MS_FORMAT
    } else {
        DATETIME_FORMAT
    };
    let start = to_datetime(unit.range.start)
        .map(|dt| dt.format(format).to_string())
        .unwrap_or_else(|| unit.range.start.to_string());
    format!("{}_{}", unit.area, start)
}

/// Rebuild a unit from its name; `end` is `start + term`
pub fn parse_jobname(name: &str, term: Duration) -> Result<AnalysisUnit> {
    let (area, start) = split_name(name).ok_or_else(|| invalid(name, "no date suffix"))?;
    if area.is_empty() {
        return Err(invalid(name, "empty area"));
    }

    let start_ms = start.and_utc().timestamp_millis();
    let range = TimeRange::starting_at(start_ms, term)
        .map_err(|e| invalid(name, &e.to_string()))?;
    Ok(AnalysisUnit::new(range, area))
}

fn split_name(name: &str) -> Option<(&str, NaiveDateTime)> {
    let (head, last) = name.rsplit_once('_')?;

    if is_digits(last, 9) {
        let (area, date) = head.rsplit_once('_')?;
        if !is_digits(date, 8) {
            return None;
        }
        let (time, millis) = last.split_at(6);
        let stamp = format!("{}_{}", date, time);
        let start = NaiveDateTime::parse_from_str(&stamp, DATETIME_FORMAT).ok()?;
        let millis: i64 = millis.parse().ok()?;
        return Some((area, start + TimeDelta::milliseconds(millis)));
    }

    if is_digits(last, 6) {
        let (area, date) = head.rsplit_once('_')?;
        if !is_digits(date, 8) {
            return None;
        }
        let stamp = format!("{}_{}", date, last);
        let start = NaiveDateTime::parse_from_str(&stamp, DATETIME_FORMAT).ok()?;
        return Some((area, start));
    }

    if is_digits(last, 8) {
        let date = NaiveDate::parse_from_str(last, DATE_FORMAT).ok()?;
        return Some((head, date.and_hms_opt(0, 0, 0)?));
    }

    None
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::JobName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{parse_timestamp, MS_PER_DAY};

    const DAY: Duration = Duration::from_secs(86_400);

    fn unit(area: &str, start: &str, term: Duration) -> AnalysisUnit {
        let start = parse_timestamp(start).unwrap();
        AnalysisUnit::new(TimeRange::starting_at(start, term).unwrap(), area)
    }

    #[test]
    fn test_whole_day_name() {
        let u = unit("core", "2020-01-01", DAY);
        assert_eq!(jobname(&u), "core_20200101");
        assert_eq!(parse_jobname("core_20200101", DAY).unwrap(), u);
    }

    #[test]
    fn test_sub_day_name() {
        let hour = Duration::from_secs(3600);
        let u = unit("core", "2020-01-01 06:00:00", hour);
        assert_eq!(jobname(&u), "core_20200101_060000");
        assert_eq!(parse_jobname("core_20200101_060000", hour).unwrap(), u);

        // Midnight start, partial day: still the fine form
        let m = unit("core", "2020-01-01", hour);
        assert_eq!(jobname(&m), "core_20200101_000000");
    }

    #[test]
    fn test_sub_second_name() {
        let second = Duration::from_secs(1);
        let u = unit("core", "2020-01-01T00:00:00.500Z", second);
        assert_eq!(jobname(&u), "core_20200101_000000500");
        assert_eq!(parse_jobname(&jobname(&u), second).unwrap(), u);

        // Whole-second starts keep the six-digit form
        let whole = unit("core", "2020-01-01 00:00:01", second);
        assert_eq!(jobname(&whole), "core_20200101_000001");
    }

    #[test]
    fn test_area_with_underscores() {
        let u = unit("host_web_01", "2020-01-02", DAY);
        let name = jobname(&u);
        assert_eq!(name, "host_web_01_20200102");
        let parsed = parse_jobname(&name, DAY).unwrap();
        assert_eq!(parsed.area, "host_web_01");
        assert_eq!(parsed.range.end - parsed.range.start, MS_PER_DAY);
    }

    #[test]
    fn test_area_ending_in_digits() {
        let hour = Duration::from_secs(3600);
        let u = unit("rack_20191231", "2020-01-02 01:00:00", hour);
        assert_eq!(parse_jobname(&jobname(&u), hour).unwrap(), u);
    }

    #[test]
    fn test_rejects_bad_names() {
        for name in ["core", "core_2020", "_20200101", "core_20201301", "core_x_123456"] {
            assert!(
                matches!(parse_jobname(name, DAY), Err(Error::JobName { .. })),
                "{} should be rejected",
                name
            );
        }
    }
}
