//! Job partitioning
//!
//! Sweeps the observation window in steps of `unit_diff`, producing one
//! range of width `unit_term` per step, and pairs every range with every
//! configured area. The resulting [`JobList`] is persisted as a plain name
//! list whose header records the term, so reloading rebuilds the same
//! ranges even if the configuration changed in between.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use eventgrid::jobs::JobList;
//! use eventgrid::types::{parse_timestamp, TimeRange};
//!
//! let window = TimeRange::new(
//!     parse_timestamp("2020-01-01").unwrap(),
//!     parse_timestamp("2020-01-03").unwrap(),
//! )
//! .unwrap();
//! let day = Duration::from_secs(86_400);
//!
//! let jobs = JobList::generate(&window, day, day, &["core".to_string()], |_| Ok(Vec::new()))
//!     .unwrap();
//! assert_eq!(jobs.names(), vec!["core_20200101", "core_20200102"]);
//! ```

mod layout;
mod naming;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::ops::Index;
use std::path::Path;
use std::time::Duration;

use nom::{
    bytes::complete::tag,
    character::complete::{digit1, space1},
    combinator::{all_consuming, map_res},
    sequence::preceded,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::source::{host_area, LoaderSet, EACH_AREA};
use crate::types::{duration_ms, format_timestamp, TimeRange, Timestamp};

pub use layout::{ArtifactLayout, ARGS_FILE, EVDEF_FILE, TABLE_FILE};
pub use naming::{jobname, parse_jobname, DATETIME_FORMAT, DATETIME_MS_FORMAT, DATE_FORMAT};

/// Current unit-list header version
pub const ARGS_VERSION: u32 = 1;

const ARGS_HEADER_PREFIX: &str = "# eventgrid-args";

/// One `(time range, area)` pair processed independently
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisUnit {
    /// Time range of the unit
    pub range: TimeRange,

    /// Area label
    pub area: String,
}

impl AnalysisUnit {
    /// Create a unit
    pub fn new(range: TimeRange, area: impl Into<String>) -> Self {
        Self {
            range,
            area: area.into(),
        }
    }

    /// Canonical name
    pub fn name(&self) -> String {
        jobname(self)
    }
}

impl fmt::Display for AnalysisUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// ============================================================================
// Term Iterator
// ============================================================================

/// Iterator over unit ranges of the observation window
///
/// Ranges start at `window.start` and advance by `diff` while the start
/// is before `window.end`; each is `term` wide, so the last one may extend
/// past the window.
pub struct TermIterator {
    current: Timestamp,
    end: Timestamp,
    term_ms: i64,
    diff_ms: i64,
}

impl TermIterator {
    /// Create an iterator, rejecting zero `term` or `diff`
    pub fn new(window: &TimeRange, term: Duration, diff: Duration) -> Result<Self> {
        let term_ms = duration_ms(term)?;
        let diff_ms = duration_ms(diff)?;
        if term_ms <= 0 {
            return Err(Error::Configuration("unit_term must be positive".to_string()));
        }
        if diff_ms <= 0 {
            return Err(Error::Configuration("unit_diff must be positive".to_string()));
        }
        Ok(Self {
            current: window.start,
            end: window.end,
            term_ms,
            diff_ms,
        })
    }
}

impl Iterator for TermIterator {
    type Item = TimeRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.end {
            return None;
        }
        let start = self.current;
        let end = start.checked_add(self.term_ms)?;
        self.current = start.checked_add(self.diff_ms).unwrap_or(i64::MAX);
        Some(TimeRange { start, end })
    }
}

// ============================================================================
// Job List
// ============================================================================

/// Ordered list of analysis units sharing one term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobList {
    units: Vec<AnalysisUnit>,
    term: Duration,
}

impl JobList {
    /// Empty list
    pub fn new(term: Duration) -> Self {
        Self {
            units: Vec::new(),
            term,
        }
    }

    /// Sweep `window` and pair each range with each area
    ///
    /// `each` is replaced per range by one `host_<h>` area for every host
    /// `hosts` reports, sorted and appended after the explicit areas. Units
    /// whose name already exists are dropped.
    pub fn generate<F>(
        window: &TimeRange,
        term: Duration,
        diff: Duration,
        areas: &[String],
        mut hosts: F,
    ) -> Result<Self>
    where
        F: FnMut(&TimeRange) -> Result<Vec<String>>,
    {
        let expand_each = areas.iter().any(|a| a == EACH_AREA);
        let explicit: Vec<&String> = areas.iter().filter(|a| *a != EACH_AREA).collect();

        let mut list = Self::new(term);
        let mut seen = HashSet::new();
        for range in TermIterator::new(window, term, diff)? {
            let mut unit_areas: Vec<String> = explicit.iter().map(|a| a.to_string()).collect();
            if expand_each {
                let mut host_list = hosts(&range)?;
                host_list.sort();
                host_list.dedup();
                debug!(range = %range, hosts = host_list.len(), "expanding each");
                unit_areas.extend(host_list.iter().map(|h| host_area(h)));
            }

            for area in unit_areas {
                let unit = AnalysisUnit::new(range, area);
                if seen.insert(unit.name()) {
                    list.units.push(unit);
                }
            }
        }

        info!(units = list.len(), "generated job list");
        Ok(list)
    }

    /// Generate from `[jobs]`, expanding `each` with the loaders' hosts
    pub fn from_config(config: &Config, loaders: &LoaderSet) -> Result<Self> {
        let window = config.jobs.whole_range()?;
        Self::generate(
            &window,
            config.jobs.unit_term,
            config.jobs.unit_diff,
            &config.jobs.areas,
            |range| loaders.hosts(range),
        )
    }

    /// Append a unit
    pub fn push(&mut self, unit: AnalysisUnit) {
        self.units.push(unit);
    }

    /// Unit width
    pub fn term(&self) -> Duration {
        self.term
    }

    /// Number of units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units in order
    pub fn iter(&self) -> std::slice::Iter<'_, AnalysisUnit> {
        self.units.iter()
    }

    /// Unit at `index`
    pub fn get(&self, index: usize) -> Option<&AnalysisUnit> {
        self.units.get(index)
    }

    /// Unit with the given name
    pub fn find(&self, name: &str) -> Option<&AnalysisUnit> {
        self.units.iter().find(|u| u.name() == name)
    }

    /// Canonical names in order
    pub fn names(&self) -> Vec<String> {
        self.units.iter().map(AnalysisUnit::name).collect()
    }

    /// Distinct areas, sorted
    pub fn areas(&self) -> Vec<String> {
        self.units
            .iter()
            .map(|u| u.area.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Units of one area
    pub fn units_in_area(&self, area: &str) -> Vec<&AnalysisUnit> {
        self.units.iter().filter(|u| u.area == area).collect()
    }

    /// Units covering exactly `range`
    pub fn units_in_range(&self, range: &TimeRange) -> Vec<&AnalysisUnit> {
        self.units.iter().filter(|u| u.range == *range).collect()
    }

    /// Units whose range contains `timestamp`
    pub fn units_at(&self, timestamp: Timestamp) -> Vec<&AnalysisUnit> {
        self.units
            .iter()
            .filter(|u| u.range.contains(timestamp))
            .collect()
    }

    /// Distinct ranges, sorted by start
    pub fn time_ranges(&self) -> Vec<TimeRange> {
        self.units
            .iter()
            .map(|u| u.range)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Aligned text table `name | datetime | area`
    pub fn show(&self) -> String {
        let mut rows = vec![[
            "name".to_string(),
            "datetime".to_string(),
            "area".to_string(),
        ]];
        for unit in &self.units {
            rows.push([
                unit.name(),
                format!(
                    "{} - {}",
                    format_timestamp(unit.range.start),
                    format_timestamp(unit.range.end)
                ),
                unit.area.clone(),
            ]);
        }

        let mut widths = [0usize; 3];
        for row in &rows {
            for (w, cell) in widths.iter_mut().zip(row.iter()) {
                *w = (*w).max(cell.chars().count());
            }
        }

        rows.iter()
            .map(|row| {
                format!(
                    "{:<w0$} | {:<w1$} | {}",
                    row[0],
                    row[1],
                    row[2],
                    w0 = widths[0],
                    w1 = widths[1]
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Header line recording the term
    fn header(&self) -> String {
        format!(
            "{} v{} term_ms={}",
            ARGS_HEADER_PREFIX,
            ARGS_VERSION,
            self.term.as_millis()
        )
    }

    /// Write the name list, one name per line after the header
    pub fn dump(&self, path: &Path) -> Result<()> {
        let mut contents = self.header();
        contents.push('\n');
        for name in self.names() {
            contents.push_str(&name);
            contents.push('\n');
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Read a name list written by [`JobList::dump`]
    ///
    /// The term in the header wins over `configured_term`; a mismatch is
    /// logged. Files without a header are read with `configured_term`.
    pub fn load(path: &Path, configured_term: Duration) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut lines = contents.lines().peekable();

        let mut term = configured_term;
        if let Some(&first) = lines.peek() {
            if first.starts_with(ARGS_HEADER_PREFIX) {
                let (version, term_ms) = parse_header(first).map_err(|reason| Error::JobName {
                    name: first.to_string(),
                    reason,
                })?;
                if version != ARGS_VERSION {
                    return Err(Error::JobName {
                        name: first.to_string(),
                        reason: format!("unsupported args version {}", version),
                    });
                }
                term = Duration::from_millis(term_ms);
                if term != configured_term {
                    warn!(
                        path = %path.display(),
                        stored_ms = term_ms,
                        configured_ms = configured_term.as_millis() as u64,
                        "unit term differs from configuration, using stored term"
                    );
                }
                lines.next();
            }
        }

        let mut list = Self::new(term);
        for line in lines {
            let name = line.trim();
            if name.is_empty() || name.starts_with('#') {
                continue;
            }
            list.units.push(parse_jobname(name, term)?);
        }
        Ok(list)
    }
}

/// `# eventgrid-args v<version> term_ms=<ms>`
fn header_line(input: &str) -> IResult<&str, (u32, u64)> {
    let (input, _) = tag(ARGS_HEADER_PREFIX).parse(input)?;
    let (input, version) =
        preceded((space1, tag("v")), map_res(digit1, str::parse::<u32>)).parse(input)?;
    let (input, term_ms) =
        preceded((space1, tag("term_ms=")), map_res(digit1, str::parse::<u64>)).parse(input)?;
    Ok((input, (version, term_ms)))
}

fn parse_header(line: &str) -> std::result::Result<(u32, u64), String> {
    all_consuming(header_line)
        .parse(line.trim_end())
        .map(|(_, parsed)| parsed)
        .map_err(|e| format!("malformed header: {}", e))
}

impl Index<usize> for JobList {
    type Output = AnalysisUnit;

    fn index(&self, index: usize) -> &Self::Output {
        &self.units[index]
    }
}

impl<'a> IntoIterator for &'a JobList {
    type Item = &'a AnalysisUnit;
    type IntoIter = std::slice::Iter<'a, AnalysisUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.iter()
    }
}
