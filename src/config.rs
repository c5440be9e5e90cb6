//! Configuration management
//!
//! TOML configuration with per-field defaults and environment variable
//! overrides. Durations are written as compact strings (`"1d"`, `"30m"`,
//! `"500ms"`), datetimes as `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` in UTC.
//!
//! ```toml
//! [jobs]
//! whole_term = { start = "2020-01-01", end = "2020-01-03" }
//! unit_term = "1d"
//! unit_diff = "1d"
//! areas = ["core", "each"]
//! output_dir = "/var/lib/eventgrid"
//!
//! [jobs.area_def]
//! core = ["rt01", "rt02"]
//!
//! [discretize]
//! method = "slide"
//! bin_size = "1m"
//! bin_diff = "30s"
//! binarize = true
//!
//! [filter]
//! rules = ["sizetest", "remove_periodic"]
//!
//! [source]
//! kinds = ["log", "metric"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{digit1, multispace0},
    combinator::all_consuming,
    multi::many1,
    sequence::delimited,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};

use crate::discretize::{Aggregation, BinMethod};
use crate::error::{Error, Result, ValidationError};
use crate::filter::FilterPipeline;
use crate::source::SourceKind;
use crate::types::{parse_timestamp, TimeRange};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "EVENTGRID_CONFIG";

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "eventgrid.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Job partitioning
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Temporal discretization
    #[serde(default)]
    pub discretize: DiscretizeConfig,

    /// Filter pipeline for log events
    #[serde(default)]
    pub filter: FilterConfig,

    /// Event sources
    #[serde(default)]
    pub source: SourceConfig,

    /// Logging
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Global observation window
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WholeTerm {
    /// Inclusive start datetime
    pub start: String,

    /// Exclusive end datetime
    pub end: String,
}

/// Job partitioning configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Window swept by the partitioner
    #[serde(default)]
    pub whole_term: Option<WholeTerm>,

    /// Width of each unit's time range
    #[serde(default = "default_unit_term", with = "duration_str")]
    pub unit_term: Duration,

    /// Step between consecutive unit starts
    #[serde(default = "default_unit_term", with = "duration_str")]
    pub unit_diff: Duration,

    /// Areas, in order; `"each"` expands to one area per host
    #[serde(default = "default_areas")]
    pub areas: Vec<String>,

    /// Root directory for job artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Group areas: area name -> member hosts
    #[serde(default)]
    pub area_def: BTreeMap<String, Vec<String>>,
}

/// Discretization configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscretizeConfig {
    /// Binning method: sequential, slide or radius
    #[serde(default = "default_method")]
    pub method: String,

    /// Bin width (also the radius diameter for `radius`)
    #[serde(default = "default_bin_size", with = "duration_str")]
    pub bin_size: Duration,

    /// Grid step for `slide` and `radius`
    #[serde(default = "default_bin_size", with = "duration_str")]
    pub bin_diff: Duration,

    /// Aggregation applied inside each bin
    #[serde(default = "default_aggregation")]
    pub aggregation: String,

    /// Clamp non-zero cells to 1
    #[serde(default = "default_true")]
    pub binarize: bool,
}

/// Filter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterConfig {
    /// Filter names applied in this exact order
    #[serde(default)]
    pub rules: Vec<String>,

    /// Below this many timestamps `sizetest` is inconclusive
    #[serde(default = "default_min_size")]
    pub min_size: usize,

    /// Below this many timestamps `dropsparse` removes the event
    #[serde(default = "default_sparse_threshold")]
    pub sparse_threshold: usize,

    /// Share of gaps the dominant interval must cover to count as periodic
    #[serde(default = "default_periodic_ratio")]
    pub periodic_ratio: f64,

    /// Minimum number of gaps before periodicity is judged
    #[serde(default = "default_periodic_min_count")]
    pub periodic_min_count: usize,

    /// Tolerance when comparing a gap to the dominant interval
    #[serde(default = "default_periodic_tolerance", with = "duration_str")]
    pub periodic_tolerance: Duration,
}

/// Event source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Source kinds loaded for every unit, in order
    #[serde(default = "default_kinds")]
    pub kinds: Vec<String>,

    /// JSON-lines event file read by the command line tool
    #[serde(default)]
    pub data_file: Option<PathBuf>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub structured_logging: bool,
}

// Default value functions
fn default_unit_term() -> Duration { Duration::from_secs(86_400) }
fn default_areas() -> Vec<String> { vec!["all".to_string()] }
fn default_output_dir() -> PathBuf { PathBuf::from("eventgrid_output") }
fn default_method() -> String { "sequential".to_string() }
fn default_bin_size() -> Duration { Duration::from_secs(60) }
fn default_aggregation() -> String { "sum".to_string() }
fn default_min_size() -> usize { 5 }
fn default_sparse_threshold() -> usize { 2 }
fn default_periodic_ratio() -> f64 { 0.9 }
fn default_periodic_min_count() -> usize { 4 }
fn default_periodic_tolerance() -> Duration { Duration::from_secs(1) }
fn default_kinds() -> Vec<String> { vec!["log".to_string()] }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            whole_term: None,
            unit_term: default_unit_term(),
            unit_diff: default_unit_term(),
            areas: default_areas(),
            output_dir: default_output_dir(),
            area_def: BTreeMap::new(),
        }
    }
}

impl Default for DiscretizeConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            bin_size: default_bin_size(),
            bin_diff: default_bin_size(),
            aggregation: default_aggregation(),
            binarize: true,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            min_size: default_min_size(),
            sparse_threshold: default_sparse_threshold(),
            periodic_ratio: default_periodic_ratio(),
            periodic_min_count: default_periodic_min_count(),
            periodic_tolerance: default_periodic_tolerance(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kinds: default_kinds(),
            data_file: None,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            structured_logging: false,
        }
    }
}

impl JobsConfig {
    /// The configured observation window
    pub fn whole_range(&self) -> Result<TimeRange> {
        let term = self
            .whole_term
            .as_ref()
            .ok_or_else(|| ValidationError::MissingField("jobs.whole_term".to_string()))?;
        TimeRange::new(parse_timestamp(&term.start)?, parse_timestamp(&term.end)?)
    }
}

impl DiscretizeConfig {
    /// Parsed binning method
    pub fn bin_method(&self) -> Result<BinMethod> {
        self.method.parse()
    }

    /// Parsed aggregation
    pub fn aggregation(&self) -> Result<Aggregation> {
        self.aggregation.parse()
    }
}

impl SourceConfig {
    /// Parsed source kinds in configured order
    pub fn source_kinds(&self) -> Result<Vec<SourceKind>> {
        self.kinds
            .iter()
            .map(|k| k.parse::<SourceKind>().map_err(Error::from))
            .collect()
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_toml(&contents).map_err(|e| match e {
            Error::Configuration(msg) => Error::Configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                msg
            )),
            other => other,
        })
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Resolve and load the configuration
    ///
    /// Order: explicit path, `EVENTGRID_CONFIG`, `./eventgrid.toml`, defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file_with_env(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::from_file_with_env(Path::new(&env_path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file_with_env(local);
        }
        Ok(Self::from_env())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(output_dir) = std::env::var("EVENTGRID_OUTPUT_DIR") {
            self.jobs.output_dir = PathBuf::from(output_dir);
        }
        if let Ok(data_file) = std::env::var("EVENTGRID_DATA_FILE") {
            self.source.data_file = Some(PathBuf::from(data_file));
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    ///
    /// Every setup-time failure (unsupported method or source, unknown
    /// filter, zero steps) is reported here, before any unit runs.
    pub fn validate(&self) -> Result<()> {
        self.jobs.whole_range()?;

        if self.jobs.unit_term.is_zero() {
            return Err(out_of_range("jobs.unit_term", "0", "must be positive"));
        }
        if self.jobs.unit_diff.is_zero() {
            return Err(out_of_range("jobs.unit_diff", "0", "must be positive"));
        }
        if self.jobs.output_dir.as_os_str().is_empty() {
            return Err(ValidationError::MissingField("jobs.output_dir".to_string()).into());
        }

        self.discretize.bin_method()?;
        self.discretize.aggregation()?;
        if self.discretize.bin_size.is_zero() {
            return Err(out_of_range("discretize.bin_size", "0", "must be positive"));
        }
        if self.discretize.bin_diff.is_zero() {
            return Err(out_of_range("discretize.bin_diff", "0", "must be positive"));
        }

        if !(0.0..=1.0).contains(&self.filter.periodic_ratio) {
            return Err(out_of_range(
                "filter.periodic_ratio",
                &self.filter.periodic_ratio.to_string(),
                "must be within [0, 1]",
            ));
        }
        FilterPipeline::from_config(&self.filter)?;

        if self.source.kinds.is_empty() {
            return Err(ValidationError::MissingField("source.kinds".to_string()).into());
        }
        self.source.source_kinds()?;

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn out_of_range(field: &str, value: &str, message: &str) -> Error {
    ValidationError::OutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    }
    .into()
}

// ============================================================================
// Duration strings
// ============================================================================

/// Parse one `<number><unit>` term
fn duration_term(input: &str) -> IResult<&str, Duration> {
    let (input, num_str) = digit1(input)?;
    let (input, unit) = alt((
        tag_no_case("ms"),
        tag_no_case("s"),
        tag_no_case("m"),
        tag_no_case("h"),
        tag_no_case("d"),
        tag_no_case("w"),
    ))
    .parse(input)?;

    let num: u64 = num_str.parse().unwrap_or(u64::MAX);
    let duration = match unit.to_lowercase().as_str() {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num.saturating_mul(60)),
        "h" => Duration::from_secs(num.saturating_mul(3600)),
        "d" => Duration::from_secs(num.saturating_mul(86400)),
        _ => Duration::from_secs(num.saturating_mul(604800)),
    };

    Ok((input, duration))
}

/// Parse a duration string such as `1d`, `90s` or `1h30m`
///
/// # Example
///
/// ```rust
/// use eventgrid::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
/// assert!(parse_duration("soon").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let parsed = all_consuming(delimited(multispace0, many1(duration_term), multispace0))
        .parse(s)
        .map_err(|_| {
            Error::from(ValidationError::InvalidFormat {
                field: "duration".to_string(),
                message: format!("'{}' is not a duration like 30s, 5m, 1h or 1d", s),
            })
        })?;
    parsed
        .1
        .into_iter()
        .try_fold(Duration::ZERO, |total, term| total.checked_add(term))
        .ok_or_else(|| out_of_range("duration", s, "exceeds the largest representable duration"))
}

/// Render a duration in the largest unit that divides it evenly
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    const UNITS: [(u128, &str); 5] = [
        (604_800_000, "w"),
        (86_400_000, "d"),
        (3_600_000, "h"),
        (60_000, "m"),
        (1_000, "s"),
    ];
    for (unit_ms, suffix) in UNITS {
        if ms % unit_ms == 0 {
            return format!("{}{}", ms / unit_ms, suffix);
        }
    }
    format!("{}ms", ms)
}

/// Serde adapter for duration strings
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [jobs]
        whole_term = { start = "2020-01-01", end = "2020-01-03" }
        unit_term = "1d"
        unit_diff = "12h"
        areas = ["core", "each"]
        output_dir = "/tmp/eventgrid"

        [jobs.area_def]
        core = ["rt01", "rt02"]

        [discretize]
        method = "radius"
        bin_size = "2m"
        bin_diff = "1m"
        binarize = false

        [filter]
        rules = ["sizetest", "dropsparse"]

        [source]
        kinds = ["log", "metric"]
    "#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.jobs.unit_term, Duration::from_secs(86_400));
        assert_eq!(config.discretize.method, "sequential");
        assert!(config.discretize.binarize);
        assert_eq!(config.source.kinds, vec!["log".to_string()]);
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.jobs.unit_diff, Duration::from_secs(43_200));
        assert_eq!(config.jobs.area_def["core"], vec!["rt01", "rt02"]);
        assert_eq!(config.discretize.bin_method().unwrap(), BinMethod::Radius);
        assert_eq!(
            config.source.source_kinds().unwrap(),
            vec![SourceKind::Log, SourceKind::Metric]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_needs_whole_term() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("jobs.whole_term"));
    }

    #[test]
    fn test_rejects_zero_diff() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.jobs.unit_diff = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_unknown_names() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.discretize.method = "cubic".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.filter.rules.push("no_such_filter".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.source.kinds.push("syslog-ng".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_duration_fails_parse() {
        let err = Config::from_toml("[jobs]\nunit_term = \"forever\"").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_duration_strings() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration(" 1h30m ").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration("2W").unwrap(), Duration::from_secs(1_209_600));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("1y").is_err());

        assert_eq!(format_duration(Duration::from_secs(86_400)), "1d");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
    }

    #[test]
    fn test_duration_overflow_is_an_error() {
        let huge = "18446744073709551615s1s";
        assert!(matches!(parse_duration(huge), Err(Error::Configuration(_))));
        assert!(parse_duration("18446744073709551615s").is_ok());

        let toml = format!("[jobs]\nunit_term = \"{}\"", huge);
        assert!(matches!(Config::from_toml(&toml), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eventgrid.toml");
        let config = Config::from_toml(SAMPLE).unwrap();
        config.save_to_file(&path).unwrap();

        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.jobs.unit_diff, config.jobs.unit_diff);
        assert_eq!(reloaded.jobs.whole_term, config.jobs.whole_term);
        assert_eq!(reloaded.filter.rules, config.filter.rules);
    }
}
