//! Event sources and loaders
//!
//! An [`EventSource`] is the external store of parsed events. Each
//! configured [`SourceKind`] gets one [`EventLoader`], which enumerates the
//! candidate series of a unit, pulls their samples, runs the filter
//! pipeline (log events only) and discretizes the result.
//!
//! Loaders are built once per run into a [`LoaderSet`] and passed
//! explicitly to every unit.

mod area;
mod memory;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::discretize::{BinMethod, Discretizer};
use crate::error::{Error, Result, SourceError};
use crate::filter::FilterPipeline;
use crate::registry::EventDescriptor;
use crate::types::{format_timestamp, Sample, TimeRange, Timestamp};

pub use area::{host_area, AreaMatcher, ALL_AREA, EACH_AREA, HOST_AREA_PREFIX};
pub use memory::{load_json_lines, MemoryEventSource, SourceRecord};

/// Measurement under which log features are stored
pub const LOG_MEASUREMENT: &str = "log_feature";

// ============================================================================
// Source kind
// ============================================================================

/// Kind of event source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Events classified from log messages
    Log,

    /// Events derived from polled metrics
    #[serde(alias = "snmp")]
    Metric,
}

impl SourceKind {
    /// Config tag
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Log => "log",
            SourceKind::Metric => "metric",
        }
    }

    /// Byte tag used in registry snapshots
    pub fn tag(&self) -> u8 {
        match self {
            SourceKind::Log => 0,
            SourceKind::Metric => 1,
        }
    }

    /// Inverse of [`SourceKind::tag`]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SourceKind::Log),
            1 => Some(SourceKind::Metric),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = SourceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" => Ok(SourceKind::Log),
            "metric" | "snmp" => Ok(SourceKind::Metric),
            _ => Err(SourceError::UnsupportedSource(s.to_string())),
        }
    }
}

// ============================================================================
// Event source trait
// ============================================================================

/// Identity of one raw series in a source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Measurement name
    pub measurement: String,

    /// Host tag
    pub host: String,

    /// Sub-key tag (log template id, interface name, ...)
    pub key: String,
}

impl SeriesKey {
    /// Create a series key
    pub fn new(
        measurement: impl Into<String>,
        host: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            host: host.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.measurement, self.host, self.key)
    }
}

/// Store of parsed events for one source kind
///
/// This trait abstracts the event database so loaders work against any
/// backend.
pub trait EventSource: Send + Sync {
    /// Candidate series for a time range, in a stable order
    fn conditions(&self, range: &TimeRange) -> Result<Vec<SeriesKey>>;

    /// Distinct hosts with data in the range, sorted
    fn hosts(&self, range: &TimeRange) -> Result<Vec<String>>;

    /// Raw samples of one series within the range, ordered by time
    fn load_items(&self, series: &SeriesKey, range: &TimeRange) -> Result<Vec<Sample>>;

    /// Samples pre-aggregated by the source into bins of `bin_size`
    fn load_binned(
        &self,
        series: &SeriesKey,
        range: &TimeRange,
        bin_size: Duration,
    ) -> Result<Vec<Sample>>;

    /// Human-readable label of a series
    fn label(&self, series: &SeriesKey) -> String;

    /// Description of a log template on a host
    fn instruction(&self, host: &str, key: &str) -> Result<String>;
}

/// Shared handles to the sources of each kind
pub type SourceMap = HashMap<SourceKind, Arc<dyn EventSource>>;

// ============================================================================
// Loaders
// ============================================================================

/// One discretized event ready to be registered
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEvent {
    /// Identity of the event
    pub descriptor: EventDescriptor,

    /// Values on the unit's grid
    pub column: Vec<f64>,
}

/// Loader for log-derived events
pub struct LogEventLoader {
    source: Arc<dyn EventSource>,
    filters: FilterPipeline,
    discretizer: Discretizer,
}

impl LogEventLoader {
    /// Create a loader
    pub fn new(
        source: Arc<dyn EventSource>,
        filters: FilterPipeline,
        discretizer: Discretizer,
    ) -> Self {
        Self {
            source,
            filters,
            discretizer,
        }
    }

    fn descriptor(&self, series: &SeriesKey) -> EventDescriptor {
        EventDescriptor::new(
            SourceKind::Log,
            series.host.clone(),
            series.key.clone(),
            self.source.label(series),
        )
    }

    fn load(&self, series: &SeriesKey, range: &TimeRange) -> Result<Option<LoadedEvent>> {
        let items = self.source.load_items(series, range)?;
        if items.is_empty() {
            debug!(series = %series, "no log items in range");
            return Ok(None);
        }

        let descriptor = self.descriptor(series);
        let timestamps: Vec<_> = items.iter().map(|s| s.timestamp).collect();
        let Some(kept) = self.filters.apply(&timestamps, range, &descriptor) else {
            return Ok(None);
        };

        let samples: Vec<_> = kept.into_iter().map(Sample::occurrence).collect();
        Ok(self
            .discretizer
            .discretize(&samples, range)
            .map(|column| LoadedEvent { descriptor, column }))
    }
}

/// Loader for metric-derived events
pub struct MetricEventLoader {
    source: Arc<dyn EventSource>,
    discretizer: Discretizer,
}

impl MetricEventLoader {
    /// Create a loader
    pub fn new(source: Arc<dyn EventSource>, discretizer: Discretizer) -> Self {
        Self {
            source,
            discretizer,
        }
    }

    fn descriptor(&self, series: &SeriesKey) -> EventDescriptor {
        EventDescriptor::new(
            SourceKind::Metric,
            series.host.clone(),
            metric_key(&series.measurement, &series.key),
            self.source.label(series),
        )
    }

    fn load(&self, series: &SeriesKey, range: &TimeRange) -> Result<Option<LoadedEvent>> {
        let samples = match self.discretizer.method() {
            BinMethod::Sequential => {
                self.source
                    .load_binned(series, range, self.discretizer.bin_size())?
            },
            BinMethod::Slide | BinMethod::Radius => self.source.load_items(series, range)?,
        };
        if samples.is_empty() {
            debug!(series = %series, "no metric samples in range");
            return Ok(None);
        }

        let descriptor = self.descriptor(series);
        Ok(self
            .discretizer
            .discretize(&samples, range)
            .map(|column| LoadedEvent { descriptor, column }))
    }
}

/// Descriptor key of a metric series
pub fn metric_key(measurement: &str, key: &str) -> String {
    format!("{}@{}", measurement, key)
}

/// Split a metric descriptor key back into `(measurement, key)`
pub fn split_metric_key(name: &str) -> std::result::Result<(&str, &str), SourceError> {
    name.split_once('@')
        .filter(|(m, _)| !m.is_empty())
        .ok_or_else(|| SourceError::MalformedKey(name.to_string()))
}

/// Loader for one source kind
pub enum EventLoader {
    /// Log-derived events
    Log(LogEventLoader),

    /// Metric-derived events
    Metric(MetricEventLoader),
}

impl EventLoader {
    /// Source kind served by this loader
    pub fn kind(&self) -> SourceKind {
        match self {
            EventLoader::Log(_) => SourceKind::Log,
            EventLoader::Metric(_) => SourceKind::Metric,
        }
    }

    fn source(&self) -> &Arc<dyn EventSource> {
        match self {
            EventLoader::Log(l) => &l.source,
            EventLoader::Metric(m) => &m.source,
        }
    }

    /// Discretizer the loader bins with
    pub fn discretizer(&self) -> &Discretizer {
        match self {
            EventLoader::Log(l) => &l.discretizer,
            EventLoader::Metric(m) => &m.discretizer,
        }
    }

    /// Candidate series for a unit, in source order
    pub fn enumerate(&self, range: &TimeRange) -> Result<Vec<SeriesKey>> {
        self.source().conditions(range)
    }

    /// Hosts with data in the range
    pub fn hosts(&self, range: &TimeRange) -> Result<Vec<String>> {
        self.source().hosts(range)
    }

    /// Load, filter and discretize one series
    ///
    /// `Ok(None)` means the event was skipped: no data, removed by a
    /// filter, or all-zero after binning.
    pub fn load(&self, series: &SeriesKey, range: &TimeRange) -> Result<Option<LoadedEvent>> {
        let loaded = match self {
            EventLoader::Log(l) => l.load(series, range)?,
            EventLoader::Metric(m) => m.load(series, range)?,
        };
        if loaded.is_none() {
            debug!(series = %series, source = %self.kind(), "event skipped");
        }
        Ok(loaded)
    }

    /// Label of a series
    pub fn label(&self, series: &SeriesKey) -> String {
        self.source().label(series)
    }

    /// Human-readable description of a registered event
    pub fn instruction(&self, descriptor: &EventDescriptor) -> Result<String> {
        match self {
            EventLoader::Log(l) => {
                let text = l.source.instruction(&descriptor.host, &descriptor.key)?;
                Ok(format!("{}: {}", descriptor.host, text))
            },
            EventLoader::Metric(_) => Ok(descriptor.to_string()),
        }
    }

    /// Raw samples of a registered event, abbreviated to `head` + `foot` lines
    pub fn detail(
        &self,
        descriptor: &EventDescriptor,
        range: &TimeRange,
        head: usize,
        foot: usize,
    ) -> Result<String> {
        let series = self.series_of(descriptor)?;
        let items = self.source().load_items(&series, range)?;
        let lines: Vec<String> = items
            .iter()
            .map(|s| format!("{}: {}", format_timestamp(s.timestamp), s.value))
            .collect();
        Ok(abbreviate(&lines, head, foot))
    }

    /// Series a descriptor was loaded from
    pub fn series_of(&self, descriptor: &EventDescriptor) -> Result<SeriesKey> {
        match self {
            EventLoader::Log(_) => Ok(SeriesKey::new(
                LOG_MEASUREMENT,
                descriptor.host.clone(),
                descriptor.key.clone(),
            )),
            EventLoader::Metric(_) => {
                let (measurement, key) = split_metric_key(&descriptor.key)?;
                Ok(SeriesKey::new(measurement, descriptor.host.clone(), key))
            },
        }
    }
}

/// First `head` and last `foot` lines with a `...` marker between
pub fn abbreviate(lines: &[String], head: usize, foot: usize) -> String {
    if lines.len() <= head + foot {
        return lines.join("\n");
    }
    let mut out: Vec<&str> = lines[..head].iter().map(String::as_str).collect();
    out.push("...");
    out.extend(lines[lines.len() - foot..].iter().map(String::as_str));
    out.join("\n")
}

// ============================================================================
// Loader set
// ============================================================================

/// The loaders for the configured sources, in configured order
///
/// Every loader bins with the set's discretizer, so the set owns the row
/// grid of each unit table.
pub struct LoaderSet {
    discretizer: Discretizer,
    loaders: Vec<EventLoader>,
}

impl LoaderSet {
    /// Wrap already-built loaders
    ///
    /// Fails when a loader bins with a different discretizer.
    pub fn new(discretizer: Discretizer, loaders: Vec<EventLoader>) -> Result<Self> {
        if let Some(loader) = loaders.iter().find(|l| *l.discretizer() != discretizer) {
            return Err(Error::Configuration(format!(
                "{} loader bins with {:?}, expected {:?}",
                loader.kind(),
                loader.discretizer(),
                discretizer
            )));
        }
        Ok(Self {
            discretizer,
            loaders,
        })
    }

    /// Build one loader per configured source kind
    ///
    /// Fails when a configured kind has no source in `sources`.
    pub fn from_config(config: &Config, sources: &SourceMap) -> Result<Self> {
        let discretizer = Discretizer::from_config(&config.discretize)?;
        let filters = FilterPipeline::from_config(&config.filter)?;

        let mut loaders = Vec::new();
        for kind in config.source.source_kinds()? {
            let source = sources
                .get(&kind)
                .cloned()
                .ok_or_else(|| SourceError::LoaderMissing(kind.to_string()))?;
            let loader = match kind {
                SourceKind::Log => EventLoader::Log(LogEventLoader::new(
                    source,
                    filters.clone(),
                    discretizer.clone(),
                )),
                SourceKind::Metric => {
                    EventLoader::Metric(MetricEventLoader::new(source, discretizer.clone()))
                },
            };
            loaders.push(loader);
        }

        Ok(Self {
            discretizer,
            loaders,
        })
    }

    /// Discretizer shared by every loader
    pub fn discretizer(&self) -> &Discretizer {
        &self.discretizer
    }

    /// Row timestamps of a unit table over `range`
    pub fn grid(&self, range: &TimeRange) -> Vec<Timestamp> {
        self.discretizer.grid(range)
    }

    /// Loaders in configured order
    pub fn iter(&self) -> impl Iterator<Item = &EventLoader> {
        self.loaders.iter()
    }

    /// Loader for a source kind
    pub fn get(&self, kind: SourceKind) -> std::result::Result<&EventLoader, SourceError> {
        self.loaders
            .iter()
            .find(|l| l.kind() == kind)
            .ok_or_else(|| SourceError::LoaderMissing(kind.to_string()))
    }

    /// Distinct hosts across every loader, sorted
    pub fn hosts(&self, range: &TimeRange) -> Result<Vec<String>> {
        let mut hosts = Vec::new();
        for loader in &self.loaders {
            hosts.extend(loader.hosts(range)?);
        }
        hosts.sort();
        hosts.dedup();
        Ok(hosts)
    }

    /// Instruction text for a registered event
    pub fn instruction(&self, descriptor: &EventDescriptor) -> Result<String> {
        self.get(descriptor.source)?.instruction(descriptor)
    }

    /// Abbreviated raw samples for a registered event
    pub fn detail(
        &self,
        descriptor: &EventDescriptor,
        range: &TimeRange,
        head: usize,
        foot: usize,
    ) -> Result<String> {
        self.get(descriptor.source)?
            .detail(descriptor, range, head, foot)
    }

    /// Number of loaders
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// True when no source is configured
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: i64 = 1000;

    fn source() -> Arc<dyn EventSource> {
        let mut mem = MemoryEventSource::new();
        mem.add_series(
            SeriesKey::new(LOG_MEASUREMENT, "h1", "12"),
            (0..6).map(|i| Sample::occurrence(i * 7 * S)).collect(),
        );
        mem.set_label(&SeriesKey::new(LOG_MEASUREMENT, "h1", "12"), "ssh login");
        mem.set_instruction("h1", "12", "sshd: Accepted publickey for **");
        mem.add_series(
            SeriesKey::new("ifHCInOctets", "h1", "eth0"),
            vec![Sample::new(0, 10.0), Sample::new(30 * S, 0.0)],
        );
        Arc::new(mem)
    }

    fn discretizer() -> Discretizer {
        Discretizer::new(
            BinMethod::Sequential,
            Duration::from_secs(10),
            Duration::from_secs(10),
        )
        .unwrap()
    }

    fn range() -> TimeRange {
        TimeRange::new(0, 60 * S).unwrap()
    }

    #[test]
    fn test_source_kind_tags() {
        assert_eq!("log".parse::<SourceKind>().unwrap(), SourceKind::Log);
        assert_eq!("snmp".parse::<SourceKind>().unwrap(), SourceKind::Metric);
        assert_eq!(
            "syslog".parse::<SourceKind>(),
            Err(SourceError::UnsupportedSource("syslog".to_string()))
        );
        for kind in [SourceKind::Log, SourceKind::Metric] {
            assert_eq!(SourceKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(SourceKind::from_tag(7), None);
    }

    #[test]
    fn test_log_loader_builds_descriptor() {
        let loader = EventLoader::Log(LogEventLoader::new(
            source(),
            FilterPipeline::empty(),
            discretizer(),
        ));
        let series = SeriesKey::new(LOG_MEASUREMENT, "h1", "12");
        let event = loader.load(&series, &range()).unwrap().unwrap();

        assert_eq!(
            event.descriptor,
            EventDescriptor::new(SourceKind::Log, "h1", "12", "ssh login")
        );
        // occurrences at 0,7,14,21,28,35s
        assert_eq!(event.column, vec![2.0, 1.0, 2.0, 1.0, 0.0, 0.0]);
        assert_eq!(loader.series_of(&event.descriptor).unwrap(), series);
    }

    #[test]
    fn test_metric_key_format() {
        let loader = EventLoader::Metric(MetricEventLoader::new(source(), discretizer()));
        let series = SeriesKey::new("ifHCInOctets", "h1", "eth0");
        let event = loader.load(&series, &range()).unwrap().unwrap();

        assert_eq!(event.descriptor.key, "ifHCInOctets@eth0");
        assert_eq!(event.descriptor.group, "ifHCInOctets");
        assert_eq!(loader.series_of(&event.descriptor).unwrap(), series);
        assert_eq!(
            loader.instruction(&event.descriptor).unwrap(),
            event.descriptor.to_string()
        );
    }

    #[test]
    fn test_missing_series_is_skip() {
        let loader = EventLoader::Metric(MetricEventLoader::new(source(), discretizer()));
        let series = SeriesKey::new("cpu", "h9", "user");
        assert_eq!(loader.load(&series, &range()).unwrap(), None);
    }

    #[test]
    fn test_log_instruction_and_detail() {
        let loader = EventLoader::Log(LogEventLoader::new(
            source(),
            FilterPipeline::empty(),
            discretizer(),
        ));
        let descriptor = EventDescriptor::new(SourceKind::Log, "h1", "12", "ssh login");
        assert_eq!(
            loader.instruction(&descriptor).unwrap(),
            "h1: sshd: Accepted publickey for **"
        );

        let detail = loader.detail(&descriptor, &range(), 2, 1).unwrap();
        let lines: Vec<_> = detail.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "1970-01-01 00:00:00: 1");
        assert_eq!(lines[2], "...");
        assert_eq!(lines[3], "1970-01-01 00:00:35: 1");
    }

    #[test]
    fn test_malformed_metric_key() {
        assert_eq!(split_metric_key("cpu@user").unwrap(), ("cpu", "user"));
        assert!(split_metric_key("nokey").is_err());
        assert!(split_metric_key("@x").is_err());
    }

    #[test]
    fn test_loader_set_requires_sources() {
        let mut config = Config::default();
        config.source.kinds = vec!["log".to_string(), "metric".to_string()];

        let mut sources: SourceMap = HashMap::new();
        sources.insert(SourceKind::Log, source());
        let err = LoaderSet::from_config(&config, &sources).err().unwrap();
        assert!(matches!(err, Error::Source(SourceError::LoaderMissing(_))));

        sources.insert(SourceKind::Metric, source());
        let set = LoaderSet::from_config(&config, &sources).unwrap();
        let kinds: Vec<_> = set.iter().map(|l| l.kind()).collect();
        assert_eq!(kinds, vec![SourceKind::Log, SourceKind::Metric]);
        assert_eq!(set.hosts(&range()).unwrap(), vec!["h1".to_string()]);
    }

    #[test]
    fn test_loader_set_owns_the_grid() {
        let coarse = Discretizer::new(
            BinMethod::Sequential,
            Duration::from_secs(20),
            Duration::from_secs(20),
        )
        .unwrap();
        let set = LoaderSet::new(
            coarse.clone(),
            vec![EventLoader::Metric(MetricEventLoader::new(source(), coarse))],
        )
        .unwrap();
        assert_eq!(set.grid(&range()), vec![0, 20 * S, 40 * S]);

        // A loader on another grid is refused
        let err = LoaderSet::new(
            discretizer(),
            vec![
                EventLoader::Metric(MetricEventLoader::new(source(), discretizer())),
                EventLoader::Log(LogEventLoader::new(
                    source(),
                    FilterPipeline::empty(),
                    set.discretizer().clone(),
                )),
            ],
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_abbreviate() {
        let lines: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        assert_eq!(abbreviate(&lines, 1, 1), "0\n...\n4");
        assert_eq!(abbreviate(&lines, 3, 2), "0\n1\n2\n3\n4");
    }
}
