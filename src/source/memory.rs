//! In-memory event source
//!
//! Backs tests and the CLI. Series keep insertion order, which is the
//! order `conditions` reports them in.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{EventSource, SeriesKey, SourceKind, SourceMap, LOG_MEASUREMENT};
use crate::error::{Error, Result};
use crate::types::{duration_ms, parse_timestamp, Sample, TimeRange};

/// Simple in-memory event source
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSource {
    /// Series data in insertion order
    series: Vec<(SeriesKey, Vec<Sample>)>,

    /// Position of each key in `series`
    positions: HashMap<SeriesKey, usize>,

    labels: HashMap<SeriesKey, String>,
    instructions: HashMap<(String, String), String>,
}

impl MemoryEventSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add samples to a series, creating it on first use
    pub fn add_series(&mut self, key: SeriesKey, samples: Vec<Sample>) {
        let idx = match self.positions.get(&key) {
            Some(&idx) => idx,
            None => {
                self.series.push((key.clone(), Vec::new()));
                self.positions.insert(key, self.series.len() - 1);
                self.series.len() - 1
            },
        };
        let data = &mut self.series[idx].1;
        data.extend(samples);
        data.sort_by_key(|s| s.timestamp);
    }

    /// Add one sample
    pub fn push(&mut self, key: SeriesKey, sample: Sample) {
        self.add_series(key, vec![sample]);
    }

    /// Set the label of a series
    pub fn set_label(&mut self, key: &SeriesKey, label: impl Into<String>) {
        self.labels.insert(key.clone(), label.into());
    }

    /// Set the instruction text of a log template on a host
    pub fn set_instruction(&mut self, host: &str, key: &str, text: impl Into<String>) {
        self.instructions
            .insert((host.to_string(), key.to_string()), text.into());
    }

    /// Number of series
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// True when no series were added
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    fn in_range<'a>(&'a self, key: &SeriesKey, range: &TimeRange) -> &'a [Sample] {
        let Some(&idx) = self.positions.get(key) else {
            return &[];
        };
        let data = &self.series[idx].1;
        let first = data.partition_point(|s| s.timestamp < range.start);
        let last = data.partition_point(|s| s.timestamp < range.end);
        &data[first..last]
    }
}

impl EventSource for MemoryEventSource {
    fn conditions(&self, range: &TimeRange) -> Result<Vec<SeriesKey>> {
        Ok(self
            .series
            .iter()
            .filter(|(key, _)| !self.in_range(key, range).is_empty())
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn hosts(&self, range: &TimeRange) -> Result<Vec<String>> {
        let mut hosts: Vec<String> = self
            .conditions(range)?
            .into_iter()
            .map(|k| k.host)
            .collect();
        hosts.sort();
        hosts.dedup();
        Ok(hosts)
    }

    fn load_items(&self, series: &SeriesKey, range: &TimeRange) -> Result<Vec<Sample>> {
        Ok(self.in_range(series, range).to_vec())
    }

    fn load_binned(
        &self,
        series: &SeriesKey,
        range: &TimeRange,
        bin_size: Duration,
    ) -> Result<Vec<Sample>> {
        let bin = duration_ms(bin_size)?.max(1);
        let mut bins: BTreeMap<i64, f64> = BTreeMap::new();
        for sample in self.in_range(series, range) {
            let start = range.start + (sample.timestamp - range.start) / bin * bin;
            *bins.entry(start).or_insert(0.0) += sample.value;
        }
        Ok(bins
            .into_iter()
            .map(|(timestamp, value)| Sample::new(timestamp, value))
            .collect())
    }

    fn label(&self, series: &SeriesKey) -> String {
        if let Some(label) = self.labels.get(series) {
            return label.clone();
        }
        if series.measurement == LOG_MEASUREMENT {
            series.key.clone()
        } else {
            series.measurement.clone()
        }
    }

    fn instruction(&self, host: &str, key: &str) -> Result<String> {
        Ok(self
            .instructions
            .get(&(host.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_else(|| key.to_string()))
    }
}

// ============================================================================
// JSON-lines input
// ============================================================================

/// One line of a JSON-lines event dump
///
/// ```json
/// {"source": "log", "host": "rt01", "key": "12", "time": "2020-01-02 03:04:05"}
/// {"source": "metric", "measurement": "ifHCInOctets", "host": "rt01", "key": "ge-0/0/1", "time": "2020-01-02 03:05:00", "value": 1520.0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Source kind tag
    pub source: SourceKind,

    /// Measurement; log records default to the log feature measurement
    #[serde(default)]
    pub measurement: Option<String>,

    /// Host tag
    pub host: String,

    /// Sub-key tag
    pub key: String,

    /// Datetime string, UTC
    pub time: String,

    /// Sample value
    #[serde(default = "default_value")]
    pub value: f64,

    /// Optional series label
    #[serde(default)]
    pub label: Option<String>,

    /// Optional instruction text (log records)
    #[serde(default)]
    pub instruction: Option<String>,
}

fn default_value() -> f64 {
    1.0
}

impl SourceRecord {
    fn series_key(&self) -> Result<SeriesKey> {
        let measurement = match (&self.measurement, self.source) {
            (Some(m), _) => m.clone(),
            (None, SourceKind::Log) => LOG_MEASUREMENT.to_string(),
            (None, SourceKind::Metric) => {
                return Err(Error::Serialization(format!(
                    "metric record for host {} key {} has no measurement",
                    self.host, self.key
                )));
            },
        };
        Ok(SeriesKey::new(measurement, self.host.clone(), self.key.clone()))
    }
}

/// Load one in-memory source per kind from a JSON-lines file
///
/// Blank lines and lines starting with `#` are ignored.
pub fn load_json_lines(path: &Path) -> Result<SourceMap> {
    let reader = BufReader::new(File::open(path)?);
    let mut stores: BTreeMap<SourceKind, MemoryEventSource> = BTreeMap::new();
    let mut count = 0usize;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let record: SourceRecord = serde_json::from_str(trimmed).map_err(|e| {
            Error::Serialization(format!("{}:{}: {}", path.display(), lineno + 1, e))
        })?;
        let timestamp = parse_timestamp(&record.time)?;
        let key = record.series_key()?;

        let store = stores.entry(record.source).or_default();
        if let Some(label) = &record.label {
            store.set_label(&key, label.clone());
        }
        if let Some(text) = &record.instruction {
            store.set_instruction(&record.host, &record.key, text.clone());
        }
        store.push(key, Sample::new(timestamp, record.value));
        count += 1;
    }

    info!(path = %path.display(), records = count, "loaded event records");

    Ok(stores
        .into_iter()
        .map(|(kind, store)| (kind, Arc::new(store) as Arc<dyn EventSource>))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn key(host: &str) -> SeriesKey {
        SeriesKey::new(LOG_MEASUREMENT, host, "7")
    }

    #[test]
    fn test_conditions_follow_insertion_order() {
        let mut mem = MemoryEventSource::new();
        mem.push(key("b"), Sample::occurrence(10));
        mem.push(key("a"), Sample::occurrence(20));
        mem.push(key("c"), Sample::occurrence(500));

        let range = TimeRange::new(0, 100).unwrap();
        assert_eq!(mem.conditions(&range).unwrap(), vec![key("b"), key("a")]);
        assert_eq!(mem.hosts(&range).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_load_binned_sums_per_bin() {
        let mut mem = MemoryEventSource::new();
        let k = SeriesKey::new("cpu", "h", "user");
        mem.add_series(
            k.clone(),
            vec![
                Sample::new(1_500, 2.0),
                Sample::new(1_000, 1.0),
                Sample::new(3_200, 4.0),
            ],
        );
        let range = TimeRange::new(1_000, 5_000).unwrap();
        let binned = mem
            .load_binned(&k, &range, Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            binned,
            vec![Sample::new(1_000, 3.0), Sample::new(3_000, 4.0)]
        );
        assert_eq!(mem.label(&k), "cpu");
    }

    #[test]
    fn test_load_json_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# dump").unwrap();
        writeln!(
            file,
            r#"{{"source": "log", "host": "rt01", "key": "12", "time": "2020-01-02 00:00:05", "label": "login"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"source": "snmp", "measurement": "if", "host": "rt01", "key": "eth0", "time": "2020-01-02", "value": 3.5}}"#
        )
        .unwrap();

        let sources = load_json_lines(file.path()).unwrap();
        assert_eq!(sources.len(), 2);

        let log = &sources[&SourceKind::Log];
        let range = TimeRange::new(1_577_923_200_000, 1_577_923_260_000).unwrap();
        let conditions = log.conditions(&range).unwrap();
        assert_eq!(conditions, vec![SeriesKey::new(LOG_MEASUREMENT, "rt01", "12")]);
        assert_eq!(log.label(&conditions[0]), "login");

        let metric = &sources[&SourceKind::Metric];
        let items = metric
            .load_items(&SeriesKey::new("if", "rt01", "eth0"), &range)
            .unwrap();
        assert_eq!(items, vec![Sample::new(1_577_923_200_000, 3.5)]);
    }

    #[test]
    fn test_metric_record_needs_measurement() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"source": "metric", "host": "rt01", "key": "eth0", "time": "2020-01-02"}}"#
        )
        .unwrap();
        assert!(matches!(
            load_json_lines(file.path()),
            Err(Error::Serialization(_))
        ));
    }
}
