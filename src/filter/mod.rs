//! Ordered filter pipeline for raw event timestamps
//!
//! Each filter receives the current timestamp sequence and either returns
//! a (possibly reduced) sequence or `None`. The pipeline runs the
//! configured filters in order:
//!
//! - `sizetest` returning `None` means the sequence is too small to judge:
//!   the rest of the pipeline is skipped and the untouched input is kept.
//! - Any other `None`, or an empty result, removes the event.
//!
//! Filter names are resolved against [`FILTERS`] when the pipeline is
//! built, so an unknown name fails at setup instead of mid-run.

use tracing::{debug, info};

use crate::config::FilterConfig;
use crate::error::{Error, Result, ValidationError};
use crate::registry::EventDescriptor;
use crate::types::{duration_ms, TimeRange, Timestamp};

/// Signature shared by every filter
pub type FilterFn =
    fn(&[Timestamp], &TimeRange, &EventDescriptor, &FilterParams) -> Option<Vec<Timestamp>>;

/// Name of the size test, the one filter whose `None` keeps the event
pub const SIZETEST: &str = "sizetest";

/// Every filter the pipeline can be built from
pub const FILTERS: &[(&str, FilterFn)] = &[
    (SIZETEST, sizetest),
    ("dropsparse", dropsparse),
    ("clip", clip),
    ("remove_periodic", remove_periodic),
    ("filter_periodic", filter_periodic),
];

/// Look up a filter by name
pub fn lookup(name: &str) -> Option<FilterFn> {
    FILTERS.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

/// Thresholds shared by the filters
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParams {
    /// `sizetest` is inconclusive below this many timestamps
    pub min_size: usize,

    /// `dropsparse` removes events with fewer timestamps than this
    pub sparse_threshold: usize,

    /// Share of gaps that must match the dominant interval
    pub periodic_ratio: f64,

    /// Minimum number of gaps before periodicity is judged
    pub periodic_min_count: usize,

    /// Gap tolerance in milliseconds
    pub periodic_tolerance_ms: i64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            min_size: 5,
            sparse_threshold: 2,
            periodic_ratio: 0.9,
            periodic_min_count: 4,
            periodic_tolerance_ms: 1000,
        }
    }
}

impl FilterParams {
    /// Thresholds from the `[filter]` config section
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            min_size: config.min_size,
            sparse_threshold: config.sparse_threshold,
            periodic_ratio: config.periodic_ratio,
            periodic_min_count: config.periodic_min_count,
            periodic_tolerance_ms: duration_ms(config.periodic_tolerance)?,
        })
    }
}

/// Configured chain of filters
#[derive(Debug, Clone)]
pub struct FilterPipeline {
    filters: Vec<(&'static str, FilterFn)>,
    params: FilterParams,
}

impl FilterPipeline {
    /// Build the pipeline from the `[filter]` config section
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let params = FilterParams::from_config(config)?;
        Self::from_names(&config.rules, params)
    }

    /// Build a pipeline from filter names, in order
    pub fn from_names<S: AsRef<str>>(names: &[S], params: FilterParams) -> Result<Self> {
        let filters = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                FILTERS
                    .iter()
                    .find(|(n, _)| *n == name)
                    .copied()
                    .ok_or_else(|| {
                        Error::from(ValidationError::Unsupported {
                            field: "filter rule".to_string(),
                            value: name.to_string(),
                        })
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { filters, params })
    }

    /// A pipeline that keeps every sequence as is
    pub fn empty() -> Self {
        Self {
            filters: Vec::new(),
            params: FilterParams::default(),
        }
    }

    /// Names of the configured filters, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|(n, _)| *n).collect()
    }

    /// Thresholds in use
    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// Run the pipeline
    ///
    /// Returns `None` when a filter removes the event.
    pub fn apply(
        &self,
        timestamps: &[Timestamp],
        range: &TimeRange,
        event: &EventDescriptor,
    ) -> Option<Vec<Timestamp>> {
        let mut current = timestamps.to_vec();

        for (name, filter) in &self.filters {
            match filter(&current, range, event, &self.params) {
                None if *name == SIZETEST => {
                    debug!(
                        event = %event,
                        size = timestamps.len(),
                        "sizetest inconclusive, keeping all"
                    );
                    return Some(timestamps.to_vec());
                },
                Some(next) if !next.is_empty() => current = next,
                _ => {
                    info!(event = %event, filter = *name, "event removed");
                    return None;
                },
            }
        }

        Some(current)
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Inconclusive on small samples
pub fn sizetest(
    timestamps: &[Timestamp],
    _range: &TimeRange,
    _event: &EventDescriptor,
    params: &FilterParams,
) -> Option<Vec<Timestamp>> {
    if timestamps.len() < params.min_size {
        None
    } else {
        Some(timestamps.to_vec())
    }
}

/// Remove events that occur too rarely to correlate
pub fn dropsparse(
    timestamps: &[Timestamp],
    _range: &TimeRange,
    _event: &EventDescriptor,
    params: &FilterParams,
) -> Option<Vec<Timestamp>> {
    if timestamps.len() < params.sparse_threshold {
        None
    } else {
        Some(timestamps.to_vec())
    }
}

/// Keep only timestamps inside the unit's range
pub fn clip(
    timestamps: &[Timestamp],
    range: &TimeRange,
    _event: &EventDescriptor,
    _params: &FilterParams,
) -> Option<Vec<Timestamp>> {
    Some(
        timestamps
            .iter()
            .copied()
            .filter(|t| range.contains(*t))
            .collect(),
    )
}

/// Remove events that are dominated by one fixed interval
pub fn remove_periodic(
    timestamps: &[Timestamp],
    _range: &TimeRange,
    _event: &EventDescriptor,
    params: &FilterParams,
) -> Option<Vec<Timestamp>> {
    match dominant_interval(timestamps, params) {
        Some(_) => None,
        None => Some(timestamps.to_vec()),
    }
}

/// Drop the periodic component of an event, keeping the rest
pub fn filter_periodic(
    timestamps: &[Timestamp],
    _range: &TimeRange,
    _event: &EventDescriptor,
    params: &FilterParams,
) -> Option<Vec<Timestamp>> {
    let Some(interval) = dominant_interval(timestamps, params) else {
        return Some(timestamps.to_vec());
    };

    // `beat` is the last timestamp on the periodic grid; the first
    // timestamp seeds it, and a gap longer than one period re-seeds it.
    let sorted = sorted_copy(timestamps);
    let tolerance = params.periodic_tolerance_ms;
    let mut kept = Vec::with_capacity(sorted.len());
    let mut beat: Option<Timestamp> = None;
    for t in sorted {
        match beat {
            Some(b) if ((t - b) - interval).abs() <= tolerance => beat = Some(t),
            Some(b) if t - b > interval + tolerance => {
                kept.push(t);
                beat = Some(t);
            },
            Some(_) => kept.push(t),
            None => {
                kept.push(t);
                beat = Some(t);
            },
        }
    }
    Some(kept)
}

fn sorted_copy(timestamps: &[Timestamp]) -> Vec<Timestamp> {
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    sorted
}

/// The most frequent positive gap, if it covers enough of all gaps
///
/// Ties go to the shorter gap.
fn dominant_interval(timestamps: &[Timestamp], params: &FilterParams) -> Option<i64> {
    let sorted = sorted_copy(timestamps);
    let gaps: Vec<i64> = sorted.windows(2).map(|w| w[1] - w[0]).collect();
    if gaps.is_empty() || gaps.len() < params.periodic_min_count {
        return None;
    }

    let mut by_size = gaps.clone();
    by_size.sort_unstable();
    let mut mode = by_size[0];
    let mut mode_count = 0usize;
    let mut run_start = 0usize;
    for i in 1..=by_size.len() {
        if i == by_size.len() || by_size[i] != by_size[run_start] {
            if i - run_start > mode_count {
                mode = by_size[run_start];
                mode_count = i - run_start;
            }
            run_start = i;
        }
    }
    if mode <= 0 {
        return None;
    }

    let matching = gaps
        .iter()
        .filter(|g| (**g - mode).abs() <= params.periodic_tolerance_ms)
        .count();
    if matching as f64 / gaps.len() as f64 >= params.periodic_ratio {
        Some(mode)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;

    fn event() -> EventDescriptor {
        EventDescriptor::new(SourceKind::Log, "h1", "g1", "G")
    }

    fn range() -> TimeRange {
        TimeRange::new(0, 1_000_000).unwrap()
    }

    fn params() -> FilterParams {
        FilterParams {
            min_size: 3,
            sparse_threshold: 2,
            periodic_ratio: 0.9,
            periodic_min_count: 4,
            periodic_tolerance_ms: 0,
        }
    }

    fn pipeline(names: &[&str]) -> FilterPipeline {
        FilterPipeline::from_names(names, params()).unwrap()
    }

    #[test]
    fn test_unknown_filter_rejected() {
        let err = FilterPipeline::from_names(&["sizetest", "nosuch"], params()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("nosuch"));
    }

    #[test]
    fn test_sizetest_inconclusive_keeps_original() {
        // Two timestamps are below min_size; remove_periodic must not run
        let input = vec![10, 20];
        let out = pipeline(&["sizetest", "dropsparse", "remove_periodic"])
            .apply(&input, &range(), &event());
        assert_eq!(out, Some(input));
    }

    #[test]
    fn test_sizetest_after_clip_keeps_unclipped_input() {
        let input = vec![10, 2_000_000, 3_000_000];
        let out = pipeline(&["clip", "sizetest"]).apply(&input, &range(), &event());
        assert_eq!(out, Some(input));
    }

    #[test]
    fn test_removal_is_soft() {
        let periodic: Vec<i64> = (0..10).map(|i| i * 1000).collect();
        let out = pipeline(&["sizetest", "remove_periodic"]).apply(&periodic, &range(), &event());
        assert_eq!(out, None);
    }

    #[test]
    fn test_empty_result_removes() {
        let outside = vec![2_000_000, 2_000_001, 2_000_002];
        assert_eq!(pipeline(&["clip"]).apply(&outside, &range(), &event()), None);
    }

    #[test]
    fn test_irregular_survives_periodic_checks() {
        let input = vec![0, 700, 1000, 5000, 5100, 9000];
        let out = pipeline(&["sizetest", "remove_periodic", "filter_periodic"])
            .apply(&input, &range(), &event());
        assert_eq!(out, Some(input));
    }

    #[test]
    fn test_filter_periodic_keeps_bursts() {
        // 100ms beat with two off-beat extras
        let mut input: Vec<i64> = (0..20).map(|i| i * 100).collect();
        input.push(1050);
        input.push(1550);
        let mut p = params();
        p.periodic_ratio = 0.8;

        let out = filter_periodic(&input, &range(), &event(), &p).unwrap();
        assert_eq!(out, vec![0, 1050, 1550]);
    }

    #[test]
    fn test_dominant_interval_needs_enough_gaps() {
        let p = params();
        assert_eq!(dominant_interval(&[0, 10, 20], &p), None);
        assert_eq!(dominant_interval(&[0, 10, 20, 30, 40], &p), Some(10));
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let input = vec![5, 1, 3];
        assert_eq!(
            FilterPipeline::empty().apply(&input, &range(), &event()),
            Some(input)
        );
    }

    #[test]
    fn test_params_tolerance_from_config() {
        let mut config = FilterConfig::default();
        config.periodic_tolerance = std::time::Duration::from_millis(2500);
        assert_eq!(FilterParams::from_config(&config).unwrap().periodic_tolerance_ms, 2500);

        config.periodic_tolerance = std::time::Duration::MAX;
        assert!(FilterParams::from_config(&config).is_err());
    }

    #[test]
    fn test_lookup_names() {
        assert!(lookup("clip").is_some());
        assert!(lookup("Clip").is_none());
        assert_eq!(pipeline(&["clip", "sizetest"]).names(), vec!["clip", "sizetest"]);
    }
}
