//! Temporal discretization engine
//!
//! Turns an irregular sequence of samples into one value per row of a
//! regular grid over the unit's time range.
//!
//! # Binning methods
//!
//! | method       | grid step  | row `t` covers                  |
//! |--------------|------------|---------------------------------|
//! | `sequential` | `bin_size` | `[t, t + bin_size)`, no overlap |
//! | `slide`      | `bin_diff` | `[t, t + bin_size)`             |
//! | `radius`     | `bin_diff` | `[t - r, t - r + bin_size)`, `r = bin_size / 2` |
//!
//! The grid always starts at the range start and stops before the range
//! end. Samples inside a row's window are combined with the configured
//! [`Aggregation`]; rows with no samples are `0.0`. With binarization on,
//! every non-zero cell becomes `1.0` after aggregation.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use eventgrid::discretize::{BinMethod, Discretizer};
//! use eventgrid::types::{Sample, TimeRange};
//!
//! let range = TimeRange::new(0, 10_000).unwrap();
//! let discretizer = Discretizer::new(
//!     BinMethod::Sequential,
//!     Duration::from_secs(5),
//!     Duration::from_secs(5),
//! )
//! .unwrap();
//!
//! let column = discretizer
//!     .discretize(&[Sample::occurrence(1_000), Sample::occurrence(6_000)], &range)
//!     .unwrap();
//! assert_eq!(column, vec![1.0, 1.0]);
//! ```

mod table;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DiscretizeConfig;
use crate::error::{Error, Result, ValidationError};
use crate::types::{duration_ms, Sample, TimeRange, Timestamp};

pub use table::DiscreteTable;

// ============================================================================
// Binning method
// ============================================================================

/// How samples are assigned to grid rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinMethod {
    /// Non-overlapping bins of `bin_size`; the source may pre-aggregate
    Sequential,

    /// Windows of `bin_size` starting every `bin_diff`
    Slide,

    /// Windows of `bin_size` centred on every `bin_diff` step
    Radius,
}

impl BinMethod {
    /// Config name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            BinMethod::Sequential => "sequential",
            BinMethod::Slide => "slide",
            BinMethod::Radius => "radius",
        }
    }
}

impl fmt::Display for BinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BinMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(BinMethod::Sequential),
            "slide" => Ok(BinMethod::Slide),
            "radius" => Ok(BinMethod::Radius),
            _ => Err(ValidationError::Unsupported {
                field: "bin method".to_string(),
                value: s.to_string(),
            }
            .into()),
        }
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// How the samples falling in one row are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Sum of values
    #[default]
    Sum,

    /// Number of samples
    Count,

    /// Largest value
    Max,

    /// Arithmetic mean
    Mean,
}

impl Aggregation {
    /// Config name of the aggregation
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Count => "count",
            Aggregation::Max => "max",
            Aggregation::Mean => "mean",
        }
    }

    /// Combine values; an empty input is `0.0`
    pub fn apply<I: IntoIterator<Item = f64>>(&self, values: I) -> f64 {
        let mut sum = 0.0;
        let mut count = 0u64;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            sum += v;
            count += 1;
            if v > max {
                max = v;
            }
        }

        if count == 0 {
            return 0.0;
        }
        match self {
            Aggregation::Sum => sum,
            Aggregation::Count => count as f64,
            Aggregation::Max => max,
            Aggregation::Mean => sum / count as f64,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "count" => Ok(Aggregation::Count),
            "max" => Ok(Aggregation::Max),
            "mean" | "avg" => Ok(Aggregation::Mean),
            _ => Err(ValidationError::Unsupported {
                field: "aggregation".to_string(),
                value: s.to_string(),
            }
            .into()),
        }
    }
}

// ============================================================================
// Discretizer
// ============================================================================

/// Configured binning strategy
#[derive(Debug, Clone, PartialEq)]
pub struct Discretizer {
    method: BinMethod,
    bin_size_ms: i64,
    bin_diff_ms: i64,
    aggregation: Aggregation,
    binarize: bool,
}

impl Discretizer {
    /// Create a discretizer with sum aggregation and no binarization
    ///
    /// `bin_diff` is ignored by the sequential method.
    pub fn new(method: BinMethod, bin_size: Duration, bin_diff: Duration) -> Result<Self> {
        let bin_size_ms = duration_ms(bin_size)?;
        let bin_diff_ms = duration_ms(bin_diff)?;
        if bin_size_ms <= 0 {
            return Err(Error::Configuration(
                "bin_size must be at least 1ms".to_string(),
            ));
        }
        if bin_diff_ms <= 0 {
            return Err(Error::Configuration(
                "bin_diff must be at least 1ms".to_string(),
            ));
        }

        Ok(Self {
            method,
            bin_size_ms,
            bin_diff_ms,
            aggregation: Aggregation::Sum,
            binarize: false,
        })
    }

    /// Build from the `[discretize]` config section
    pub fn from_config(config: &DiscretizeConfig) -> Result<Self> {
        Ok(Self::new(config.bin_method()?, config.bin_size, config.bin_diff)?
            .with_aggregation(config.aggregation()?)
            .with_binarize(config.binarize))
    }

    /// Set the aggregation
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Enable or disable binarization
    pub fn with_binarize(mut self, binarize: bool) -> Self {
        self.binarize = binarize;
        self
    }

    /// Binning method
    pub fn method(&self) -> BinMethod {
        self.method
    }

    /// Bin size
    pub fn bin_size(&self) -> Duration {
        Duration::from_millis(self.bin_size_ms as u64)
    }

    /// True when cells are clamped to 0/1
    pub fn binarize(&self) -> bool {
        self.binarize
    }

    /// Distance between consecutive rows
    fn step_ms(&self) -> i64 {
        match self.method {
            BinMethod::Sequential => self.bin_size_ms,
            BinMethod::Slide | BinMethod::Radius => self.bin_diff_ms,
        }
    }

    /// Row timestamps for `range`
    pub fn grid(&self, range: &TimeRange) -> Vec<Timestamp> {
        let step = self.step_ms();
        let rows = ((range.duration_ms() + step - 1) / step) as usize;
        (0..rows).map(|i| range.start + i as i64 * step).collect()
    }

    /// Bin samples onto the grid of `range`
    ///
    /// Returns `None` when every cell is zero.
    pub fn discretize(&self, samples: &[Sample], range: &TimeRange) -> Option<Vec<f64>> {
        let mut column = match self.method {
            BinMethod::Sequential => self.bin_sequential(samples, range),
            BinMethod::Slide => {
                self.bin_windows(samples, range, |t| (t, t + self.bin_size_ms))
            },
            BinMethod::Radius => {
                let r = self.bin_size_ms / 2;
                self.bin_windows(samples, range, |t| (t - r, t - r + self.bin_size_ms))
            },
        };

        if self.binarize {
            binarize_in_place(&mut column);
        }

        if column.iter().all(|v| *v == 0.0) {
            None
        } else {
            Some(column)
        }
    }

    fn bin_sequential(&self, samples: &[Sample], range: &TimeRange) -> Vec<f64> {
        let rows = self.grid(range).len();
        let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); rows];
        for sample in samples.iter().filter(|s| range.contains(s.timestamp)) {
            let idx = ((sample.timestamp - range.start) / self.bin_size_ms) as usize;
            buckets[idx].push(sample.value);
        }
        buckets
            .into_iter()
            .map(|b| self.aggregation.apply(b))
            .collect()
    }

    fn bin_windows<F>(&self, samples: &[Sample], range: &TimeRange, window: F) -> Vec<f64>
    where
        F: Fn(Timestamp) -> (Timestamp, Timestamp),
    {
        let mut sorted = samples.to_vec();
        sorted.sort_by_key(|s| s.timestamp);

        self.grid(range)
            .into_iter()
            .map(|t| {
                let (lo, hi) = window(t);
                let first = sorted.partition_point(|s| s.timestamp < lo);
                let last = sorted.partition_point(|s| s.timestamp < hi);
                self.aggregation
                    .apply(sorted[first..last.max(first)].iter().map(|s| s.value))
            })
            .collect()
    }
}

/// Clamp every non-zero cell to `1.0`
pub fn binarize_in_place(values: &mut [f64]) {
    for v in values.iter_mut() {
        if *v != 0.0 {
            *v = 1.0;
        }
    }
}
