//! eventgrid - event discretization and job partitioning for log analysis
//!
//! This library prepares the input of causal analysis over system logs
//! and metrics:
//! - Partitions a long observation window into named, resumable jobs
//!   (time range × area)
//! - Assigns stable identifiers to event descriptors with a checksummed
//!   snapshot per job
//! - Cleans raw event timestamps with an ordered filter pipeline
//! - Bins irregular events onto a shared grid (sequential, slide, radius)
//!
//! # Pipeline
//!
//! ```text
//! JobList ─ unit ─▶ LoaderSet ─▶ FilterPipeline ─▶ Discretizer ─▶ DiscreteTable
//!                        │                                            │
//!                        └──────────────▶ EventRegistry ◀─────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod discretize;
pub mod error;
pub mod filter;
pub mod registry;
pub mod source;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Job partitioning, naming and artifact layout
pub mod jobs;

/// Per-unit orchestration: load, filter, discretize, register
pub mod input;

/// Tracing subscriber setup
pub mod telemetry;

// Re-export main types
pub use config::Config;
pub use discretize::{Aggregation, BinMethod, DiscreteTable, Discretizer};
pub use error::{Error, Result};
pub use filter::FilterPipeline;
pub use input::{build_unit_input, load_unit_output, process_unit, UnitSummary};
pub use jobs::{AnalysisUnit, ArtifactLayout, JobList};
pub use registry::{EventDescriptor, EventId, EventRegistry};
pub use source::{EventLoader, EventSource, LoaderSet, MemoryEventSource, SourceKind};
pub use types::{Sample, TimeRange, Timestamp};
