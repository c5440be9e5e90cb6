//! Unit input construction
//!
//! Runs one analysis unit end to end: every configured loader enumerates
//! its candidates, the area test drops hosts outside the unit's area, and
//! each surviving event is loaded, filtered, discretized, registered and
//! added as a column of the joint table. Identifiers follow loader order
//! and then enumeration order.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::discretize::DiscreteTable;
use crate::error::Result;
use crate::jobs::{AnalysisUnit, ArtifactLayout, EVDEF_FILE, TABLE_FILE};
use crate::registry::EventRegistry;
use crate::source::{AreaMatcher, LoaderSet};

/// Build the joint table and registry of one unit
pub fn build_unit_input(
    config: &Config,
    loaders: &LoaderSet,
    unit: &AnalysisUnit,
) -> Result<(DiscreteTable, EventRegistry)> {
    let areas = AreaMatcher::from_config(&config.jobs);

    let mut table = DiscreteTable::new(loaders.grid(&unit.range));
    let mut registry = EventRegistry::new();

    for loader in loaders.iter() {
        for series in loader.enumerate(&unit.range)? {
            if !areas.test(&unit.area, &series.host) {
                continue;
            }
            let Some(event) = loader.load(&series, &unit.range)? else {
                continue;
            };

            let sum: f64 = event.column.iter().sum();
            let id = registry.register(event.descriptor)?;
            table.add_column(id, event.column)?;
            debug!(
                "loaded event {} {} (sum: {})",
                id,
                registry.lookup_by_id(id)?,
                sum
            );
        }
    }

    Ok((table, registry))
}

/// What one processed unit produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSummary {
    /// Unit name
    pub name: String,

    /// Registered events
    pub events: usize,

    /// Table rows
    pub rows: usize,

    /// Registry snapshot path
    pub evdef_path: PathBuf,

    /// Table path
    pub table_path: PathBuf,
}

/// Build a unit's input and write `evdef.bin` and `table.json`
pub fn process_unit(
    config: &Config,
    loaders: &LoaderSet,
    layout: &ArtifactLayout,
    unit: &AnalysisUnit,
) -> Result<UnitSummary> {
    let (table, registry) = build_unit_input(config, loaders, unit)?;

    let evdef_path = layout.evdef_path(unit)?;
    let table_path = layout.table_path(unit)?;
    registry.save(&evdef_path)?;
    table.save_json(&table_path)?;

    let summary = UnitSummary {
        name: unit.name(),
        events: registry.len(),
        rows: table.n_rows(),
        evdef_path,
        table_path,
    };
    info!(
        unit = %summary.name,
        events = summary.events,
        rows = summary.rows,
        "unit processed"
    );
    Ok(summary)
}

/// Read back the artifacts written by [`process_unit`]
pub fn load_unit_output(
    layout: &ArtifactLayout,
    unit: &AnalysisUnit,
) -> Result<(DiscreteTable, EventRegistry)> {
    let dir = layout.unit_dir(unit);
    let registry = EventRegistry::load(&dir.join(EVDEF_FILE))?;
    let table = DiscreteTable::load_json(&dir.join(TABLE_FILE))?;
    Ok((table, registry))
}
