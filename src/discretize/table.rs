//! Joint discretized table
//!
//! One row per grid timestamp, one column per event identifier, in the
//! order the columns were added.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::binarize_in_place;
use crate::error::{Result, TableError};
use crate::registry::EventId;
use crate::types::Timestamp;

/// A single event column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Column {
    id: EventId,
    values: Vec<f64>,
}

/// Time-indexed numeric table shared by every event of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteTable {
    index: Vec<Timestamp>,
    columns: Vec<Column>,
}

impl DiscreteTable {
    /// Create an empty table over a row index
    pub fn new(index: Vec<Timestamp>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    /// Row timestamps
    pub fn index(&self) -> &[Timestamp] {
        &self.index
    }

    /// Append a column; its length must match the index
    pub fn add_column(&mut self, id: EventId, values: Vec<f64>) -> std::result::Result<(), TableError> {
        if values.len() != self.index.len() {
            return Err(TableError::LengthMismatch {
                id,
                expected: self.index.len(),
                actual: values.len(),
            });
        }
        if self.columns.iter().any(|c| c.id == id) {
            return Err(TableError::DuplicateColumn(id));
        }
        self.columns.push(Column { id, values });
        Ok(())
    }

    /// Values of one column
    pub fn column(&self, id: EventId) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.values.as_slice())
    }

    /// Column identifiers in insertion order
    pub fn column_ids(&self) -> Vec<EventId> {
        self.columns.iter().map(|c| c.id).collect()
    }

    /// Sum of a column
    pub fn column_sum(&self, id: EventId) -> Option<f64> {
        self.column(id).map(|v| v.iter().sum())
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    /// Number of columns
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// True when the table has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Clamp every non-zero cell to `1.0`
    pub fn binarize(&mut self) {
        for column in &mut self.columns {
            binarize_in_place(&mut column.values);
        }
    }

    /// True when every cell is `0.0` or `1.0`
    pub fn is_binary(&self) -> bool {
        self.columns
            .iter()
            .flat_map(|c| c.values.iter())
            .all(|v| *v == 0.0 || *v == 1.0)
    }

    /// Write the table as JSON
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Read a table written by [`DiscreteTable::save_json`]
    pub fn load_json(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let table: Self = serde_json::from_str(&contents)?;
        for column in &table.columns {
            if column.values.len() != table.index.len() {
                return Err(TableError::LengthMismatch {
                    id: column.id,
                    expected: table.index.len(),
                    actual: column.values.len(),
                }
                .into());
            }
        }
        Ok(table)
    }
}
