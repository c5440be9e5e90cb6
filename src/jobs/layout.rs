//! Filesystem layout of job artifacts
//!
//! ```text
//! <output_dir>/
//!   args                  unit name list
//!   <jobname>/
//!     evdef.bin           registry snapshot
//!     table.json          discretized table
//!     dag.<ext>           downstream result
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use super::AnalysisUnit;
use crate::config::JobsConfig;
use crate::error::Result;

/// File name of the unit list
pub const ARGS_FILE: &str = "args";

/// File name of the registry snapshot
pub const EVDEF_FILE: &str = "evdef.bin";

/// File name of the discretized table
pub const TABLE_FILE: &str = "table.json";

/// Resolves artifact paths under an output root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    /// Layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at `jobs.output_dir`
    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(config.output_dir.clone())
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the unit list file
    pub fn args_path(&self) -> PathBuf {
        self.root.join(ARGS_FILE)
    }

    /// Directory of a unit (not created)
    pub fn unit_dir(&self, unit: &AnalysisUnit) -> PathBuf {
        self.root.join(unit.name())
    }

    /// Create the output root if needed
    pub fn ensure_root(&self) -> Result<&Path> {
        fs::create_dir_all(&self.root)?;
        Ok(&self.root)
    }

    /// Create the unit directory if needed
    pub fn ensure_unit_dir(&self, unit: &AnalysisUnit) -> Result<PathBuf> {
        let dir = self.unit_dir(unit);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Registry snapshot path, creating the unit directory
    pub fn evdef_path(&self, unit: &AnalysisUnit) -> Result<PathBuf> {
        Ok(self.ensure_unit_dir(unit)?.join(EVDEF_FILE))
    }

    /// Table path, creating the unit directory
    pub fn table_path(&self, unit: &AnalysisUnit) -> Result<PathBuf> {
        Ok(self.ensure_unit_dir(unit)?.join(TABLE_FILE))
    }

    /// Downstream result path `dag.<ext>`, creating the unit directory
    pub fn dag_path(&self, unit: &AnalysisUnit, ext: &str) -> Result<PathBuf> {
        Ok(self.ensure_unit_dir(unit)?.join(format!("dag.{}", ext)))
    }
}
