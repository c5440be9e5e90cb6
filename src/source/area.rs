//! Area membership tests

use std::collections::BTreeMap;

use crate::config::JobsConfig;

/// Area that matches every host
pub const ALL_AREA: &str = "all";

/// Area token expanded into one `host_<h>` area per host
pub const EACH_AREA: &str = "each";

/// Prefix of single-host areas
pub const HOST_AREA_PREFIX: &str = "host_";

/// Single-host area name for `host`
pub fn host_area(host: &str) -> String {
    format!("{}{}", HOST_AREA_PREFIX, host)
}

/// Decides whether a host belongs to an area
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AreaMatcher {
    groups: BTreeMap<String, Vec<String>>,
}

impl AreaMatcher {
    /// Create a matcher over a group table (`area -> hosts`)
    pub fn new(groups: BTreeMap<String, Vec<String>>) -> Self {
        Self { groups }
    }

    /// Matcher over `[jobs.area_def]`
    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(config.area_def.clone())
    }

    /// True if `host` belongs to `area`
    ///
    /// An area that is neither `all`, `host_<h>`, nor a configured group
    /// matches nothing.
    pub fn test(&self, area: &str, host: &str) -> bool {
        if area == ALL_AREA {
            return true;
        }
        if let Some(members) = self.groups.get(area) {
            return members.iter().any(|m| m == host);
        }
        match area.strip_prefix(HOST_AREA_PREFIX) {
            Some(h) => h == host,
            None => false,
        }
    }

    /// Configured group names
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}
