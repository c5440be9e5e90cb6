//! Event Definition Registry
//!
//! Assigns stable integer identifiers to event descriptors and keeps the
//! forward (`id -> descriptor`) and reverse (`descriptor -> id`) maps exact
//! inverses of each other.
//!
//! # Identifier assignment
//!
//! A new descriptor receives the smallest non-negative identifier not yet in
//! use. Registering a descriptor that is already present returns its
//! existing identifier and leaves the registry unchanged, so the registry
//! never grows twice for the same event.
//!
//! # Example
//!
//! ```rust
//! use eventgrid::registry::{EventDescriptor, EventRegistry};
//! use eventgrid::source::SourceKind;
//!
//! let mut registry = EventRegistry::new();
//! let evdef = EventDescriptor::new(SourceKind::Log, "h1", "g1", "G");
//!
//! let id = registry.register(evdef.clone()).unwrap();
//! assert_eq!(id, 0);
//! assert_eq!(registry.register(evdef.clone()).unwrap(), 0);
//! assert_eq!(registry.lookup_by_id(id).unwrap(), &evdef);
//! ```
//!
//! The registry has no internal locking: one writer per analysis unit.

mod snapshot;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result, SnapshotError};
use crate::source::SourceKind;

pub use snapshot::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

/// Event identifier; doubles as the column key of a discretized table
pub type EventId = u32;

/// Structured identity of a classified event
///
/// Equality and hashing are structural, so an equal descriptor built from
/// scratch finds the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Which kind of source produced the event
    pub source: SourceKind,

    /// Host the event was observed on
    pub host: String,

    /// Source-specific sub-identifier (log template id, `measurement@tag`)
    pub key: String,

    /// Human-readable label
    pub group: String,
}

impl EventDescriptor {
    /// Create a new descriptor
    pub fn new(
        source: SourceKind,
        host: impl Into<String>,
        key: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            source,
            host: host.into(),
            key: key.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[source={}, host={}, key={}, group={}]",
            self.source, self.host, self.key, self.group
        )
    }
}

/// Bijective store between event identifiers and descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRegistry {
    /// Forward map: id -> descriptor
    forward: BTreeMap<EventId, EventDescriptor>,

    /// Reverse map: descriptor -> id
    reverse: HashMap<EventDescriptor, EventId>,
}

impl EventRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, returning its identifier
    ///
    /// Returns the existing identifier when the descriptor is already
    /// registered.
    pub fn register(&mut self, descriptor: EventDescriptor) -> std::result::Result<EventId, RegistryError> {
        if let Some(&id) = self.reverse.get(&descriptor) {
            return Ok(id);
        }

        let id = self.next_id()?;
        self.forward.insert(id, descriptor.clone());
        self.reverse.insert(descriptor, id);
        Ok(id)
    }

    /// Smallest identifier not in use
    fn next_id(&self) -> std::result::Result<EventId, RegistryError> {
        // Keys iterate in ascending order; the first key that differs from
        // its position marks the lowest gap.
        let mut expected: EventId = 0;
        for &id in self.forward.keys() {
            if id != expected {
                return Ok(expected);
            }
            expected = expected.checked_add(1).ok_or(RegistryError::Exhausted)?;
        }
        Ok(expected)
    }

    /// Descriptor registered under `id`
    pub fn lookup_by_id(&self, id: EventId) -> std::result::Result<&EventDescriptor, RegistryError> {
        self.forward.get(&id).ok_or(RegistryError::IdNotFound(id))
    }

    /// Identifier of a registered descriptor
    pub fn lookup_by_descriptor(
        &self,
        descriptor: &EventDescriptor,
    ) -> std::result::Result<EventId, RegistryError> {
        self.reverse
            .get(descriptor)
            .copied()
            .ok_or_else(|| RegistryError::DescriptorNotFound(descriptor.to_string()))
    }

    /// Check if an identifier is registered
    pub fn contains_id(&self, id: EventId) -> bool {
        self.forward.contains_key(&id)
    }

    /// Check if a descriptor is registered
    pub fn contains_descriptor(&self, descriptor: &EventDescriptor) -> bool {
        self.reverse.contains_key(descriptor)
    }

    /// All identifiers in ascending order
    pub fn ids(&self) -> impl Iterator<Item = EventId> + '_ {
        self.forward.keys().copied()
    }

    /// All descriptors, ordered by identifier
    pub fn descriptors(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.forward.values()
    }

    /// `(id, descriptor)` pairs in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (EventId, &EventDescriptor)> {
        self.forward.iter().map(|(id, d)| (*id, d))
    }

    /// Canonical display string of the descriptor behind `id`
    pub fn describe(&self, id: EventId) -> std::result::Result<String, RegistryError> {
        self.lookup_by_id(id).map(|d| d.to_string())
    }

    /// Number of registered events
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Write a binary snapshot of both maps to `path` (atomic replace)
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = snapshot::encode(&self.forward, &self.reverse);
        snapshot::write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Read a snapshot written by [`EventRegistry::save`]
    ///
    /// The decoded maps must be exact inverses; anything else is reported
    /// as a corrupted snapshot rather than trusted.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(SnapshotError::Io)?;
        let (forward, reverse) = snapshot::decode(&bytes)?;
        Self::from_maps(forward, reverse).map_err(Into::into)
    }

    /// Build a registry from decoded maps after checking they are inverses
    fn from_maps(
        forward: BTreeMap<EventId, EventDescriptor>,
        reverse: HashMap<EventDescriptor, EventId>,
    ) -> std::result::Result<Self, SnapshotError> {
        if forward.len() != reverse.len() {
            return Err(SnapshotError::CorruptedData(format!(
                "forward map has {} entries, reverse map has {}",
                forward.len(),
                reverse.len()
            )));
        }
        for (id, descriptor) in &forward {
            match reverse.get(descriptor) {
                Some(rid) if rid == id => {},
                Some(rid) => {
                    return Err(SnapshotError::CorruptedData(format!(
                        "{} maps to id {} but reverse map says {}",
                        descriptor, id, rid
                    )));
                },
                None => {
                    return Err(SnapshotError::CorruptedData(format!(
                        "{} (id {}) missing from reverse map",
                        descriptor, id
                    )));
                },
            }
        }
        Ok(Self { forward, reverse })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_event(host: &str, key: &str) -> EventDescriptor {
        EventDescriptor::new(SourceKind::Log, host, key, "G")
    }

    #[test]
    fn test_register_first_is_zero_and_idempotent() {
        let mut registry = EventRegistry::new();
        let d = log_event("h1", "g1");

        assert_eq!(registry.register(d.clone()).unwrap(), 0);
        assert_eq!(registry.register(d.clone()).unwrap(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_follow_registration_order() {
        let mut registry = EventRegistry::new();
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|k| registry.register(log_event("h1", k)).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_structural_equality_lookup() {
        let mut registry = EventRegistry::new();
        let id = registry.register(log_event("h1", "g1")).unwrap();

        let rebuilt = EventDescriptor::new(SourceKind::Log, "h1".to_string(), "g1", "G");
        assert!(registry.contains_descriptor(&rebuilt));
        assert_eq!(registry.lookup_by_descriptor(&rebuilt).unwrap(), id);

        let other_source = EventDescriptor::new(SourceKind::Metric, "h1", "g1", "G");
        assert!(!registry.contains_descriptor(&other_source));
    }

    #[test]
    fn test_missing_lookups_are_errors() {
        let registry = EventRegistry::new();
        assert_eq!(registry.lookup_by_id(7), Err(RegistryError::IdNotFound(7)));
        assert!(matches!(
            registry.lookup_by_descriptor(&log_event("h", "k")),
            Err(RegistryError::DescriptorNotFound(_))
        ));
        assert!(!registry.contains_id(0));
    }

    #[test]
    fn test_gap_is_filled_first() {
        let mut forward = BTreeMap::new();
        let mut reverse = HashMap::new();
        for (id, key) in [(0, "a"), (2, "c")] {
            forward.insert(id, log_event("h", key));
            reverse.insert(log_event("h", key), id);
        }
        let mut registry = EventRegistry::from_maps(forward, reverse).unwrap();

        assert_eq!(registry.register(log_event("h", "b")).unwrap(), 1);
        assert_eq!(registry.register(log_event("h", "d")).unwrap(), 3);
    }

    #[test]
    fn test_describe() {
        let mut registry = EventRegistry::new();
        let id = registry.register(log_event("h1", "g1")).unwrap();
        assert_eq!(
            registry.describe(id).unwrap(),
            "[source=log, host=h1, key=g1, group=G]"
        );
    }

    #[test]
    fn test_from_maps_rejects_non_inverse() {
        let mut forward = BTreeMap::new();
        let mut reverse = HashMap::new();
        forward.insert(0, log_event("h", "a"));
        reverse.insert(log_event("h", "a"), 1);
        assert!(matches!(
            EventRegistry::from_maps(forward, reverse),
            Err(SnapshotError::CorruptedData(_))
        ));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evdef.bin");

        let mut registry = EventRegistry::new();
        registry.register(log_event("h1", "g1")).unwrap();
        registry
            .register(EventDescriptor::new(SourceKind::Metric, "h2", "cpu@user", "cpu"))
            .unwrap();
        registry.save(&path).unwrap();

        let loaded = EventRegistry::load(&path).unwrap();
        assert_eq!(loaded, registry);
    }
}
