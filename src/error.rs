//! Error types for the crate

use thiserror::Error;

use crate::registry::EventId;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Registry lookup error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Registry snapshot could not be read back
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Event source error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Discretized table error
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A persisted job name could not be parsed
    #[error("Invalid job name '{name}': {reason}")]
    JobName {
        /// The offending name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Event definition registry errors
///
/// Lookups of absent keys are contract violations; callers that expect
/// absence check `contains_id` / `contains_descriptor` first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No descriptor is registered under this identifier
    #[error("Event id not found: {0}")]
    IdNotFound(EventId),

    /// The descriptor has never been registered
    #[error("Event descriptor not found: {0}")]
    DescriptorNotFound(String),

    /// Identifier space exhausted
    #[error("No free event id left")]
    Exhausted,
}

/// Registry snapshot errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic number did not match
    #[error("Invalid snapshot header: {0}")]
    InvalidHeader(String),

    /// Written by an unknown format version
    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u16),

    /// File ended before the declared content
    #[error("Snapshot truncated at byte {offset}")]
    Truncated {
        /// Offset at which more bytes were expected
        offset: usize,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The checksum stored in the file
        expected: u32,
        /// The checksum computed from the content
        actual: u32,
    },

    /// Payload decoded but is not a valid registry
    #[error("Corrupted snapshot: {0}")]
    CorruptedData(String),
}

/// Event source and loader errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Source kind tag is not one of the supported kinds
    #[error("Unsupported event source: {0}")]
    UnsupportedSource(String),

    /// The configured kind has no loader in the current loader set
    #[error("No loader configured for source '{0}'")]
    LoaderMissing(String),

    /// A descriptor key could not be mapped back to a series
    #[error("Malformed event key '{0}'")]
    MalformedKey(String),
}

/// Discretized table errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// Column length does not match the row index
    #[error("Column {id} has {actual} rows, table index has {expected}")]
    LengthMismatch {
        /// Column identifier
        id: EventId,
        /// Rows in the index
        expected: usize,
        /// Rows in the column
        actual: usize,
    },

    /// A column with this identifier already exists
    #[error("Duplicate column {0}")]
    DuplicateColumn(EventId),
}

/// Validation errors
///
/// Raised while checking configuration values; always surfaces as
/// [`Error::Configuration`].
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range: {message}")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// What the field requires
        message: String,
    },

    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid format
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat {
        /// Field name being validated
        field: String,
        /// Description of the format error
        message: String,
    },

    /// Name is not one of the supported choices
    #[error("Unsupported {field} '{value}'")]
    Unsupported {
        /// Field name being validated
        field: String,
        /// The rejected value
        value: String,
    },
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_becomes_configuration() {
        let err: Error = ValidationError::Unsupported {
            field: "bin method".to_string(),
            value: "cubic".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: Unsupported bin method 'cubic'"
        );
    }

    #[test]
    fn test_checksum_message_is_hex() {
        let err = SnapshotError::ChecksumMismatch {
            expected: 0xabc,
            actual: 0x1,
        };
        assert_eq!(err.to_string(), "Checksum mismatch: expected 0xabc, got 0x1");
    }
}
