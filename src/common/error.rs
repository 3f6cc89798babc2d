//! Error types for relcore.

use crate::common::StreamId;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors surfaced by the storage and execution core.
///
/// None of these are retried internally; every failure is reported to the
/// immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ------------------------------------------------------------------
    // Stream collaborator
    // ------------------------------------------------------------------
    /// I/O error from the file-backed stream manager.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was never allocated or has been deallocated.
    #[error("{0} not found")]
    StreamNotFound(StreamId),

    /// Write access through a guard opened with `LockMode::Shared`.
    #[error("{0} is open for shared access only")]
    StreamNotWritable(StreamId),

    /// A stream checkpoint file failed validation.
    #[error("corrupt stream file: {0}")]
    CorruptStreamFile(String),

    // ------------------------------------------------------------------
    // Structural index errors
    // ------------------------------------------------------------------
    /// Insert of a key that is already present.
    #[error("duplicate key")]
    DuplicateKey,

    /// A split tried to post a separator that already exists in the parent.
    #[error("duplicate routing key")]
    DuplicateRoutingKey,

    /// Update or delete of a key that is not present.
    #[error("key not found")]
    KeyNotFound,

    /// The compare hook failed.
    #[error("unable to compare keys")]
    UnableToCompareKeys(#[source] Box<Error>),

    /// The copy-key hook failed.
    #[error("unable to copy key")]
    UnableToCopyKey(#[source] Box<Error>),

    /// The copy-data hook failed.
    #[error("unable to copy data")]
    UnableToCopyData(#[source] Box<Error>),

    /// The dispose-key hook failed.
    #[error("unable to dispose key")]
    UnableToDisposeKey(#[source] Box<Error>),

    /// The dispose-data hook failed.
    #[error("unable to dispose data")]
    UnableToDisposeData(#[source] Box<Error>),

    /// A node's bytes do not describe a valid index node.
    #[error("corrupt index node {0}: {1}")]
    CorruptIndexNode(StreamId, String),

    // ------------------------------------------------------------------
    // Cursor-state errors
    // ------------------------------------------------------------------
    /// Scan operation while the scan is not active.
    #[error("scan is not active")]
    ScanInactive,

    /// Scan row access while positioned on BOF or EOF.
    #[error("scan has no active row")]
    NoActiveRow,

    /// Cursor `select` while positioned on BOF or EOF.
    #[error("cursor has no current row")]
    NoCurrentRow,

    /// Cursor operation that requires an open cursor.
    #[error("table is not active")]
    TableInactive,

    /// Cursor reconfiguration that requires a closed cursor.
    #[error("table is active")]
    TableActive,

    // ------------------------------------------------------------------
    // Capability errors
    // ------------------------------------------------------------------
    /// `prior`/`last` on a forward-only cursor.
    #[error("cursor is not backwards navigable")]
    NotBackwardsNavigable,

    /// Key positioning on a cursor without an ordering.
    #[error("cursor is not searchable")]
    NotSearchable,

    /// Bookmark operation on a cursor that cannot produce bookmarks.
    #[error("cursor is not bookmarkable")]
    NotBookmarkable,

    /// Row count on a cursor that cannot count.
    #[error("cursor is not countable")]
    NotCountable,

    /// Truncate on a cursor that does not own its rows.
    #[error("cursor is not truncateable")]
    NotTruncateable,

    /// Any other unsupported capability.
    #[error("capability not supported: {0}")]
    CapabilityNotSupported(&'static str),

    // ------------------------------------------------------------------
    // Data errors
    // ------------------------------------------------------------------
    /// A row is missing a column needed to build an index key.
    #[error("unable to construct index key: column {0} is missing")]
    UnableToConstructIndexKey(String),

    /// `write_to_physical` without a preceding `physical_size`.
    #[error("write to physical called before physical size was prepared")]
    UnpreparedWriteToPhysicalCall,

    /// Bytes do not decode in the expected physical format.
    #[error("invalid physical format: {0}")]
    InvalidPhysicalFormat(String),

    /// A named column does not exist in the row type.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// Values of incompatible types were combined.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A table, index, operator or config definition is invalid.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// Integer aggregation overflowed.
    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    /// A row written through a restriction does not satisfy its predicate.
    #[error("row violates restriction")]
    RestrictionViolated,

    /// An explode reached a row that is already on the current path.
    #[error("hierarchy contains a cycle")]
    HierarchyCycle,

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn compare(err: Error) -> Self {
        Error::UnableToCompareKeys(Box::new(err))
    }

    pub(crate) fn copy_key(err: Error) -> Self {
        Error::UnableToCopyKey(Box::new(err))
    }

    pub(crate) fn copy_data(err: Error) -> Self {
        Error::UnableToCopyData(Box::new(err))
    }

    pub(crate) fn dispose_key(err: Error) -> Self {
        Error::UnableToDisposeKey(Box::new(err))
    }

    pub(crate) fn dispose_data(err: Error) -> Self {
        Error::UnableToDisposeData(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", Error::DuplicateKey), "duplicate key");
        assert_eq!(
            format!("{}", Error::StreamNotFound(StreamId::new(7))),
            "Stream(7) not found"
        );
        assert_eq!(
            format!("{}", Error::UnableToConstructIndexKey("id".into())),
            "unable to construct index key: column id is missing"
        );
    }

    #[test]
    fn test_hook_errors_keep_source() {
        let err = Error::compare(Error::StreamNotFound(StreamId::new(3)));
        let source = err.source().expect("wrapped hook error");
        assert_eq!(source.to_string(), "Stream(3) not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }
}
