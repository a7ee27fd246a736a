//! Error types for migration runs.
//!
//! Every fallible operation in this crate returns [`MigrationResult<T>`], an
//! alias for `Result<T, MigrationError>`. The variants fall into three classes:
//!
//! - configuration problems (bad CLI input, unreadable config file), reported
//!   before the store is ever opened;
//! - chain problems (a marker value no step handles, an inconsistent step
//!   table);
//! - store I/O problems (redb, encoding, durability waits).
//!
//! None of them is retried. A failed run leaves the version marker where it
//! was, and the next run repeats the interrupted step from scratch.
//!
//! ```
//! use bitemporal_migrate::error::{MigrationError, MigrationResult};
//!
//! fn check(version: i64) -> MigrationResult<()> {
//!     Err(MigrationError::UnregisteredVersion { version })
//! }
//!
//! let err = check(7).unwrap_err();
//! assert!(!err.is_configuration());
//! assert_eq!(err.to_string(), "No upgrade step registered for schema version 7");
//! ```

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// The main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Missing or invalid configuration (CLI input, config file).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The stored marker holds a version no registered step starts from.
    #[error("No upgrade step registered for schema version {version}")]
    UnregisteredVersion { version: i64 },

    /// The step table has a gap, a cycle, or a step off the upgrade path.
    #[error("Invalid upgrade chain: {0}")]
    InvalidChain(String),

    /// Attempt to move the version marker backwards.
    #[error("Refusing to move schema version marker from {current} back to {requested}")]
    MarkerRegression { current: i64, requested: i64 },

    /// A transaction the store refuses to apply.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The marker document exists but does not hold an integer version.
    #[error("Corrupt version marker: {0}")]
    CorruptMarker(String),

    /// Wraps errors from the redb backend
    #[error(transparent)]
    Redb(#[from] RedbError),

    /// Wraps serialization errors from bincode
    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    /// Wraps deserialization errors from bincode
    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),

    /// The store could not confirm a transaction or is otherwise unusable.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Whether this error belongs to the configuration class (exit code 1).
    pub fn is_configuration(&self) -> bool {
        matches!(self, MigrationError::Configuration(_))
    }
}

/// Errors that can occur when interacting with the redb database.
#[derive(Error, Debug)]
pub enum RedbError {
    /// Errors from database creation or opening
    #[error(transparent)]
    DatabaseError(#[from] redb::DatabaseError),

    /// Errors from transaction operations
    #[error(transparent)]
    TransactionError(#[from] redb::TransactionError),

    /// Errors from table operations
    #[error(transparent)]
    TableError(#[from] redb::TableError),

    /// Errors from committing transactions
    #[error(transparent)]
    CommitError(#[from] redb::CommitError),

    /// Errors from storage operations
    #[error(transparent)]
    StorageError(#[from] redb::StorageError),
}

macro_rules! impl_from_redb {
    ($($err:ty => $variant:ident),*) => {
        $(
            impl From<$err> for MigrationError {
                fn from(err: $err) -> Self {
                    MigrationError::Redb(RedbError::$variant(err))
                }
            }
        )*
    };
}

impl_from_redb!(
    redb::DatabaseError => DatabaseError,
    redb::TransactionError => TransactionError,
    redb::TableError => TableError,
    redb::CommitError => CommitError,
    redb::StorageError => StorageError
);
