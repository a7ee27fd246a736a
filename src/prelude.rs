//! Prelude module for convenient imports.
//!
//! ```rust
//! use bitemporal_migrate::prelude::*;
//! ```

pub use crate::LATEST_VERSION;
pub use crate::config::{MigratorConfig, StoreConfig};
pub use crate::databases::{MemoryStore, RedbStore};
pub use crate::document::{Document, DocumentId, Value};
pub use crate::error::{MigrationError, MigrationResult};
pub use crate::migration::{
    ChainReport, StepReport, StepRunner, UpgradeChain, UpgradeStep, VersionMarker,
};
pub use crate::query::{Predicate, SortOrder};
pub use crate::traits::{BitemporalStore, Snapshot, Transaction};
