//! # bitemporal_migrate
//!
//! Schema migration for bitemporal document stores.
//!
//! Every document in a bitemporal store keeps its full history along two
//! axes: *valid time* (when a fact held in the world) and *transaction time*
//! (when the store learned it). Migrating such a store means rewriting every
//! historical version of the affected documents at its original valid time,
//! not only the current one.
//!
//! ## Features
//!
//! - **Version marker**: a single document records the applied schema version
//! - **Batched writes**: bounded transactions, each durable before the next
//! - **History replay**: as-of reconstruction of every valid-time version
//! - **Validated chain**: upgrade steps checked for gaps and orphans up front
//! - **Backends**: an in-memory store and a file-backed redb store
//!
//! ## Quick Start
//!
//! ```rust
//! use bitemporal_migrate::prelude::*;
//! use chrono::{TimeZone, Utc};
//!
//! # fn main() -> Result<(), MigrationError> {
//! let store = MemoryStore::new();
//! let mut tx = Transaction::new();
//! tx.put(
//!     Document::new("person-1")
//!         .with("entityProxyOnly", true)
//!         .with("uniqueProperties.name", "Ada"),
//!     Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
//!     None,
//! );
//! store.submit_and_await(tx)?;
//!
//! let report = UpgradeChain::standard()?.run(&store, 500)?;
//! assert_eq!(report.final_version, LATEST_VERSION);
//!
//! let doc = store.snapshot()?.entity(&"person-1".into())?.unwrap();
//! assert!(doc.contains_key("entityProperties.name"));
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod databases;
pub mod document;
pub mod error;
pub mod migration;
pub mod prelude;
pub mod query;
pub mod traits;

/// Schema version every migration run converges on.
pub const LATEST_VERSION: i64 = 3;
