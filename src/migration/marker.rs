//! The schema version marker.
//!
//! A single document at [`MARKER_ID`] records which schema version has been
//! applied to the store. It is written with its own one-document transaction
//! and never deleted; a store without it is at [`UNKNOWN_VERSION`].
//!
//! The marker is always put at [`MARKER_VALID_TIME`] with an open end, so
//! successive writes are corrections of one another and transaction order
//! alone decides which value is current. Reads pick the most recently
//! written version whatever valid time it carries, so a marker written under
//! a skewed clock is still found.

use crate::LATEST_VERSION;
use crate::document::{Document, DocumentId, Value};
use crate::error::{MigrationError, MigrationResult};
use crate::query::SortOrder;
use crate::traits::store::{BitemporalStore, Snapshot, Transaction};
use chrono::{DateTime, Utc};
use log::info;

/// Identifier of the marker document.
pub const MARKER_ID: &str = "bitemporal-migrate/schema-version";

/// Content key holding the version number.
pub const MARKER_FIELD: &str = "schemaVersion";

/// Version reported for a store that has never been migrated.
pub const UNKNOWN_VERSION: i64 = -1;

/// Valid time every marker write is recorded at.
pub const MARKER_VALID_TIME: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Reads and advances the schema version marker of one store.
#[derive(Debug)]
pub struct VersionMarker<'s, S: BitemporalStore> {
    store: &'s S,
}

impl<'s, S: BitemporalStore> VersionMarker<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    fn id() -> DocumentId {
        DocumentId::from(MARKER_ID)
    }

    /// Currently applied version, or [`UNKNOWN_VERSION`] when absent.
    pub fn get(&self) -> MigrationResult<i64> {
        let id = Self::id();
        let latest = self
            .store
            .entity_history(&id, SortOrder::Ascending)?
            .into_iter()
            .filter_map(|entry| Some((entry.tx_time?, entry.tx_id, entry.valid_time?)))
            .max();
        let Some((tx_time, _, valid_time)) = latest else {
            return Ok(UNKNOWN_VERSION);
        };
        let Some(doc) = self.store.snapshot_as_of(valid_time, tx_time)?.entity(&id)? else {
            return Err(MigrationError::CorruptMarker(format!(
                "{MARKER_ID} has history but nothing visible at {valid_time}"
            )));
        };
        doc.get(MARKER_FIELD)
            .and_then(Value::as_int)
            .ok_or_else(|| {
                MigrationError::CorruptMarker(format!(
                    "{MARKER_ID} has no integer {MARKER_FIELD} field"
                ))
            })
    }

    /// Record `version` as applied, blocking until the write is durable.
    ///
    /// The marker never moves backwards: a `version` below the current one
    /// fails with [`MigrationError::MarkerRegression`] and leaves the marker
    /// untouched, so `set(v)` followed by `get()` yields `v` only when `v` is
    /// at least the current version. Re-setting the current version is
    /// allowed.
    pub fn set(&self, version: i64) -> MigrationResult<()> {
        let current = self.get()?;
        if version < current {
            return Err(MigrationError::MarkerRegression {
                current,
                requested: version,
            });
        }

        let mut tx = Transaction::with_capacity(1);
        tx.put(
            Document::new(Self::id()).with(MARKER_FIELD, version),
            MARKER_VALID_TIME,
            None,
        );
        let receipt = self.store.submit_and_await(tx)?;
        info!(
            "Schema version marker set to {version} (transaction {})",
            receipt.tx_id
        );
        Ok(())
    }

    pub fn is_latest(&self) -> MigrationResult<bool> {
        Ok(self.get()? == LATEST_VERSION)
    }
}
