//! Walks every historical version of the entities matching a predicate.
//!
//! Candidates come from a query over current state. For each candidate the
//! walker fetches the full valid-time history, one entry per visible segment
//! and most recent first, and reads the document as of each entry's
//! (valid time, transaction time) pair. Only
//! one entity's history is held at a time and each document is read when the
//! iterator reaches it.

use crate::document::{Document, DocumentId};
use crate::error::MigrationResult;
use crate::query::{Predicate, SortOrder};
use crate::traits::store::{BitemporalStore, HistoryEntry, Snapshot};
use chrono::{DateTime, Utc};
use log::{debug, warn};

/// A document as it was at one point of its valid-time history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalSnapshot {
    pub document: Document,
    pub valid_time: DateTime<Utc>,
    pub end_valid_time: Option<DateTime<Utc>>,
}

/// Counters for a complete walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub entities: usize,
    pub snapshots: usize,
}

#[derive(Debug)]
pub struct HistoryWalker<'s, S: BitemporalStore> {
    store: &'s S,
}

impl<'s, S: BitemporalStore> HistoryWalker<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Identifiers whose current state satisfies `predicate`.
    pub fn candidates(&self, predicate: &Predicate) -> MigrationResult<Vec<DocumentId>> {
        let ids = self.store.query(predicate)?;
        debug!("History walk: {} candidates for {predicate:?}", ids.len());
        Ok(ids)
    }

    /// Lazily reconstructed history of one entity, most recent first.
    pub fn snapshots(&self, id: DocumentId) -> MigrationResult<EntitySnapshots<'s, S>> {
        let entries = self.store.entity_history(&id, SortOrder::Descending)?;
        Ok(EntitySnapshots {
            store: self.store,
            id,
            entries: entries.into_iter(),
        })
    }

    /// Visit every historical snapshot of every candidate exactly once.
    pub fn walk<F>(&self, predicate: &Predicate, mut visit: F) -> MigrationResult<WalkStats>
    where
        F: FnMut(HistoricalSnapshot) -> MigrationResult<()>,
    {
        let mut stats = WalkStats::default();
        for id in self.candidates(predicate)? {
            stats.entities += 1;
            for snapshot in self.snapshots(id)? {
                visit(snapshot?)?;
                stats.snapshots += 1;
            }
        }
        Ok(stats)
    }
}

/// Iterator over one entity's historical snapshots.
///
/// Entries missing either time coordinate are skipped, as are entries whose
/// as-of read finds nothing.
pub struct EntitySnapshots<'s, S: BitemporalStore> {
    store: &'s S,
    id: DocumentId,
    entries: std::vec::IntoIter<HistoryEntry>,
}

impl<S: BitemporalStore> EntitySnapshots<'_, S> {
    fn read(&self, entry: &HistoryEntry) -> MigrationResult<Option<HistoricalSnapshot>> {
        let (Some(valid_time), Some(tx_time)) = (entry.valid_time, entry.tx_time) else {
            debug!(
                "Skipping history entry of {} without both time coordinates: {entry:?}",
                self.id
            );
            return Ok(None);
        };

        let document = self
            .store
            .snapshot_as_of(valid_time, tx_time)?
            .entity(&self.id)?;
        match document {
            Some(document) => Ok(Some(HistoricalSnapshot {
                document,
                valid_time,
                end_valid_time: entry.end_valid_time,
            })),
            None => {
                warn!(
                    "No document for {} as of valid time {valid_time}, tx time {tx_time}; skipping",
                    self.id
                );
                Ok(None)
            }
        }
    }
}

impl<S: BitemporalStore> Iterator for EntitySnapshots<'_, S> {
    type Item = MigrationResult<HistoricalSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.entries.next() {
            match self.read(&entry) {
                Ok(Some(snapshot)) => return Some(Ok(snapshot)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
