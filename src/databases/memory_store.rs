//! In-memory bitemporal store.
//!
//! Keeps every entity timeline and a transaction log behind a mutex. Writes
//! are visible as soon as `submit` returns, so `await_tx` only checks that the
//! receipt belongs to this store.

use super::timeline::{EntityTimeline, check_valid_range, next_tx_time};
use crate::document::{Document, DocumentId};
use crate::error::{MigrationError, MigrationResult};
use crate::query::{Predicate, SortOrder};
use crate::traits::store::{BitemporalStore, HistoryEntry, Snapshot, Transaction, TxOp, TxReceipt};
use chrono::{DateTime, Utc};
use log::trace;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy)]
struct TxLogEntry {
    receipt: TxReceipt,
    ops: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: BTreeMap<DocumentId, EntityTimeline>,
    tx_log: Vec<TxLogEntry>,
}

impl MemoryState {
    fn last_tx_time(&self) -> Option<DateTime<Utc>> {
        self.tx_log.last().map(|entry| entry.receipt.tx_time)
    }
}

/// In-memory store. Clones share the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MigrationResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| MigrationError::StoreUnavailable("memory store lock poisoned".to_string()))
    }

    /// Number of operations in each submitted transaction, oldest first.
    pub fn transaction_sizes(&self) -> MigrationResult<Vec<usize>> {
        Ok(self.lock()?.tx_log.iter().map(|entry| entry.ops).collect())
    }

    pub fn transaction_count(&self) -> MigrationResult<usize> {
        Ok(self.lock()?.tx_log.len())
    }

    /// Every version stored for `id`.
    pub fn timeline(&self, id: &DocumentId) -> MigrationResult<Option<EntityTimeline>> {
        Ok(self.lock()?.entities.get(id).cloned())
    }

    pub fn entity_ids(&self) -> MigrationResult<Vec<DocumentId>> {
        Ok(self.lock()?.entities.keys().cloned().collect())
    }
}

impl BitemporalStore for MemoryStore {
    type Snapshot<'a>
        = MemorySnapshot<'a>
    where
        Self: 'a;

    fn submit(&self, tx: Transaction) -> MigrationResult<TxReceipt> {
        let mut state = self.lock()?;
        for op in tx.ops() {
            let TxOp::Put {
                valid_time,
                end_valid_time,
                ..
            } = op;
            check_valid_range(*valid_time, *end_valid_time)?;
        }

        let receipt = TxReceipt {
            tx_id: state.tx_log.len() as u64 + 1,
            tx_time: next_tx_time(state.last_tx_time()),
        };
        let ops = tx.len();
        for op in tx.into_ops() {
            let TxOp::Put {
                document,
                valid_time,
                end_valid_time,
            } = op;
            let id = document.id().clone();
            let written = state.entities.entry(id.clone()).or_default().put(
                document,
                valid_time,
                end_valid_time,
                receipt.tx_id,
                receipt.tx_time,
            );
            if !written {
                trace!("MemoryStore: put of {id} at {valid_time} is a no-op");
            }
        }
        state.tx_log.push(TxLogEntry { receipt, ops });
        Ok(receipt)
    }

    fn await_tx(&self, receipt: &TxReceipt) -> MigrationResult<()> {
        let state = self.lock()?;
        let known = receipt
            .tx_id
            .checked_sub(1)
            .and_then(|idx| state.tx_log.get(idx as usize))
            .is_some_and(|entry| entry.receipt == *receipt);
        if known {
            Ok(())
        } else {
            Err(MigrationError::StoreUnavailable(format!(
                "transaction {} was never submitted to this store",
                receipt.tx_id
            )))
        }
    }

    fn query(&self, predicate: &Predicate) -> MigrationResult<Vec<DocumentId>> {
        let now = Utc::now();
        let state = self.lock()?;
        Ok(state
            .entities
            .iter()
            .filter(|(_, timeline)| {
                timeline
                    .as_of(now, None)
                    .is_some_and(|doc| predicate.matches(doc))
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn entity_history(
        &self,
        id: &DocumentId,
        order: SortOrder,
    ) -> MigrationResult<Vec<HistoryEntry>> {
        let state = self.lock()?;
        Ok(state
            .entities
            .get(id)
            .map(|timeline| timeline.history(order))
            .unwrap_or_default())
    }

    fn snapshot(&self) -> MigrationResult<MemorySnapshot<'_>> {
        let tx_time = self.lock()?.last_tx_time();
        Ok(MemorySnapshot {
            store: self,
            valid_time: Utc::now(),
            tx_time,
        })
    }

    fn snapshot_as_of(
        &self,
        valid_time: DateTime<Utc>,
        tx_time: DateTime<Utc>,
    ) -> MigrationResult<MemorySnapshot<'_>> {
        Ok(MemorySnapshot {
            store: self,
            valid_time,
            tx_time: Some(tx_time),
        })
    }
}

/// Read view over a [`MemoryStore`] at fixed coordinates.
pub struct MemorySnapshot<'a> {
    store: &'a MemoryStore,
    valid_time: DateTime<Utc>,
    tx_time: Option<DateTime<Utc>>,
}

impl Snapshot for MemorySnapshot<'_> {
    fn entity(&self, id: &DocumentId) -> MigrationResult<Option<Document>> {
        let state = self.store.lock()?;
        Ok(state
            .entities
            .get(id)
            .and_then(|timeline| timeline.as_of(self.valid_time, self.tx_time))
            .cloned())
    }
}
