//! The bitemporal store capability surface.
//!
//! The migration engine never touches a concrete backend. It drives anything
//! implementing [`BitemporalStore`]: submit a transaction, wait for it to be
//! durable, query current state, list an entity's history, and read the store
//! as of a (valid time, transaction time) pair.

use crate::document::{Document, DocumentId};
use crate::error::MigrationResult;
use crate::query::{Predicate, SortOrder};
use chrono::{DateTime, Utc};

/// A single write inside a [`Transaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum TxOp {
    /// Put `document` as valid from `valid_time` until `end_valid_time`
    /// (open-ended when `None`).
    Put {
        document: Document,
        valid_time: DateTime<Utc>,
        end_valid_time: Option<DateTime<Utc>>,
    },
}

/// An ordered group of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    ops: Vec<TxOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    pub fn put(
        &mut self,
        document: Document,
        valid_time: DateTime<Utc>,
        end_valid_time: Option<DateTime<Utc>>,
    ) {
        self.ops.push(TxOp::Put {
            document,
            valid_time,
            end_valid_time,
        });
    }

    pub fn ops(&self) -> &[TxOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<TxOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Receipt for a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TxReceipt {
    pub tx_id: u64,
    pub tx_time: DateTime<Utc>,
}

/// One visible segment of an entity's valid-time history.
///
/// `valid_time` is where the segment starts; `tx_time` and `tx_id` identify
/// the version visible there, and `end_valid_time` is that version's own end.
/// Reading the entity as of (`valid_time`, `tx_time`) yields that version.
///
/// Coordinates are optional because not every backend reports all of them;
/// consumers must skip entries they cannot place on both time axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub valid_time: Option<DateTime<Utc>>,
    pub end_valid_time: Option<DateTime<Utc>>,
    pub tx_time: Option<DateTime<Utc>>,
    pub tx_id: Option<u64>,
}

/// A consistent, read-only view of the store at fixed bitemporal coordinates.
pub trait Snapshot {
    /// The entity as visible from this snapshot, if any.
    fn entity(&self, id: &DocumentId) -> MigrationResult<Option<Document>>;
}

/// Capabilities the migration engine consumes from the store.
pub trait BitemporalStore {
    type Snapshot<'a>: Snapshot
    where
        Self: 'a;

    /// Apply `tx` atomically, returning once it has been accepted.
    fn submit(&self, tx: Transaction) -> MigrationResult<TxReceipt>;

    /// Block until the transaction behind `receipt` is durable and visible.
    fn await_tx(&self, receipt: &TxReceipt) -> MigrationResult<()>;

    /// Identifiers whose current state satisfies `predicate`.
    fn query(&self, predicate: &Predicate) -> MigrationResult<Vec<DocumentId>>;

    /// Complete valid-time history of `id`, one entry per visible segment.
    fn entity_history(&self, id: &DocumentId, order: SortOrder)
    -> MigrationResult<Vec<HistoryEntry>>;

    /// Snapshot at the current valid time and latest transaction.
    fn snapshot(&self) -> MigrationResult<Self::Snapshot<'_>>;

    /// Snapshot at exactly (`valid_time`, `tx_time`).
    fn snapshot_as_of(
        &self,
        valid_time: DateTime<Utc>,
        tx_time: DateTime<Utc>,
    ) -> MigrationResult<Self::Snapshot<'_>>;

    /// Submit and wait for durability in one call.
    fn submit_and_await(&self, tx: Transaction) -> MigrationResult<TxReceipt> {
        let receipt = self.submit(tx)?;
        self.await_tx(&receipt)?;
        Ok(receipt)
    }
}
