//! Buffered, durability-bounded writes.
//!
//! The [`BatchWriter`] collects transformed documents and submits them as one
//! transaction per `batch_size` documents, waiting for each transaction to be
//! durable before accepting more. At most one batch is ever in flight.

use crate::document::Document;
use crate::error::{MigrationError, MigrationResult};
use crate::traits::store::{BitemporalStore, Transaction};
use chrono::{DateTime, Utc};
use log::debug;

/// A write waiting in the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPut {
    pub document: Document,
    pub valid_time: DateTime<Utc>,
    pub end_valid_time: Option<DateTime<Utc>>,
}

/// Totals for everything a writer has flushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub transactions: usize,
    pub documents: usize,
}

#[derive(Debug)]
pub struct BatchWriter<'s, S: BitemporalStore> {
    store: &'s S,
    batch_size: usize,
    buffer: Vec<PendingPut>,
    stats: BatchStats,
}

impl<'s, S: BitemporalStore> BatchWriter<'s, S> {
    pub fn new(store: &'s S, batch_size: usize) -> MigrationResult<Self> {
        if batch_size == 0 {
            return Err(MigrationError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            stats: BatchStats::default(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a write at its original valid time, flushing once the buffer
    /// is full.
    pub fn add(
        &mut self,
        document: Document,
        valid_time: DateTime<Utc>,
        end_valid_time: Option<DateTime<Utc>>,
    ) -> MigrationResult<()> {
        self.buffer.push(PendingPut {
            document,
            valid_time,
            end_valid_time,
        });
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Submit everything buffered as one transaction and wait for it.
    pub fn flush(&mut self) -> MigrationResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut tx = Transaction::with_capacity(self.buffer.len());
        for put in self.buffer.drain(..) {
            tx.put(put.document, put.valid_time, put.end_valid_time);
        }
        let documents = tx.len();
        let receipt = self.store.submit_and_await(tx)?;

        self.stats.transactions += 1;
        self.stats.documents += documents;
        debug!(
            "Flushed batch of {documents} documents as transaction {} ({} batches so far)",
            receipt.tx_id, self.stats.transactions
        );
        Ok(())
    }

    /// Flush the remainder. Must be called once the caller is done adding.
    pub fn finish(mut self) -> MigrationResult<BatchStats> {
        self.flush()?;
        Ok(self.stats)
    }
}
