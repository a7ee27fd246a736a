//! File-backed bitemporal store on redb.
//!
//! Two tables:
//!
//! - `timelines`: entity id → bincode-encoded [`EntityTimeline`]
//! - `tx_log`: transaction id → transaction time (microseconds since epoch)
//!
//! Each `submit` is a single redb write transaction. redb commits with
//! immediate durability by default, so a returned receipt is already on disk;
//! `await_tx` re-reads the committed log to confirm it.
//!
//! [`RedbStore::open_read_only`] opens an existing file without creating
//! tables or taking the write lock; such a store refuses `submit`, and reads
//! treat missing tables as empty.

use super::timeline::{EntityTimeline, check_valid_range, next_tx_time};
use crate::config::StoreConfig;
use crate::document::{Document, DocumentId};
use crate::error::{MigrationError, MigrationResult};
use crate::query::{Predicate, SortOrder};
use crate::traits::store::{BitemporalStore, HistoryEntry, Snapshot, Transaction, TxOp, TxReceipt};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use redb::{
    Database, ReadOnlyDatabase, ReadTransaction, ReadableDatabase, ReadableTable,
    ReadableTableMetadata, TableDefinition, TableError, WriteTransaction,
};
use std::path::{Path, PathBuf};

const TIMELINES: TableDefinition<&str, &[u8]> = TableDefinition::new("timelines");
const TX_LOG: TableDefinition<u64, i64> = TableDefinition::new("tx_log");

fn micros_to_time(micros: i64) -> MigrationResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        MigrationError::StoreUnavailable(format!("transaction time {micros} out of range"))
    })
}

enum Handle {
    ReadWrite(Database),
    ReadOnly(ReadOnlyDatabase),
}

impl Handle {
    fn begin_read(&self) -> MigrationResult<ReadTransaction> {
        Ok(match self {
            Handle::ReadWrite(db) => db.begin_read()?,
            Handle::ReadOnly(db) => db.begin_read()?,
        })
    }

    fn begin_write(&self) -> MigrationResult<WriteTransaction> {
        match self {
            Handle::ReadWrite(db) => Ok(db.begin_write()?),
            Handle::ReadOnly(_) => Err(MigrationError::StoreUnavailable(
                "store was opened read-only".to_string(),
            )),
        }
    }
}

/// Opens `$table`, returning `Ok($empty)` from the caller when a store
/// opened read-only has never created it.
macro_rules! open_or_empty {
    ($txn:expr, $table:expr, $empty:expr) => {
        match $txn.open_table($table) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok($empty),
            Err(e) => return Err(e.into()),
        }
    };
}

pub struct RedbStore {
    db: Handle,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .field("read_only", &matches!(self.db, Handle::ReadOnly(_)))
            .finish()
    }
}

impl RedbStore {
    /// Open the store described by `config`.
    ///
    /// A missing store file is a configuration error unless
    /// `create_if_missing` is set.
    pub fn open(config: &StoreConfig) -> MigrationResult<Self> {
        if !config.create_if_missing && !config.path.exists() {
            return Err(MigrationError::Configuration(format!(
                "store {} does not exist",
                config.path.display()
            )));
        }
        Self::create(&config.path)
    }

    /// Create or open a store file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> MigrationResult<Self> {
        let path = path.as_ref();
        let start = std::time::Instant::now();
        debug!("RedbStore: Opening database at {}", path.display());
        let db = Database::create(path)?;
        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(TIMELINES)?;
            write_txn.open_table(TX_LOG)?;
            write_txn.commit()?;
        }
        debug!("RedbStore: Opened in {:?}", start.elapsed());
        Ok(Self {
            db: Handle::ReadWrite(db),
            path: path.to_path_buf(),
        })
    }

    /// Open an existing store without writing to it.
    pub fn open_read_only(config: &StoreConfig) -> MigrationResult<Self> {
        if !config.path.exists() {
            return Err(MigrationError::Configuration(format!(
                "store {} does not exist",
                config.path.display()
            )));
        }
        debug!(
            "RedbStore: Opening database at {} read-only",
            config.path.display()
        );
        let db = ReadOnlyDatabase::open(&config.path)?;
        Ok(Self {
            db: Handle::ReadOnly(db),
            path: config.path.clone(),
        })
    }

    /// Open the store, run `f`, and close the store again on every path.
    pub fn with_store<F, R>(config: &StoreConfig, f: F) -> MigrationResult<R>
    where
        F: FnOnce(&RedbStore) -> MigrationResult<R>,
    {
        let store = Self::open(config)?;
        let result = f(&store);
        store.close();
        result
    }

    /// Like [`with_store`](Self::with_store), over a read-only handle.
    pub fn with_read_only<F, R>(config: &StoreConfig, f: F) -> MigrationResult<R>
    where
        F: FnOnce(&RedbStore) -> MigrationResult<R>,
    {
        let store = Self::open_read_only(config)?;
        let result = f(&store);
        store.close();
        result
    }

    pub fn close(self) {
        debug!("RedbStore: Closing database at {}", self.path.display());
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every version stored for `id`.
    pub fn timeline(&self, id: &DocumentId) -> MigrationResult<Option<EntityTimeline>> {
        let read_txn = self.db.begin_read()?;
        let table = open_or_empty!(read_txn, TIMELINES, None);
        let timeline = match table.get(id.as_str())? {
            Some(guard) => Some(EntityTimeline::from_bytes(guard.value())?),
            None => None,
        };
        Ok(timeline)
    }

    /// Number of committed transactions.
    pub fn transaction_count(&self) -> MigrationResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = open_or_empty!(read_txn, TX_LOG, 0);
        Ok(table.len()?)
    }
}

impl BitemporalStore for RedbStore {
    type Snapshot<'a>
        = RedbSnapshot
    where
        Self: 'a;

    fn submit(&self, tx: Transaction) -> MigrationResult<TxReceipt> {
        for op in tx.ops() {
            let TxOp::Put {
                valid_time,
                end_valid_time,
                ..
            } = op;
            check_valid_range(*valid_time, *end_valid_time)?;
        }

        let start = std::time::Instant::now();
        let ops = tx.len();
        let write_txn = self.db.begin_write()?;
        let receipt = {
            let mut log = write_txn.open_table(TX_LOG)?;
            let last = log.last()?.map(|(id, micros)| (id.value(), micros.value()));
            let last_time = last.map(|(_, micros)| micros_to_time(micros)).transpose()?;
            let receipt = TxReceipt {
                tx_id: last.map_or(1, |(id, _)| id + 1),
                tx_time: next_tx_time(last_time),
            };
            log.insert(receipt.tx_id, receipt.tx_time.timestamp_micros())?;

            let mut timelines = write_txn.open_table(TIMELINES)?;
            for op in tx.into_ops() {
                let TxOp::Put {
                    document,
                    valid_time,
                    end_valid_time,
                } = op;
                let id = document.id().clone();
                let mut timeline = match timelines.get(id.as_str())? {
                    Some(guard) => EntityTimeline::from_bytes(guard.value())?,
                    None => EntityTimeline::default(),
                };
                if timeline.put(
                    document,
                    valid_time,
                    end_valid_time,
                    receipt.tx_id,
                    receipt.tx_time,
                ) {
                    let bytes = timeline.to_bytes()?;
                    timelines.insert(id.as_str(), bytes.as_slice())?;
                } else {
                    trace!("RedbStore: put of {id} at {valid_time} is a no-op");
                }
            }
            receipt
        };
        write_txn.commit()?;
        debug!(
            "RedbStore: Committed transaction {} ({} ops) in {:?}",
            receipt.tx_id,
            ops,
            start.elapsed()
        );
        Ok(receipt)
    }

    fn await_tx(&self, receipt: &TxReceipt) -> MigrationResult<()> {
        let read_txn = self.db.begin_read()?;
        let log = read_txn.open_table(TX_LOG)?;
        let committed = log.get(receipt.tx_id)?.map(|micros| micros.value());
        if committed == Some(receipt.tx_time.timestamp_micros()) {
            Ok(())
        } else {
            Err(MigrationError::StoreUnavailable(format!(
                "transaction {} is not in the committed log",
                receipt.tx_id
            )))
        }
    }

    fn query(&self, predicate: &Predicate) -> MigrationResult<Vec<DocumentId>> {
        let now = Utc::now();
        let read_txn = self.db.begin_read()?;
        let table = open_or_empty!(read_txn, TIMELINES, Vec::new());
        let mut matches = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let timeline = EntityTimeline::from_bytes(value.value())?;
            if timeline
                .as_of(now, None)
                .is_some_and(|doc| predicate.matches(doc))
            {
                matches.push(DocumentId::new(key.value()));
            }
        }
        Ok(matches)
    }

    fn entity_history(
        &self,
        id: &DocumentId,
        order: SortOrder,
    ) -> MigrationResult<Vec<HistoryEntry>> {
        Ok(self
            .timeline(id)?
            .map(|timeline| timeline.history(order))
            .unwrap_or_default())
    }

    fn snapshot(&self) -> MigrationResult<RedbSnapshot> {
        Ok(RedbSnapshot {
            txn: self.db.begin_read()?,
            valid_time: Utc::now(),
            tx_time: None,
        })
    }

    fn snapshot_as_of(
        &self,
        valid_time: DateTime<Utc>,
        tx_time: DateTime<Utc>,
    ) -> MigrationResult<RedbSnapshot> {
        Ok(RedbSnapshot {
            txn: self.db.begin_read()?,
            valid_time,
            tx_time: Some(tx_time),
        })
    }
}

/// Read view over a [`RedbStore`], pinned to one redb read transaction.
pub struct RedbSnapshot {
    txn: ReadTransaction,
    valid_time: DateTime<Utc>,
    tx_time: Option<DateTime<Utc>>,
}

impl Snapshot for RedbSnapshot {
    fn entity(&self, id: &DocumentId) -> MigrationResult<Option<Document>> {
        let table = open_or_empty!(self.txn, TIMELINES, None);
        let Some(guard) = table.get(id.as_str())? else {
            return Ok(None);
        };
        let timeline = EntityTimeline::from_bytes(guard.value())?;
        Ok(timeline.as_of(self.valid_time, self.tx_time).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 3, d, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_open_missing_without_create_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("absent.redb"));
        assert_matches!(RedbStore::open(&config), Err(MigrationError::Configuration(_)));
        assert!(!config.path.exists());
    }

    #[test]
    fn test_submit_await_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::create(dir.path().join("s.redb")).unwrap();

        let mut tx = Transaction::new();
        tx.put(Document::new("a").with("ns.v", 1i64), day(1), None);
        tx.put(Document::new("b").with("ns.v", 2i64), day(2), None);
        let receipt = store.submit_and_await(tx).unwrap();

        assert_eq!(receipt.tx_id, 1);
        assert_eq!(store.transaction_count().unwrap(), 1);
        let snapshot = store.snapshot_as_of(day(3), receipt.tx_time).unwrap();
        assert_eq!(
            snapshot.entity(&"b".into()).unwrap(),
            Some(Document::new("b").with("ns.v", 2i64))
        );
        assert_eq!(snapshot.entity(&"c".into()).unwrap(), None);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.redb");
        {
            let store = RedbStore::create(&path).unwrap();
            let mut tx = Transaction::new();
            tx.put(Document::new("a").with("flag", true), day(1), None);
            store.submit_and_await(tx).unwrap();
            store.close();
        }

        let store = RedbStore::open(&StoreConfig::new(&path)).unwrap();
        assert_eq!(
            store.query(&Predicate::equals("flag", true)).unwrap(),
            vec![DocumentId::from("a")]
        );
        let mut tx = Transaction::new();
        tx.put(Document::new("a").with("flag", false), day(2), None);
        assert_eq!(store.submit_and_await(tx).unwrap().tx_id, 2);
    }

    #[test]
    fn test_history_and_noop_put() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::create(dir.path().join("h.redb")).unwrap();
        for (d, v) in [(1, 1i64), (4, 2), (1, 1)] {
            let mut tx = Transaction::new();
            tx.put(Document::new("a").with("ns.v", v), day(d), None);
            store.submit_and_await(tx).unwrap();
        }

        let history = store
            .entity_history(&"a".into(), SortOrder::Descending)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].valid_time, Some(day(4)));
        assert_eq!(store.timeline(&"a".into()).unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_read_only_store_reads_but_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.redb");
        {
            let store = RedbStore::create(&path).unwrap();
            let mut tx = Transaction::new();
            tx.put(Document::new("a").with("ns.v", 1i64), day(1), None);
            store.submit_and_await(tx).unwrap();
            store.close();
        }
        let before = std::fs::read(&path).unwrap();

        let store = RedbStore::open_read_only(&StoreConfig::new(&path)).unwrap();
        assert_eq!(store.transaction_count().unwrap(), 1);
        assert_eq!(store.query(&Predicate::Any).unwrap(), vec![DocumentId::from("a")]);
        let mut tx = Transaction::new();
        tx.put(Document::new("b"), day(2), None);
        assert_matches!(store.submit(tx), Err(MigrationError::StoreUnavailable(_)));
        store.close();

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_debug_names_path_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbg.redb");
        RedbStore::create(&path).unwrap().close();

        let store = RedbStore::open_read_only(&StoreConfig::new(&path)).unwrap();
        let shown = format!("{store:?}");
        assert!(shown.contains("dbg.redb"));
        assert!(shown.contains("read_only: true"));
    }

    #[test]
    fn test_read_only_store_without_tables_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.redb");
        drop(Database::create(&path).unwrap());

        let store = RedbStore::open_read_only(&StoreConfig::new(&path)).unwrap();
        assert_eq!(store.transaction_count().unwrap(), 0);
        assert_eq!(store.timeline(&"a".into()).unwrap(), None);
        assert!(store.query(&Predicate::Any).unwrap().is_empty());
        assert!(
            store
                .entity_history(&"a".into(), SortOrder::Ascending)
                .unwrap()
                .is_empty()
        );
        assert_eq!(store.snapshot().unwrap().entity(&"a".into()).unwrap(), None);
    }

    #[test]
    fn test_read_only_open_of_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("absent.redb"));
        assert_matches!(
            RedbStore::open_read_only(&config),
            Err(MigrationError::Configuration(_))
        );
        assert!(!config.path.exists());
    }

    #[test]
    fn test_await_rejects_foreign_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::create(dir.path().join("w.redb")).unwrap();
        let foreign = TxReceipt {
            tx_id: 1,
            tx_time: day(1),
        };
        assert_matches!(store.await_tx(&foreign), Err(MigrationError::StoreUnavailable(_)));
    }
}
