pub mod store;

pub use store::{BitemporalStore, HistoryEntry, Snapshot, Transaction, TxOp, TxReceipt};
