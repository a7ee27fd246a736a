//! Store backends.
//!
//! Both backends share the bitemporal resolution rules in [`timeline`].

pub mod memory_store;
pub mod redb_store;
pub mod timeline;

pub use memory_store::MemoryStore;
pub use redb_store::RedbStore;
