// Common test utilities and helpers

#![allow(dead_code)]

use bitemporal_migrate::config::{MigrationSettings, MigratorConfig, StoreConfig};
use bitemporal_migrate::document::Document;
use bitemporal_migrate::migration::step::{ENTITY_PROXY_FLAG, LEGACY_PROPERTY_NAMESPACE};
use bitemporal_migrate::traits::{BitemporalStore, Transaction, TxReceipt};
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, d, 9, 0, 0).unwrap()
}

/// An entity proxy still using the legacy property namespace.
pub fn legacy_proxy(id: &str, name: &str) -> Document {
    Document::new(id)
        .with(ENTITY_PROXY_FLAG, true)
        .with(format!("{LEGACY_PROPERTY_NAMESPACE}.name"), name)
        .with("entityProperties.type", "person")
}

/// Submit all `(document, valid time)` pairs as one transaction.
pub fn seed<S: BitemporalStore>(store: &S, docs: Vec<(Document, DateTime<Utc>)>) -> TxReceipt {
    let mut tx = Transaction::with_capacity(docs.len());
    for (doc, valid) in docs {
        tx.put(doc, valid, None);
    }
    store.submit_and_await(tx).unwrap()
}

/// A temporary directory holding a store path and a config file for it.
pub struct TestWorkspace {
    pub dir: TempDir,
    pub store_path: PathBuf,
    pub config_path: PathBuf,
}

impl TestWorkspace {
    pub fn new(batch_size: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("repository.redb");
        let config_path = dir.path().join("migrate.toml");
        write_config(&config_path, &store_path, batch_size);
        Self {
            dir,
            store_path,
            config_path,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.store_path)
    }
}

pub fn write_config(config_path: &Path, store_path: &Path, batch_size: usize) {
    let config = MigratorConfig::builder()
        .store(StoreConfig::new(store_path))
        .migration(MigrationSettings { batch_size })
        .build();
    std::fs::write(config_path, toml::to_string(&config).unwrap()).unwrap();
}
