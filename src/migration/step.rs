//! Upgrade steps: one variant per schema transition.
//!
//! Each [`UpgradeStep`] carries its version pair, the predicate that selects
//! the entities it rewrites, and the [`Transform`] applied to every
//! historical version of those entities. A [`StepRunner`] binds a step to a
//! store and a batch size and does the work.

use super::batch::BatchWriter;
use super::history::HistoryWalker;
use super::marker::{UNKNOWN_VERSION, VersionMarker};
use crate::document::{Document, NAMESPACE_SEPARATOR, Value};
use crate::error::MigrationResult;
use crate::query::Predicate;
use crate::traits::store::BitemporalStore;
use log::{debug, info};
use std::collections::BTreeMap;
use strum::{Display, EnumIter};

/// Legacy namespace of entity-proxy properties.
pub const LEGACY_PROPERTY_NAMESPACE: &str = "uniqueProperties";

/// Namespace entity-proxy properties live in from schema version 3 on.
pub const ENTITY_PROPERTY_NAMESPACE: &str = "entityProperties";

/// Flag marking entity-proxy documents.
pub const ENTITY_PROXY_FLAG: &str = "entityProxyOnly";

/// A content rewrite applied to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    /// Move every `from.*` key to `to.*`, keeping its value. When the target
    /// key already exists the value from `from` wins.
    RenameNamespace {
        from: &'static str,
        to: &'static str,
    },
}

impl Transform {
    pub fn apply(&self, document: &Document) -> Document {
        match *self {
            Transform::Identity => document.clone(),
            Transform::RenameNamespace { from, to } => {
                let mut renamed = BTreeMap::new();
                let mut moved: Vec<(String, Value)> = Vec::new();
                for (key, value) in document.content() {
                    match key
                        .strip_prefix(from)
                        .and_then(|rest| rest.strip_prefix(NAMESPACE_SEPARATOR))
                    {
                        Some(field) => {
                            moved.push((format!("{to}{NAMESPACE_SEPARATOR}{field}"), value.clone()))
                        }
                        None => {
                            renamed.insert(key.clone(), value.clone());
                        }
                    }
                }
                renamed.extend(moved);
                Document::from_content(document.id().clone(), renamed)
            }
        }
    }
}

/// The registered schema transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum UpgradeStep {
    /// Establishes the marker on a store that never had one.
    InitialToV2,
    /// Renames entity-proxy properties out of the legacy namespace.
    V2ToV3,
}

impl UpgradeStep {
    pub fn from_version(&self) -> i64 {
        match self {
            UpgradeStep::InitialToV2 => UNKNOWN_VERSION,
            UpgradeStep::V2ToV3 => 2,
        }
    }

    pub fn to_version(&self) -> i64 {
        match self {
            UpgradeStep::InitialToV2 => 2,
            UpgradeStep::V2ToV3 => 3,
        }
    }

    /// Entities this step rewrites. `None` means the step only moves the
    /// marker.
    pub fn predicate(&self) -> Option<Predicate> {
        match self {
            UpgradeStep::InitialToV2 => None,
            UpgradeStep::V2ToV3 => Some(Predicate::equals(ENTITY_PROXY_FLAG, true)),
        }
    }

    pub fn transform(&self) -> Transform {
        match self {
            UpgradeStep::InitialToV2 => Transform::Identity,
            UpgradeStep::V2ToV3 => Transform::RenameNamespace {
                from: LEGACY_PROPERTY_NAMESPACE,
                to: ENTITY_PROPERTY_NAMESPACE,
            },
        }
    }
}

/// What one step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub step: UpgradeStep,
    pub entities: usize,
    pub snapshots: usize,
    pub transactions: usize,
    pub documents: usize,
}

impl StepReport {
    fn empty(step: UpgradeStep) -> Self {
        Self {
            step,
            entities: 0,
            snapshots: 0,
            transactions: 0,
            documents: 0,
        }
    }
}

/// Runs one [`UpgradeStep`] against a store.
#[derive(Debug)]
pub struct StepRunner<'s, S: BitemporalStore> {
    step: UpgradeStep,
    store: &'s S,
    batch_size: usize,
}

impl<'s, S: BitemporalStore> StepRunner<'s, S> {
    pub fn new(step: UpgradeStep, store: &'s S, batch_size: usize) -> Self {
        Self {
            step,
            store,
            batch_size,
        }
    }

    pub fn step(&self) -> UpgradeStep {
        self.step
    }

    pub fn from_version(&self) -> i64 {
        self.step.from_version()
    }

    pub fn to_version(&self) -> i64 {
        self.step.to_version()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Rewrite every visible segment of every matching entity's history,
    /// putting each rewritten version back at the segment start with the
    /// version's own end valid time. Does not touch the marker.
    ///
    /// Running it again over already-migrated data writes identical content
    /// at identical valid times, which the store ignores.
    pub fn migrate_metadata(&self) -> MigrationResult<StepReport> {
        let mut report = StepReport::empty(self.step);
        let Some(predicate) = self.step.predicate() else {
            debug!("{}: no documents to rewrite", self.step);
            return Ok(report);
        };

        let transform = self.step.transform();
        let mut writer = BatchWriter::new(self.store, self.batch_size)?;
        let walk = HistoryWalker::new(self.store).walk(&predicate, |snapshot| {
            writer.add(
                transform.apply(&snapshot.document),
                snapshot.valid_time,
                snapshot.end_valid_time,
            )
        })?;
        let stats = writer.finish()?;

        report.entities = walk.entities;
        report.snapshots = walk.snapshots;
        report.transactions = stats.transactions;
        report.documents = stats.documents;
        Ok(report)
    }

    /// [`migrate_metadata`](Self::migrate_metadata), then advance the marker
    /// to [`to_version`](Self::to_version). On failure the marker is left
    /// where it was.
    pub fn migrate(&self) -> MigrationResult<StepReport> {
        info!(
            "Running {} ({} -> {}, batch size {})",
            self.step,
            self.from_version(),
            self.to_version(),
            self.batch_size
        );
        let report = self.migrate_metadata()?;
        VersionMarker::new(self.store).set(self.to_version())?;
        info!(
            "{} rewrote {} versions of {} entities in {} transactions",
            self.step, report.documents, report.entities, report.transactions
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::databases::memory_store::{MemorySnapshot, MemoryStore};
    use crate::document::DocumentId;
    use crate::error::MigrationError;
    use crate::query::SortOrder;
    use crate::traits::store::{HistoryEntry, Snapshot, Transaction, TxReceipt};
    use assert_matches::assert_matches;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use strum::IntoEnumIterator;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 5, d, 0, 0, 0).unwrap()
    }

    fn put(store: &MemoryStore, doc: Document, valid: DateTime<Utc>) {
        let mut tx = Transaction::new();
        tx.put(doc, valid, None);
        store.submit_and_await(tx).unwrap();
    }

    fn legacy_proxy(id: &str, name: &str) -> Document {
        Document::new(id)
            .with(ENTITY_PROXY_FLAG, true)
            .with("uniqueProperties.name", name)
            .with("entityProperties.type", "person")
    }

    fn current(store: &MemoryStore, id: &str) -> Document {
        store.snapshot().unwrap().entity(&id.into()).unwrap().unwrap()
    }

    #[test]
    fn test_rename_moves_only_legacy_namespace() {
        let doc = legacy_proxy("p", "Ada").with("uniquePropertiesX.keep", 1i64);
        let renamed = UpgradeStep::V2ToV3.transform().apply(&doc);

        assert_eq!(
            renamed,
            Document::new("p")
                .with(ENTITY_PROXY_FLAG, true)
                .with("entityProperties.name", "Ada")
                .with("entityProperties.type", "person")
                .with("uniquePropertiesX.keep", 1i64)
        );
    }

    #[test]
    fn test_rename_collision_keeps_legacy_value() {
        let doc = Document::new("p")
            .with("uniqueProperties.name", "legacy")
            .with("entityProperties.name", "newer");
        let renamed = UpgradeStep::V2ToV3.transform().apply(&doc);

        assert_eq!(renamed.get("entityProperties.name"), Some(&"legacy".into()));
        assert_eq!(renamed.content().len(), 1);
    }

    #[test]
    fn test_step_table() {
        let steps: Vec<_> = UpgradeStep::iter()
            .map(|s| (s.to_string(), s.from_version(), s.to_version()))
            .collect();
        assert_eq!(
            steps,
            vec![
                ("InitialToV2".to_string(), UNKNOWN_VERSION, 2),
                ("V2ToV3".to_string(), 2, 3),
            ]
        );
        assert_eq!(UpgradeStep::InitialToV2.predicate(), None);
        assert_eq!(UpgradeStep::InitialToV2.transform(), Transform::Identity);
    }

    #[test]
    fn test_v2_to_v3_rewrites_every_valid_time() {
        let store = MemoryStore::new();
        put(&store, legacy_proxy("p1", "first"), day(1));
        put(&store, legacy_proxy("p1", "second"), day(10));
        put(&store, legacy_proxy("p1", "third"), day(20));
        put(&store, Document::new("plain").with("uniqueProperties.name", "x"), day(1));

        let report = StepRunner::new(UpgradeStep::V2ToV3, &store, 500)
            .migrate()
            .unwrap();
        assert_eq!(report.entities, 1);
        assert_eq!(report.snapshots, 3);
        assert_eq!(report.transactions, 1);

        for (d, name) in [(1, "first"), (10, "second"), (20, "third")] {
            let doc = store
                .snapshot_as_of(day(d), Utc::now() + Duration::seconds(1))
                .unwrap()
                .entity(&"p1".into())
                .unwrap()
                .unwrap();
            assert_eq!(doc.get("entityProperties.name"), Some(&name.into()));
            assert!(!doc.contains_key("uniqueProperties.name"));
        }
        assert!(current(&store, "plain").contains_key("uniqueProperties.name"));
        assert_eq!(VersionMarker::new(&store).get().unwrap(), 3);
    }

    #[test]
    fn test_version_behind_bounded_correction_is_rewritten() {
        let store = MemoryStore::new();
        put(&store, legacy_proxy("p1", "open"), day(1));
        let mut tx = Transaction::new();
        tx.put(legacy_proxy("p1", "bounded"), day(1), Some(day(3)));
        store.submit_and_await(tx).unwrap();

        let runner = StepRunner::new(UpgradeStep::V2ToV3, &store, 10);
        let report = runner.migrate().unwrap();
        assert_eq!(report.snapshots, 2);
        assert_eq!(report.documents, 2);

        let later = Utc::now() + Duration::seconds(1);
        for (d, name) in [(1, "bounded"), (2, "bounded"), (3, "open"), (5, "open")] {
            let doc = store
                .snapshot_as_of(day(d), later)
                .unwrap()
                .entity(&"p1".into())
                .unwrap()
                .unwrap();
            assert_eq!(doc.get("entityProperties.name"), Some(&name.into()));
            assert!(!doc.contains_key("uniqueProperties.name"));
        }
        assert_eq!(
            current(&store, "p1").get("entityProperties.name"),
            Some(&"open".into())
        );

        let versions = store.timeline(&"p1".into()).unwrap().unwrap().len();
        runner.migrate_metadata().unwrap();
        assert_eq!(store.timeline(&"p1".into()).unwrap().unwrap().len(), versions);
    }

    #[test]
    fn test_metadata_migration_is_idempotent() {
        let store = MemoryStore::new();
        put(&store, legacy_proxy("p1", "a"), day(1));
        put(&store, legacy_proxy("p1", "b"), day(3));
        put(&store, legacy_proxy("p2", "c"), day(2));

        let runner = StepRunner::new(UpgradeStep::V2ToV3, &store, 2);
        runner.migrate_metadata().unwrap();
        let after_first: Vec<_> = ["p1", "p2"]
            .iter()
            .map(|id| store.timeline(&(*id).into()).unwrap().unwrap())
            .collect();

        let second = runner.migrate_metadata().unwrap();
        assert_eq!(second.snapshots, 3);
        let after_second: Vec<_> = ["p1", "p2"]
            .iter()
            .map(|id| store.timeline(&(*id).into()).unwrap().unwrap())
            .collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_document_without_legacy_keys_is_resubmitted_unchanged() {
        let store = MemoryStore::new();
        let doc = Document::new("p1")
            .with(ENTITY_PROXY_FLAG, true)
            .with("entityProperties.name", "done");
        put(&store, doc.clone(), day(1));

        let report = StepRunner::new(UpgradeStep::V2ToV3, &store, 10)
            .migrate_metadata()
            .unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(store.timeline(&"p1".into()).unwrap().unwrap().len(), 1);
        assert_eq!(current(&store, "p1"), doc);
    }

    #[test]
    fn test_initial_step_only_sets_marker() {
        let store = MemoryStore::new();
        put(&store, legacy_proxy("p1", "a"), day(1));

        let report = StepRunner::new(UpgradeStep::InitialToV2, &store, 10)
            .migrate()
            .unwrap();
        assert_eq!(report, StepReport::empty(UpgradeStep::InitialToV2));
        assert_eq!(store.transaction_sizes().unwrap(), vec![1, 1]);
        assert_eq!(VersionMarker::new(&store).get().unwrap(), 2);
        assert!(current(&store, "p1").contains_key("uniqueProperties.name"));
    }

    /// Accepts only single-document transactions.
    struct RejectsBatches(MemoryStore);

    impl BitemporalStore for RejectsBatches {
        type Snapshot<'a>
            = MemorySnapshot<'a>
        where
            Self: 'a;

        fn submit(&self, tx: Transaction) -> MigrationResult<TxReceipt> {
            if tx.len() > 1 {
                return Err(MigrationError::StoreUnavailable("disk full".into()));
            }
            self.0.submit(tx)
        }

        fn await_tx(&self, receipt: &TxReceipt) -> MigrationResult<()> {
            self.0.await_tx(receipt)
        }

        fn query(&self, predicate: &Predicate) -> MigrationResult<Vec<DocumentId>> {
            self.0.query(predicate)
        }

        fn entity_history(
            &self,
            id: &DocumentId,
            order: SortOrder,
        ) -> MigrationResult<Vec<HistoryEntry>> {
            self.0.entity_history(id, order)
        }

        fn snapshot(&self) -> MigrationResult<MemorySnapshot<'_>> {
            self.0.snapshot()
        }

        fn snapshot_as_of(
            &self,
            valid_time: DateTime<Utc>,
            tx_time: DateTime<Utc>,
        ) -> MigrationResult<MemorySnapshot<'_>> {
            self.0.snapshot_as_of(valid_time, tx_time)
        }
    }

    #[test]
    fn test_failed_step_leaves_marker_untouched() {
        let inner = MemoryStore::new();
        put(&inner, legacy_proxy("p1", "a"), day(1));
        put(&inner, legacy_proxy("p2", "b"), day(1));
        let store = RejectsBatches(inner);
        VersionMarker::new(&store).set(2).unwrap();

        assert_matches!(
            StepRunner::new(UpgradeStep::V2ToV3, &store, 5).migrate(),
            Err(MigrationError::StoreUnavailable(_))
        );
        assert_eq!(VersionMarker::new(&store).get().unwrap(), 2);
    }

    fn document_strategy() -> impl Strategy<Value = Document> {
        let key = prop_oneof![
            "[a-z]{1,4}".prop_map(|f| format!("uniqueProperties.{f}")),
            "[a-z]{1,4}".prop_map(|f| format!("entityProperties.{f}")),
            "[a-z]{1,6}",
        ];
        prop::collection::btree_map(key, any::<i64>().prop_map(Value::from), 0..12)
            .prop_map(|content| Document::from_content("prop", content))
    }

    proptest! {
        #[test]
        fn rename_is_idempotent(doc in document_strategy()) {
            let transform = UpgradeStep::V2ToV3.transform();
            let once = transform.apply(&doc);
            prop_assert_eq!(transform.apply(&once), once.clone());
            prop_assert_eq!(once.keys_in_namespace(LEGACY_PROPERTY_NAMESPACE).count(), 0);
        }

        #[test]
        fn rename_keeps_every_legacy_value(doc in document_strategy()) {
            let once = UpgradeStep::V2ToV3.transform().apply(&doc);
            for field in doc.keys_in_namespace(LEGACY_PROPERTY_NAMESPACE) {
                let target = field.replacen(LEGACY_PROPERTY_NAMESPACE, ENTITY_PROPERTY_NAMESPACE, 1);
                prop_assert_eq!(once.get(&target), doc.get(field));
            }
        }

        #[test]
        fn identity_changes_nothing(doc in document_strategy()) {
            prop_assert_eq!(Transform::Identity.apply(&doc), doc);
        }
    }
}
