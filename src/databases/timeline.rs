//! Bitemporal resolution shared by the store backends.
//!
//! An [`EntityTimeline`] holds every version ever written for one entity.
//! Nothing is removed or edited: a correction is simply a newer transaction
//! at an existing valid time.
//!
//! As-of resolution at `(vt, tt)` considers versions recorded at or before
//! `tt` whose valid range contains `vt`, and picks the greatest valid start,
//! breaking ties by the greatest transaction id.

use crate::document::Document;
use crate::error::{MigrationError, MigrationResult};
use crate::query::SortOrder;
use crate::traits::store::HistoryEntry;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One stored version of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVersion {
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub tx_id: u64,
    pub tx_time: DateTime<Utc>,
    pub document: Document,
}

impl StoredVersion {
    fn covers(&self, valid_time: DateTime<Utc>) -> bool {
        self.valid_from <= valid_time && self.valid_to.is_none_or(|end| valid_time < end)
    }
}

/// All versions of a single entity, in write order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTimeline {
    versions: Vec<StoredVersion>,
}

impl EntityTimeline {
    pub fn versions(&self) -> &[StoredVersion] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Latest correction recorded at exactly `valid_from`.
    fn latest_at(&self, valid_from: DateTime<Utc>) -> Option<&StoredVersion> {
        self.versions
            .iter()
            .filter(|v| v.valid_from == valid_from)
            .max_by_key(|v| v.tx_id)
    }

    /// Record a new version. Returns `false` when the put is a no-op because
    /// identical content with the same valid range is already the latest
    /// version at `valid_from`.
    pub fn put(
        &mut self,
        document: Document,
        valid_from: DateTime<Utc>,
        valid_to: Option<DateTime<Utc>>,
        tx_id: u64,
        tx_time: DateTime<Utc>,
    ) -> bool {
        if let Some(existing) = self.latest_at(valid_from) {
            if existing.document == document && existing.valid_to == valid_to {
                return false;
            }
        }
        self.versions.push(StoredVersion {
            valid_from,
            valid_to,
            tx_id,
            tx_time,
            document,
        });
        true
    }

    /// The document visible at `valid_time` as recorded by `tx_time`
    /// (`None` means "latest transaction").
    pub fn as_of(
        &self,
        valid_time: DateTime<Utc>,
        tx_time: Option<DateTime<Utc>>,
    ) -> Option<&Document> {
        self.versions
            .iter()
            .filter(|v| tx_time.is_none_or(|tt| v.tx_time <= tt))
            .filter(|v| v.covers(valid_time))
            .max_by_key(|v| (v.valid_from, v.tx_id))
            .map(|v| &v.document)
    }

    /// The version visible at `valid_time` as of the latest transaction.
    fn resolve(&self, valid_time: DateTime<Utc>) -> Option<&StoredVersion> {
        self.versions
            .iter()
            .filter(|v| v.covers(valid_time))
            .max_by_key(|v| (v.valid_from, v.tx_id))
    }

    /// One entry per visible segment of the valid-time axis.
    ///
    /// Segments start at every valid start, and at every valid end where an
    /// earlier version becomes visible again. Each entry carries the
    /// coordinates of the version that resolves at its start; its end valid
    /// time is that version's own end. Adjacent boundaries resolving to the
    /// same version are merged, and gaps with nothing visible are omitted.
    pub fn history(&self, order: SortOrder) -> Vec<HistoryEntry> {
        let boundaries: BTreeSet<DateTime<Utc>> = self
            .versions
            .iter()
            .flat_map(|v| std::iter::once(v.valid_from).chain(v.valid_to))
            .collect();

        let mut entries = Vec::new();
        let mut previous: Option<&StoredVersion> = None;
        for point in boundaries {
            let current = self.resolve(point);
            let unchanged = matches!(
                (previous, current),
                (Some(a), Some(b)) if std::ptr::eq(a, b)
            );
            if let (Some(v), false) = (current, unchanged) {
                entries.push(HistoryEntry {
                    valid_time: Some(point),
                    end_valid_time: v.valid_to,
                    tx_time: Some(v.tx_time),
                    tx_id: Some(v.tx_id),
                });
            }
            previous = current;
        }

        if order == SortOrder::Descending {
            entries.reverse();
        }
        entries
    }

    pub fn to_bytes(&self) -> MigrationResult<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    pub fn from_bytes(bytes: &[u8]) -> MigrationResult<Self> {
        let (timeline, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(timeline)
    }
}

/// Transaction time for the next transaction: wall clock at microsecond
/// precision, forced strictly past `last`.
pub fn next_tx_time(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}

/// Rejects puts whose valid range is empty.
pub fn check_valid_range(
    valid_time: DateTime<Utc>,
    end_valid_time: Option<DateTime<Utc>>,
) -> MigrationResult<()> {
    match end_valid_time {
        Some(end) if end <= valid_time => Err(MigrationError::InvalidTransaction(format!(
            "end valid time {end} is not after valid time {valid_time}"
        ))),
        _ => Ok(()),
    }
}
