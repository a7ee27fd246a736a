//! Drives a store from whatever version its marker records up to
//! [`LATEST_VERSION`], one registered step at a time.

use super::marker::{UNKNOWN_VERSION, VersionMarker};
use super::step::{StepReport, StepRunner, UpgradeStep};
use crate::LATEST_VERSION;
use crate::error::{MigrationError, MigrationResult};
use crate::traits::store::BitemporalStore;
use log::info;
use std::collections::{BTreeMap, BTreeSet};
use strum::IntoEnumIterator;

/// Outcome of a full chain run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub starting_version: i64,
    pub final_version: i64,
    pub steps: Vec<StepReport>,
}

impl ChainReport {
    pub fn migrated(&self) -> bool {
        !self.steps.is_empty()
    }
}

/// Step table keyed by `from_version`, validated to form a single path from
/// [`UNKNOWN_VERSION`] to [`LATEST_VERSION`].
#[derive(Debug, Clone)]
pub struct UpgradeChain {
    steps: BTreeMap<i64, UpgradeStep>,
}

impl UpgradeChain {
    /// The chain made of every [`UpgradeStep`] variant.
    pub fn standard() -> MigrationResult<Self> {
        Self::new(UpgradeStep::iter())
    }

    pub fn new<I>(steps: I) -> MigrationResult<Self>
    where
        I: IntoIterator<Item = UpgradeStep>,
    {
        let mut table = BTreeMap::new();
        for step in steps {
            if step.to_version() <= step.from_version() {
                return Err(MigrationError::InvalidChain(format!(
                    "{step} goes from {} to {}",
                    step.from_version(),
                    step.to_version()
                )));
            }
            if let Some(existing) = table.insert(step.from_version(), step) {
                return Err(MigrationError::InvalidChain(format!(
                    "{existing} and {step} both start at version {}",
                    step.from_version()
                )));
            }
        }

        let mut on_path = BTreeSet::new();
        let mut version = UNKNOWN_VERSION;
        while version != LATEST_VERSION {
            let step = table.get(&version).ok_or_else(|| {
                MigrationError::InvalidChain(format!(
                    "no step from version {version} towards {LATEST_VERSION}"
                ))
            })?;
            on_path.insert(version);
            version = step.to_version();
            if version > LATEST_VERSION {
                return Err(MigrationError::InvalidChain(format!(
                    "{step} overshoots latest version {LATEST_VERSION}"
                )));
            }
        }

        if let Some((_, orphan)) = table.iter().find(|(from, _)| !on_path.contains(*from)) {
            return Err(MigrationError::InvalidChain(format!(
                "{orphan} is not reachable from version {UNKNOWN_VERSION}"
            )));
        }

        Ok(Self { steps: table })
    }

    pub fn step_for(&self, version: i64) -> Option<UpgradeStep> {
        self.steps.get(&version).copied()
    }

    pub fn steps(&self) -> impl Iterator<Item = UpgradeStep> + '_ {
        self.steps.values().copied()
    }

    /// Steps that would run for a store at `current`, in order.
    pub fn plan(&self, current: i64) -> MigrationResult<Vec<UpgradeStep>> {
        let mut plan = Vec::new();
        let mut version = current;
        while version != LATEST_VERSION {
            let step = self
                .step_for(version)
                .ok_or(MigrationError::UnregisteredVersion { version })?;
            plan.push(step);
            version = step.to_version();
        }
        Ok(plan)
    }

    /// Migrate `store` to [`LATEST_VERSION`], re-reading the marker after
    /// every step.
    pub fn run<S: BitemporalStore>(
        &self,
        store: &S,
        batch_size: usize,
    ) -> MigrationResult<ChainReport> {
        let marker = VersionMarker::new(store);
        let starting_version = marker.get()?;
        let mut current = starting_version;
        let mut reports = Vec::new();

        if current == LATEST_VERSION {
            info!("Store is at schema version {current}; no migration needed");
        }
        while current != LATEST_VERSION {
            let step = self
                .step_for(current)
                .ok_or(MigrationError::UnregisteredVersion { version: current })?;
            reports.push(StepRunner::new(step, store, batch_size).migrate()?);

            let after = marker.get()?;
            if after != step.to_version() {
                return Err(MigrationError::CorruptMarker(format!(
                    "marker reads {after} after {step}, expected {}",
                    step.to_version()
                )));
            }
            current = after;
        }

        if !reports.is_empty() {
            info!("Migrated store from schema version {starting_version} to {current}");
        }
        Ok(ChainReport {
            starting_version,
            final_version: current,
            steps: reports,
        })
    }
}
