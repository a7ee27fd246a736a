//! Schema migration for bitemporal stores.
//!
//! The pieces, bottom up:
//!
//! - [`marker::VersionMarker`] reads and advances the recorded schema version
//! - [`batch::BatchWriter`] groups writes into durable transactions
//! - [`history::HistoryWalker`] replays every historical version of matching
//!   entities
//! - [`step::StepRunner`] applies one [`step::UpgradeStep`]
//! - [`chain::UpgradeChain`] runs steps until the store is at the latest
//!   version

pub mod batch;
pub mod chain;
pub mod history;
pub mod marker;
pub mod step;

pub use batch::{BatchStats, BatchWriter};
pub use chain::{ChainReport, UpgradeChain};
pub use history::{HistoricalSnapshot, HistoryWalker, WalkStats};
pub use marker::{MARKER_FIELD, MARKER_ID, UNKNOWN_VERSION, VersionMarker};
pub use step::{StepReport, StepRunner, Transform, UpgradeStep};
