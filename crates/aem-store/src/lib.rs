//! Configuration store, attribution cache reconciliation, and snapshot
//! persistence for the AEM reporter.
//!
//! - [`ConfigStore`]: mode → ordered, deduplicated configuration lists.
//! - [`clear_cache`]: expires invocations and trims configurations no live
//!   invocation needs.
//! - [`SnapshotFile`]: versioned JSON snapshots written by atomic replace.
//! - [`validate_store`]: batch check of the store's ordering invariants.

pub mod error;
pub mod invariants;
pub mod persistence;
pub mod reconcile;
pub mod store;

pub use error::{StoreError, StoreViolation};
pub use invariants::validate_store;
pub use persistence::{SNAPSHOT_VERSION, SnapshotFile};
pub use reconcile::{ClearReport, clear_cache};
pub use store::{AddReport, ConfigStore};
