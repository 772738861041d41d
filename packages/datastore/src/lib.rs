//! Transactional datastore for schema-addressed configuration trees.
//!
//! A [`Datastore`] holds one committed forest (one tree per module) and
//! hands out at most one [`DatastoreTransaction`] at a time. A transaction
//! mutates its own working forest through merge, overwrite and delete,
//! validates it against the injected [`SchemaIndex`](devstore_core::SchemaIndex)
//! and commits it atomically. Before committing, [`DatastoreTransaction::diff`]
//! reports structural changes and [`DatastoreTransaction::diff_for`] routes
//! them to subscriber paths.

mod datastore;
mod diff;
mod router;
mod state;
mod transaction;
mod tree;

pub use datastore::{Datastore, DatastoreKind};
pub use diff::{DiffMap, DiffRecord, DiffType};
pub use router::DiffResult;
pub use state::{DatastoreState, Forest};
pub use transaction::{DatastoreTransaction, TransactionState};
