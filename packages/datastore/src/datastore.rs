//! The single-writer datastore handle.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use devstore_core::{Error, Path, Result, SchemaIndex, ValidationMode, Value};

use crate::state::DatastoreState;
use crate::transaction::DatastoreTransaction;
use crate::tree;

/// Which tree a datastore holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreKind {
    /// Intended configuration, validated in full.
    Config,
    /// State reported by the device, validated with relaxed rules.
    Operational,
}

impl DatastoreKind {
    pub fn validation_mode(self) -> ValidationMode {
        match self {
            DatastoreKind::Config => ValidationMode::Config,
            DatastoreKind::Operational => ValidationMode::Operational,
        }
    }
}

impl fmt::Display for DatastoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatastoreKind::Config => write!(f, "config"),
            DatastoreKind::Operational => write!(f, "operational"),
        }
    }
}

/// A schema-addressed store with at most one open transaction.
///
/// Cloning shares the same underlying state.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use devstore_core::{path, StaticSchema, Value};
/// use devstore_datastore::{Datastore, DatastoreKind};
///
/// let schema = StaticSchema::new().leaf(path!("/system/hostname"));
/// let ds = Datastore::new(DatastoreKind::Config, Arc::new(schema));
///
/// let mut tx = ds.new_tx().unwrap();
/// tx.merge(&path!("/system/hostname"), Value::from("r1")).unwrap();
/// assert!(ds.new_tx().is_err());
/// tx.commit().unwrap();
///
/// assert_eq!(ds.read_committed(&path!("/system/hostname")).unwrap(), Value::from("r1"));
/// ```
#[derive(Clone)]
pub struct Datastore {
    state: Arc<DatastoreState>,
    schema: Arc<dyn SchemaIndex>,
}

impl Datastore {
    pub fn new(kind: DatastoreKind, schema: Arc<dyn SchemaIndex>) -> Self {
        Self {
            state: Arc::new(DatastoreState::new(kind)),
            schema,
        }
    }

    pub fn kind(&self) -> DatastoreKind {
        self.state.kind()
    }

    /// Open a transaction. Fails immediately if one is already open.
    pub fn new_tx(&self) -> Result<DatastoreTransaction> {
        if !self.state.try_begin() {
            tracing::warn!(kind = %self.kind(), "transaction already underway");
            return Err(Error::TransactionConflict);
        }
        Ok(DatastoreTransaction::new(
            Arc::clone(&self.state),
            Arc::clone(&self.schema),
        ))
    }

    pub fn is_transaction_underway(&self) -> bool {
        self.state.is_transaction_underway()
    }

    /// Read from the committed forest, outside any transaction.
    pub fn read_committed(&self, path: &Path) -> Result<Value> {
        tree::read(self.schema.as_ref(), &self.state.committed(), path)
    }

    pub fn state(&self) -> &DatastoreState {
        &self.state
    }
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
