//! devstore: heterogeneous device state normalized into one schema-addressed tree.
//!
//! The layers, bottom-up:
//! - [`devstore_core`]: the path algebra, the value tree and schema metadata
//! - [`devstore_datastore`]: isolated transactions, structural diff and
//!   subscriber routing
//! - [`devstore_reader`]: composite asynchronous device readers
//!
//! A typical device sync reads the device through a [`ReaderRegistry`],
//! merges the result at the root of a [`DatastoreTransaction`], routes
//! [`DatastoreTransaction::diff_for`] to the interested subscribers and
//! commits.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use devstore::{path, Datastore, DatastoreKind, DiffType, StaticSchema, Value};
//!
//! let schema = Arc::new(
//!     StaticSchema::new()
//!         .list(path!("/interfaces/interface"), &["name"])
//!         .leaf(path!("/interfaces/interface/name"))
//!         .leaf(path!("/interfaces/interface/config/mtu")),
//! );
//! let datastore = Datastore::new(DatastoreKind::Config, schema);
//!
//! let mut tx = datastore.new_tx().unwrap();
//! tx.merge(
//!     &path!("/interfaces/interface[name='eth0']/config"),
//!     Value::from(serde_json::json!({"mtu": 1500})),
//! )
//! .unwrap();
//! let diffs = tx.diff().unwrap();
//! assert_eq!(diffs.len(), 1);
//! assert_eq!(diffs.values().next().unwrap().diff_type, DiffType::Create);
//! tx.commit().unwrap();
//! ```

pub use devstore_core;
pub use devstore_datastore;
pub use devstore_reader;

pub use devstore_core::{
    path, Error, Keys, Path, PathError, Result, SchemaIndex, Segment, StaticSchema,
    ValidationMode, Value,
};
pub use devstore_datastore::{
    Datastore, DatastoreKind, DatastoreTransaction, DiffMap, DiffRecord, DiffResult, DiffType,
    TransactionState,
};
pub use devstore_reader::{
    from_fn, list_from_fn, CompositeReader, ListReader, NodeReader, Reader, ReaderConfig,
    ReaderRegistry, ReaderRegistryBuilder,
};
