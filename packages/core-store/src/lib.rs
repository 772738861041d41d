//! Core devstore types: the path algebra, the value tree and schema metadata.
//!
//! Every other devstore layer is expressed in terms of these:
//! - `Path`: absolute, schema-addressed location with optional list-entry keys
//! - `Keys`: the ordered `key=value` identity of one list entry
//! - `Value`: a dynamically-typed tree (maps, arrays, scalars)
//! - `SchemaIndex`: injected, read-only structural metadata
//! - `Error`: the error type shared by the datastore and reader layers
//!
//! # Example
//!
//! ```rust
//! use devstore_core::{path, Keys, Path};
//!
//! let list = path!("/interfaces/interface");
//! let entry = list.add_keys(&Keys::new().with("name", "eth0")).unwrap();
//! assert_eq!(entry.to_string(), "/interfaces/interface[name='eth0']");
//! assert!(entry.is_child_of(&path!("/interfaces")));
//! assert_eq!(entry.parent().unwrap(), path!("/interfaces"));
//! ```

mod error;
mod keys;
mod path;
mod schema;
mod value;

pub use error::{Error, Result};
pub use keys::Keys;
pub use path::{Path, PathError, Segment};
pub use schema::{SchemaIndex, StaticSchema, ValidationMode};
pub use value::Value;
