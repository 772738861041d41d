//! Composite device readers.
//!
//! Device-specific readers are registered per schema path with a
//! [`ReaderRegistryBuilder`]. The built [`ReaderRegistry`] reads any path by
//! delegating to the readers at and below it concurrently, and assembles
//! their results into one root document that can be merged straight into a
//! datastore transaction.

mod composite;
mod config;
mod registry;
mod traits;

pub use composite::{CompositeReader, NodeReader};
pub use config::ReaderConfig;
pub use registry::{ReaderRegistry, ReaderRegistryBuilder};
pub use traits::{from_fn, list_from_fn, FnListReader, FnReader, ListReader, ReadFuture, Reader};
