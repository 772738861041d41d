//! Device reader contracts.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use devstore_core::{Keys, Path, Result, Value};

/// Boxed future returned by composite reads.
pub type ReadFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'static>>;

/// Reads the content of the node at one registered schema path.
///
/// # Object Safety
///
/// This trait is object-safe: readers are stored as `Arc<dyn Reader>`.
///
/// # Example
///
/// ```rust,ignore
/// struct Hostname;
///
/// #[async_trait]
/// impl Reader for Hostname {
///     async fn read(&self, _path: &Path) -> Result<Value> {
///         Ok(Value::from(serde_json::json!({"hostname": "r1"})))
///     }
/// }
/// ```
#[async_trait]
pub trait Reader: Send + Sync {
    /// Read the content of the node at `path`.
    ///
    /// `path` carries the keys of every list entry above the node.
    async fn read(&self, path: &Path) -> Result<Value>;
}

/// Reads a list: first the identities of its entries, then each entry.
#[async_trait]
pub trait ListReader: Send + Sync {
    /// Keys of every entry of the list at `path`.
    async fn read_keys(&self, path: &Path) -> Result<Vec<Keys>>;

    /// Content of the entry at the keyed `path`.
    ///
    /// Defaults to just the entry's keys, for lists whose entries are
    /// populated entirely by child readers.
    async fn read(&self, path: &Path) -> Result<Value> {
        Ok(path.keys()?.to_value())
    }
}

/// A [`Reader`] backed by an async closure.
pub struct FnReader<F> {
    f: F,
}

/// Wrap an async closure as a [`Reader`].
pub fn from_fn<F, Fut>(f: F) -> FnReader<F>
where
    F: Fn(Path) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    FnReader { f }
}

#[async_trait]
impl<F, Fut> Reader for FnReader<F>
where
    F: Fn(Path) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn read(&self, path: &Path) -> Result<Value> {
        (self.f)(path.clone()).await
    }
}

/// A [`ListReader`] backed by an async closure producing entry keys.
pub struct FnListReader<F> {
    keys: F,
}

/// Wrap an async key-enumerating closure as a [`ListReader`].
pub fn list_from_fn<F, Fut>(keys: F) -> FnListReader<F>
where
    F: Fn(Path) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Keys>>> + Send + 'static,
{
    FnListReader { keys }
}

#[async_trait]
impl<F, Fut> ListReader for FnListReader<F>
where
    F: Fn(Path) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Keys>>> + Send + 'static,
{
    async fn read_keys(&self, path: &Path) -> Result<Vec<Keys>> {
        (self.keys)(path.clone()).await
    }
}
