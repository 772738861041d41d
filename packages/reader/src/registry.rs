//! Registration of device readers and construction of the reader tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use devstore_core::{Error, Keys, Path, Result, SchemaIndex, Value};

use crate::composite::{CompositeReader, NodeReader};
use crate::config::ReaderConfig;
use crate::traits::{from_fn, list_from_fn, ListReader, Reader};

/// Collects readers by schema path, then builds a [`ReaderRegistry`].
///
/// # Example
///
/// ```rust
/// use devstore_core::{path, Error, Keys, Path, Value};
/// use devstore_reader::ReaderRegistryBuilder;
///
/// let registry = ReaderRegistryBuilder::new()
///     .add_list_fn(path!("/interfaces/interface"), |_path: Path| async move {
///         Ok::<_, Error>(vec![Keys::new().with("name", "eth0")])
///     })
///     .add_fn(path!("/interfaces/interface/config"), |path: Path| async move {
///         let name = path.keys_from_segment("interface")?.get("name").unwrap_or_default().to_string();
///         Ok::<_, Error>(Value::from(serde_json::json!({"name": name})))
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(registry.root().children().count(), 1);
/// ```
#[derive(Default)]
pub struct ReaderRegistryBuilder {
    readers: Vec<(Path, NodeReader)>,
    schema: Option<Arc<dyn SchemaIndex>>,
    config: ReaderConfig,
}

impl ReaderRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a point reader.
    #[must_use]
    pub fn add(mut self, path: Path, reader: impl Reader + 'static) -> Self {
        self.readers.push((path, NodeReader::Point(Arc::new(reader))));
        self
    }

    /// Register a list reader.
    #[must_use]
    pub fn add_list(mut self, path: Path, reader: impl ListReader + 'static) -> Self {
        self.readers.push((path, NodeReader::List(Arc::new(reader))));
        self
    }

    /// Register an async closure as a point reader.
    #[must_use]
    pub fn add_fn<F, Fut>(self, path: Path, f: F) -> Self
    where
        F: Fn(Path) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.add(path, from_fn(f))
    }

    /// Register an async key-enumerating closure as a list reader.
    #[must_use]
    pub fn add_list_fn<F, Fut>(self, path: Path, keys: F) -> Self
    where
        F: Fn(Path) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Keys>>> + Send + 'static,
    {
        self.add_list(path, list_from_fn(keys))
    }

    /// Check registrations against a schema when building.
    #[must_use]
    pub fn with_schema(mut self, schema: Arc<dyn SchemaIndex>) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the reader tree.
    ///
    /// Every registered path's ancestor chain gets a node; levels without a
    /// reader get a structural placeholder. A path registered twice keeps
    /// its first reader.
    pub fn build(self) -> Result<ReaderRegistry> {
        let Self {
            readers,
            schema,
            config,
        } = self;
        if readers.is_empty() {
            return Err(invalid("no readers registered"));
        }

        let mut registered: BTreeMap<Path, NodeReader> = BTreeMap::new();
        for (path, reader) in readers {
            check(schema.as_deref(), &path, &reader)?;
            if registered.contains_key(&path) {
                tracing::warn!(%path, "reader already registered, keeping the first");
                continue;
            }
            registered.insert(path, reader);
        }

        let mut all: BTreeSet<Path> = BTreeSet::new();
        for path in registered.keys() {
            for depth in 0..=path.depth() {
                all.insert(path.ancestor_at_depth(depth));
            }
        }

        let root = Arc::new(build_node(Path::root(), &mut registered, &all, config));
        let registry = ReaderRegistry { root };
        tracing::debug!(hierarchy = %registry, "reader hierarchy computed");
        Ok(registry)
    }
}

fn check(schema: Option<&dyn SchemaIndex>, path: &Path, reader: &NodeReader) -> Result<()> {
    if path.is_root() {
        return Err(invalid("readers cannot be registered at the root"));
    }
    if path.is_keyed() {
        return Err(invalid(format!("registration path {} carries keys", path)));
    }
    let Some(schema) = schema else {
        return Ok(());
    };
    if !schema.is_path_valid(path) {
        return Err(invalid(format!("{} is not a schema path", path)));
    }
    if matches!(reader, NodeReader::List(_)) && !schema.is_list(path) {
        return Err(invalid(format!("list reader registered at non-list {}", path)));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidRegistry {
        message: message.into(),
    }
}

fn build_node(
    path: Path,
    registered: &mut BTreeMap<Path, NodeReader>,
    all: &BTreeSet<Path>,
    config: ReaderConfig,
) -> CompositeReader {
    let child_paths: Vec<Path> = all
        .iter()
        .filter(|p| p.depth() == path.depth() + 1 && p.is_child_of(&path))
        .cloned()
        .collect();

    let mut children = BTreeMap::new();
    for child in child_paths {
        if let Ok(segment) = child.last_segment() {
            let name = segment.name().to_string();
            children.insert(name, Arc::new(build_node(child, registered, all, config)));
        }
    }

    let reader = registered.remove(&path).unwrap_or(NodeReader::Structural);
    CompositeReader::new(path, reader, children, config)
}

/// The built, read-only reader hierarchy.
#[derive(Debug, Clone)]
pub struct ReaderRegistry {
    root: Arc<CompositeReader>,
}

impl ReaderRegistry {
    pub fn root(&self) -> &Arc<CompositeReader> {
        &self.root
    }

    /// Read the device at `path`.
    ///
    /// The result is a root document (module name to module content) that
    /// holds only what lies on and below `path`, suitable for merging at
    /// the root of a transaction.
    pub async fn read_configuration(&self, path: &Path) -> Result<Value> {
        self.root.read(path).await
    }

    /// Read operational state at `path`. Served by the same readers as
    /// configuration.
    pub async fn read_state(&self, path: &Path) -> Result<Value> {
        self.read_configuration(path).await
    }
}

impl fmt::Display for ReaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn node(f: &mut fmt::Formatter<'_>, reader: &CompositeReader, indent: usize) -> fmt::Result {
            writeln!(
                f,
                "{:indent$}{} ({})",
                "",
                reader.path(),
                reader.reader().kind(),
                indent = indent * 2
            )?;
            for child in reader.children() {
                node(f, child, indent + 1)?;
            }
            Ok(())
        }
        node(f, &self.root, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devstore_core::{path, StaticSchema};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn interfaces() -> ReaderRegistryBuilder {
        ReaderRegistryBuilder::new()
            .add_list_fn(path!("/interfaces/interface"), |_path: Path| async move {
                Ok::<_, Error>(vec![
                    Keys::new().with("name", "a"),
                    Keys::new().with("name", "b"),
                ])
            })
            .add_fn(
                path!("/interfaces/interface/config"),
                |path: Path| async move {
                    let name = path
                        .keys_from_segment("interface")?
                        .get("name")
                        .unwrap_or_default()
                        .to_string();
                    Ok::<_, Error>(Value::from(json!({"name": name, "enabled": true})))
                },
            )
    }

    #[tokio::test]
    async fn list_fans_out_per_entry() {
        let registry = interfaces().build().unwrap();
        let value = registry
            .read_configuration(&path!("/interfaces"))
            .await
            .unwrap();
        assert_eq!(
            value,
            Value::from(json!({"interfaces": {"interface": [
                {"name": "a", "config": {"name": "a", "enabled": true}},
                {"name": "b", "config": {"name": "b", "enabled": true}}
            ]}}))
        );
    }

    #[tokio::test]
    async fn keyed_read_returns_one_entry() {
        let registry = interfaces().build().unwrap();
        let value = registry
            .read_state(&path!("/interfaces/interface[name='b']/config"))
            .await
            .unwrap();
        assert_eq!(
            value,
            Value::from(json!({"interfaces": {"interface": [
                {"name": "b", "config": {"name": "b", "enabled": true}}
            ]}}))
        );
    }

    #[tokio::test]
    async fn root_read_covers_every_module() {
        let registry = interfaces()
            .add_fn(path!("/system"), |_path: Path| async move {
                Ok::<_, Error>(Value::from(json!({"hostname": "r1"})))
            })
            .build()
            .unwrap();
        let value = registry.read_configuration(&Path::root()).await.unwrap();
        let modules: Vec<&String> = value.as_map().unwrap().keys().collect();
        assert_eq!(modules, vec!["interfaces", "system"]);
        assert_eq!(
            value.field("system"),
            Some(&Value::from(json!({"hostname": "r1"})))
        );
    }

    #[tokio::test]
    async fn timeouts_become_read_failures() {
        let registry = ReaderRegistryBuilder::new()
            .add_fn(path!("/system"), |_path: Path| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(Value::map())
            })
            .with_config(ReaderConfig::default().with_read_timeout(Duration::from_millis(10)))
            .build()
            .unwrap();
        let err = registry
            .read_configuration(&path!("/system"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadFailure { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn failing_sibling_does_not_cancel_others() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let registry = ReaderRegistryBuilder::new()
            .add_fn(path!("/system/clock"), |path: Path| async move {
                Err::<Value, _>(Error::read_failure(&path, "broken"))
            })
            .add_fn(path!("/system/ntp"), move |_path: Path| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(Value::from(json!({"enabled": true})))
                }
            })
            .build()
            .unwrap();

        assert!(registry.read_configuration(&path!("/system")).await.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn build_rejects_bad_registrations() {
        assert!(matches!(
            ReaderRegistryBuilder::new().build(),
            Err(Error::InvalidRegistry { .. })
        ));
        assert!(ReaderRegistryBuilder::new()
            .add_fn(path!("/interfaces/interface[name='a']"), |_path: Path| async move {
                Ok::<_, Error>(Value::map())
            })
            .build()
            .is_err());

        let schema = Arc::new(
            StaticSchema::new()
                .list(path!("/interfaces/interface"), &["name"])
                .container(path!("/interfaces/interface/config")),
        );
        assert!(interfaces().with_schema(schema.clone()).build().is_ok());
        assert!(ReaderRegistryBuilder::new()
            .add_list_fn(path!("/interfaces/interface/config"), |_path: Path| async move {
                Ok::<_, Error>(Vec::new())
            })
            .with_schema(schema.clone())
            .build()
            .is_err());
        assert!(ReaderRegistryBuilder::new()
            .add_fn(path!("/bogus"), |_path: Path| async move {
                Ok::<_, Error>(Value::map())
            })
            .with_schema(schema)
            .build()
            .is_err());
    }

    #[test]
    fn hierarchy_includes_structural_ancestors() {
        let registry = interfaces()
            .add_fn(path!("/interfaces/interface/config"), |_path: Path| async move {
                Ok::<_, Error>(Value::map())
            })
            .build()
            .unwrap();
        assert_eq!(
            registry.to_string(),
            "/ (structural)\n  /interfaces (structural)\n    /interfaces/interface (list)\n      /interfaces/interface/config (point)\n"
        );
    }
}
