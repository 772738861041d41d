//! The composite reader tree.
//!
//! Every node mirrors one schema level that has a reader registered at or
//! below it. Reading a path delegates down to the node that owns it, then
//! fans out concurrently over that node's own reader and all of its
//! children, merging the results into one tree.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;

use devstore_core::{Error, Keys, Path, Result, Value};

use crate::config::ReaderConfig;
use crate::traits::{ListReader, ReadFuture, Reader};

/// What a composite node reads by itself.
#[derive(Clone)]
pub enum NodeReader {
    /// Produces the content of one node.
    Point(Arc<dyn Reader>),
    /// Enumerates entry keys, then reads each entry.
    List(Arc<dyn ListReader>),
    /// Placeholder for an unregistered intermediate level.
    Structural,
}

impl NodeReader {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeReader::Point(_) => "point",
            NodeReader::List(_) => "list",
            NodeReader::Structural => "structural",
        }
    }
}

impl fmt::Debug for NodeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// One node of the reader hierarchy.
#[derive(Debug)]
pub struct CompositeReader {
    path: Path,
    reader: NodeReader,
    children: BTreeMap<String, Arc<CompositeReader>>,
    config: ReaderConfig,
}

impl CompositeReader {
    pub(crate) fn new(
        path: Path,
        reader: NodeReader,
        children: BTreeMap<String, Arc<CompositeReader>>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            path,
            reader,
            children,
            config,
        }
    }

    /// The registered (unkeyed) schema path of this node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reader(&self) -> &NodeReader {
        &self.reader
    }

    pub fn children(&self) -> impl Iterator<Item = &Arc<CompositeReader>> {
        self.children.values()
    }

    /// Read `target` and return it wrapped in all of its ancestors, as a
    /// document rooted at this node's parent.
    ///
    /// `target` must be at or below this node's path.
    pub async fn read(self: &Arc<Self>, target: &Path) -> Result<Value> {
        if !target.is_child_of(&self.path) {
            return Err(Error::read_failure(
                target,
                format!("outside of reader node {}", self.path),
            ));
        }
        Arc::clone(self).read_owned(target.clone()).await
    }

    fn read_owned(self: Arc<Self>, target: Path) -> ReadFuture {
        Box::pin(async move {
            match &self.reader {
                NodeReader::List(list) => self.read_list(list, &target).await,
                _ => self.read_node(&target).await,
            }
        })
    }

    fn depth(&self) -> usize {
        self.path.depth()
    }

    fn wrap(&self, content: Value) -> Value {
        match self.path.last_segment() {
            Ok(segment) => Value::Map([(segment.name().to_string(), content)].into_iter().collect()),
            Err(_) => content,
        }
    }

    async fn read_node(self: &Arc<Self>, target: &Path) -> Result<Value> {
        if target.depth() > self.depth() {
            let content = self.delegate(target).await?;
            if content.is_empty() {
                return Ok(content);
            }
            return Ok(self.wrap(content));
        }
        let content = self.read_here(target).await?;
        Ok(self.wrap(content))
    }

    /// Read the deeper `target` through the child on its path. The result is
    /// this node's content, holding only that child.
    async fn delegate(&self, target: &Path) -> Result<Value> {
        let next = &target.segments()[self.depth()];
        match self.children.get(next.name()) {
            Some(child) => Arc::clone(child).read_owned(target.clone()).await,
            None => {
                tracing::debug!(%target, node = %self.path, "no reader below node");
                Ok(Value::map())
            }
        }
    }

    /// Own reader and every child read concurrently, children winning on
    /// key collisions. `target` is this node's keyed path.
    async fn read_here(&self, target: &Path) -> Result<Value> {
        let mut tasks: Vec<ReadFuture> = Vec::with_capacity(self.children.len() + 1);

        match &self.reader {
            NodeReader::Point(reader) => {
                let reader = Arc::clone(reader);
                let path = target.clone();
                let config = self.config;
                tasks.push(Box::pin(async move {
                    timed(&path, config, reader.read(&path)).await
                }));
            }
            NodeReader::List(list) => {
                let list = Arc::clone(list);
                let path = target.clone();
                let config = self.config;
                tasks.push(Box::pin(async move {
                    timed(&path, config, list.read(&path)).await
                }));
            }
            NodeReader::Structural => {}
        }

        for (name, child) in &self.children {
            let child_target = target.child(name)?;
            tasks.push(Arc::clone(child).read_owned(child_target));
        }

        let mut merged = Value::map();
        for part in join_all(target, tasks).await? {
            merged.deep_merge(part);
        }
        Ok(merged)
    }

    async fn read_list(self: &Arc<Self>, list: &Arc<dyn ListReader>, target: &Path) -> Result<Value> {
        let index = self.depth() - 1;
        let segment = &target.segments()[index];
        let list_path = target.ancestor_at_depth(self.depth());

        if !segment.is_keyed() {
            let keys = timed(&list_path, self.config, list.read_keys(&list_path)).await?;
            let tasks = keys
                .iter()
                .map(|k| rekey(target, index, k).map(|t| Arc::clone(self).read_owned(t)))
                .collect::<Result<Vec<_>>>()?;

            let mut entries = Vec::with_capacity(tasks.len());
            for part in join_all(target, tasks).await? {
                entries.extend(
                    part.field(segment.name())
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                        .cloned(),
                );
            }
            return Ok(self.wrap(Value::Array(entries)));
        }

        let mut entry = if target.depth() > self.depth() {
            let content = self.delegate(target).await?;
            if content.is_empty() {
                return Ok(content);
            }
            content
        } else {
            self.read_here(target).await?
        };
        if let Value::Map(fields) = &mut entry {
            for (name, value) in segment.keys().iter() {
                fields
                    .entry(name.to_string())
                    .or_insert_with(|| Value::from(value));
            }
        }
        Ok(self.wrap(Value::Array(vec![entry])))
    }
}

/// `target` with the segment at `index` carrying `keys` instead of none.
fn rekey(target: &Path, index: usize, keys: &Keys) -> Result<Path> {
    let mut path = target.ancestor_at_depth(index + 1).add_keys(keys)?;
    for segment in &target.segments()[index + 1..] {
        path = path.child(&segment.to_string())?;
    }
    Ok(path)
}

/// Run a device call, bounded by the configured timeout.
async fn timed<T, F>(path: &Path, config: ReaderConfig, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let result = match config.read_timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::read_failure(
                path,
                format!("timed out after {:?}", limit),
            )),
        },
        None => call.await,
    };
    if let Err(e) = &result {
        tracing::warn!(%path, error = %e, "device read failed");
    }
    result
}

/// Spawn every read, wait for all of them, and return the results in task
/// order. If any failed, the failure of the earliest task is returned once
/// all tasks have finished.
async fn join_all(path: &Path, tasks: Vec<ReadFuture>) -> Result<Vec<Value>> {
    let mut join_set: JoinSet<(usize, Result<Value>)> = JoinSet::new();
    let count = tasks.len();
    for (i, task) in tasks.into_iter().enumerate() {
        join_set.spawn(async move { (i, task.await) });
    }

    let mut slots: Vec<Option<Value>> = vec![None; count];
    let mut failures: BTreeMap<usize, Error> = BTreeMap::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((i, Ok(value))) => slots[i] = Some(value),
            Ok((i, Err(e))) => {
                failures.insert(i, e);
            }
            Err(e) => {
                failures.insert(count, Error::read_failure(path, e.to_string()));
            }
        }
    }

    if let Some((_, e)) = failures.into_iter().next() {
        return Err(e);
    }
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{from_fn, list_from_fn};
    use devstore_core::path;
    use serde_json::json;

    fn node(
        path: Path,
        reader: NodeReader,
        children: Vec<Arc<CompositeReader>>,
    ) -> Arc<CompositeReader> {
        let children = children
            .into_iter()
            .map(|c| {
                let name = c.path().last_segment().unwrap().name().to_string();
                (name, c)
            })
            .collect();
        Arc::new(CompositeReader::new(
            path,
            reader,
            children,
            ReaderConfig::default(),
        ))
    }

    fn point(value: serde_json::Value) -> NodeReader {
        NodeReader::Point(Arc::new(from_fn(move |_path: Path| {
            let value = Value::from(value.clone());
            async move { Ok::<_, Error>(value) }
        })))
    }

    #[tokio::test]
    async fn own_reader_and_children_merge() {
        let tree = node(
            path!("/system"),
            point(json!({"hostname": "r1", "clock": {"tz": "own"}})),
            vec![node(
                path!("/system/clock"),
                point(json!({"tz": "UTC"})),
                vec![],
            )],
        );
        let value = tree.read(&path!("/system")).await.unwrap();
        assert_eq!(
            value,
            Value::from(json!({"system": {"hostname": "r1", "clock": {"tz": "UTC"}}}))
        );
    }

    #[tokio::test]
    async fn deeper_target_delegates() {
        let tree = node(
            path!("/system"),
            point(json!({"hostname": "r1"})),
            vec![node(
                path!("/system/clock"),
                point(json!({"tz": "UTC"})),
                vec![],
            )],
        );
        let value = tree.read(&path!("/system/clock")).await.unwrap();
        assert_eq!(value, Value::from(json!({"system": {"clock": {"tz": "UTC"}}})));

        let nothing = tree.read(&path!("/system/ntp")).await.unwrap();
        assert_eq!(nothing, Value::map());
    }

    #[test]
    fn rekey_replaces_list_segment() {
        let rekeyed = rekey(
            &path!("/interfaces/interface/config"),
            1,
            &Keys::new().with("name", "a"),
        )
        .unwrap();
        assert_eq!(rekeyed, path!("/interfaces/interface[name='a']/config"));
    }

    #[tokio::test]
    async fn failures_fail_the_whole_read() {
        let failing = NodeReader::Point(Arc::new(from_fn(|path: Path| async move {
            Err::<Value, _>(Error::read_failure(&path, "device unreachable"))
        })));
        let tree = node(
            path!("/system"),
            point(json!({"hostname": "r1"})),
            vec![node(path!("/system/clock"), failing, vec![])],
        );
        let err = tree.read(&path!("/system")).await.unwrap_err();
        assert!(matches!(err, Error::ReadFailure { .. }));
        assert!(err.to_string().contains("device unreachable"));
    }

    #[tokio::test]
    async fn list_entry_keys_are_added() {
        let list = NodeReader::List(Arc::new(list_from_fn(|_path: Path| async move {
            Ok::<_, Error>(vec![Keys::new().with("id", "10")])
        })));
        let tree = node(
            path!("/vlans/vlan"),
            list,
            vec![node(
                path!("/vlans/vlan/config"),
                point(json!({"name": "users"})),
                vec![],
            )],
        );

        let one = tree.read(&path!("/vlans/vlan[id='10']")).await.unwrap();
        assert_eq!(
            one,
            Value::from(json!({"vlan": [{"id": "10", "config": {"name": "users"}}]}))
        );

        let all = tree.read(&path!("/vlans/vlan")).await.unwrap();
        assert_eq!(all, one);
    }

    #[tokio::test]
    async fn unread_entry_subpath_is_empty() {
        let list = NodeReader::List(Arc::new(list_from_fn(|_path: Path| async move {
            Ok::<_, Error>(vec![Keys::new().with("id", "10")])
        })));
        let tree = node(
            path!("/vlans/vlan"),
            list,
            vec![node(
                path!("/vlans/vlan/config"),
                point(json!({"name": "users"})),
                vec![],
            )],
        );

        let state = tree.read(&path!("/vlans/vlan[id='10']/state")).await.unwrap();
        assert_eq!(state, Value::map());

        let config = tree.read(&path!("/vlans/vlan[id='10']/config")).await.unwrap();
        assert_eq!(
            config,
            Value::from(json!({"vlan": [{"id": "10", "config": {"name": "users"}}]}))
        );
    }
}
