//! Structural schema metadata and tree validation.
//!
//! A [`SchemaIndex`] answers structural questions about schema paths: whether
//! a node exists, whether it is a list and which leaves identify its entries.
//! Lookups ignore key predicates, so `/a/b[k='1']/c` and `/a/b/c` address the
//! same schema node.

use std::collections::{BTreeMap, BTreeSet};

use crate::{Path, Value};

/// Which constraint set [`SchemaIndex::validate`] enforces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidationMode {
    /// Full validation: structure, list keys, mandatory leaves, leaf references.
    Config,
    /// Structure and list keys only. Devices need not populate every modeled
    /// leaf and references may point at state that was never read.
    Operational,
}

/// Read-only structural metadata, shared by every transaction and reader.
pub trait SchemaIndex: Send + Sync {
    /// True if the path names a node of the schema.
    fn is_path_valid(&self, path: &Path) -> bool;

    /// True if the path names a list.
    fn is_list(&self, path: &Path) -> bool;

    /// Ordered key leaf names of a list; empty for anything else.
    fn keys_of(&self, path: &Path) -> Vec<String>;

    /// Names of the mandatory leaves directly under a container or list.
    fn mandatory_of(&self, _path: &Path) -> Vec<String> {
        Vec::new()
    }

    /// Schema path of the leaf a leaf reference points at.
    fn leafref_target(&self, _path: &Path) -> Option<Path> {
        None
    }

    /// Validate the content of one module root against this schema.
    ///
    /// `module` is the depth-1 path of the module and `tree` its content.
    /// Leaf references are resolved within the same module tree.
    fn validate(&self, module: &Path, tree: &Value, mode: ValidationMode) -> Result<(), String> {
        let walker = Walker {
            schema: self,
            module,
            tree,
            mode,
        };
        walker.node(&module.unkeyed(), tree)
    }
}

struct Walker<'a, S: SchemaIndex + ?Sized> {
    schema: &'a S,
    module: &'a Path,
    tree: &'a Value,
    mode: ValidationMode,
}

impl<S: SchemaIndex + ?Sized> Walker<'_, S> {
    fn node(&self, path: &Path, value: &Value) -> Result<(), String> {
        if !self.schema.is_path_valid(path) {
            return Err(format!("unknown node {}", path));
        }

        if self.schema.is_list(path) {
            let entries = value
                .as_array()
                .ok_or_else(|| format!("list {} must be an array", path))?;
            let keys = self.schema.keys_of(path);
            let mut seen = BTreeSet::new();
            for entry in entries {
                let identity = crate::Keys::from_entry(entry, &keys)
                    .ok_or_else(|| format!("list entry of {} is missing keys {:?}", path, keys))?;
                if !identity.is_empty() && !seen.insert(identity.to_string()) {
                    return Err(format!("duplicate list entry {}{}", path, identity));
                }
                self.children(path, entry)?;
            }
            return Ok(());
        }

        match value {
            Value::Map(_) => self.children(path, value),
            leaf => self.leaf(path, leaf),
        }
    }

    fn children(&self, path: &Path, value: &Value) -> Result<(), String> {
        let map = value
            .as_map()
            .ok_or_else(|| format!("node {} must be an object", path))?;

        if self.mode == ValidationMode::Config {
            if let Some(missing) = self
                .schema
                .mandatory_of(path)
                .into_iter()
                .find(|name| !map.contains_key(name))
            {
                return Err(format!("missing mandatory leaf {}/{}", path, missing));
            }
        }

        for (name, child) in map {
            let child_path = path
                .child(name)
                .map_err(|e| format!("invalid node name under {}: {}", path, e))?;
            self.node(&child_path, child)?;
        }
        Ok(())
    }

    fn leaf(&self, path: &Path, value: &Value) -> Result<(), String> {
        if self.mode == ValidationMode::Operational {
            return Ok(());
        }
        let Some(target) = self.schema.leafref_target(path) else {
            return Ok(());
        };

        let allowed = self.values_at(&target);
        let members: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            scalar => vec![scalar],
        };
        for member in members {
            let text = member.key_string().unwrap_or_default();
            if !allowed.contains(&text) {
                return Err(format!(
                    "leaf {} refers to missing {} '{}'",
                    path, target, text
                ));
            }
        }
        Ok(())
    }

    /// All scalar values found at schema path `target` inside the module tree.
    fn values_at(&self, target: &Path) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if !target.is_child_of(&self.module.unkeyed()) || target.depth() < 1 {
            return out;
        }

        let mut level = vec![self.tree];
        for segment in &target.segments()[1..] {
            level = level
                .into_iter()
                .filter_map(|v| v.field(segment.name()))
                .flat_map(|v| match v {
                    Value::Array(items) => items.iter().collect::<Vec<_>>(),
                    other => vec![other],
                })
                .collect();
        }
        out.extend(level.into_iter().filter_map(Value::key_string));
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum NodeKind {
    Container,
    List(Vec<String>),
    Leaf,
}

/// An in-memory schema index assembled with a builder.
///
/// Registering a node registers every missing ancestor as a container.
///
/// ```rust
/// use devstore_core::{path, SchemaIndex, StaticSchema};
///
/// let schema = StaticSchema::new()
///     .list(path!("/interfaces/interface"), &["name"])
///     .leaf(path!("/interfaces/interface/name"))
///     .mandatory_leaf(path!("/interfaces/interface/config/name"));
///
/// assert!(schema.is_path_valid(&path!("/interfaces")));
/// assert!(schema.is_list(&path!("/interfaces/interface[name='eth0']")));
/// assert_eq!(schema.keys_of(&path!("/interfaces/interface")), vec!["name"]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct StaticSchema {
    nodes: BTreeMap<Path, NodeKind>,
    mandatory: BTreeMap<Path, Vec<String>>,
    leafrefs: BTreeMap<Path, Path>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn container(self, path: Path) -> Self {
        self.register(path, NodeKind::Container)
    }

    #[must_use]
    pub fn list(self, path: Path, keys: &[&str]) -> Self {
        let keys = keys.iter().map(|k| k.to_string()).collect();
        self.register(path, NodeKind::List(keys))
    }

    #[must_use]
    pub fn leaf(self, path: Path) -> Self {
        self.register(path, NodeKind::Leaf)
    }

    /// Register a leaf its parent must always carry in `Config` mode.
    #[must_use]
    pub fn mandatory_leaf(mut self, path: Path) -> Self {
        let path = path.unkeyed();
        if let (Ok(parent), Ok(last)) = (path.parent(), path.last_segment()) {
            let names = self.mandatory.entry(parent).or_default();
            if !names.iter().any(|n| n == last.name()) {
                names.push(last.name().to_string());
            }
        }
        self.leaf(path)
    }

    /// Register a leaf whose values must exist at `target`.
    #[must_use]
    pub fn leafref(mut self, path: Path, target: Path) -> Self {
        let path = path.unkeyed();
        self.leafrefs.insert(path.clone(), target.unkeyed());
        self.leaf(path)
    }

    fn register(mut self, path: Path, kind: NodeKind) -> Self {
        let path = path.unkeyed();
        for depth in 1..path.depth() {
            self.nodes
                .entry(path.ancestor_at_depth(depth))
                .or_insert(NodeKind::Container);
        }
        if !path.is_root() {
            self.nodes.insert(path, kind);
        }
        self
    }
}

impl SchemaIndex for StaticSchema {
    fn is_path_valid(&self, path: &Path) -> bool {
        self.nodes.contains_key(&path.unkeyed())
    }

    fn is_list(&self, path: &Path) -> bool {
        matches!(self.nodes.get(&path.unkeyed()), Some(NodeKind::List(_)))
    }

    fn keys_of(&self, path: &Path) -> Vec<String> {
        match self.nodes.get(&path.unkeyed()) {
            Some(NodeKind::List(keys)) => keys.clone(),
            _ => Vec::new(),
        }
    }

    fn mandatory_of(&self, path: &Path) -> Vec<String> {
        self.mandatory
            .get(&path.unkeyed())
            .cloned()
            .unwrap_or_default()
    }

    fn leafref_target(&self, path: &Path) -> Option<Path> {
        self.leafrefs.get(&path.unkeyed()).cloned()
    }
}
