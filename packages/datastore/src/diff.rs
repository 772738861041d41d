//! Structural comparison of two forests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use devstore_core::{Error, Keys, Path, Result, SchemaIndex, Value};

use crate::state::Forest;
use crate::tree::module_path;

/// Kind of change a [`DiffRecord`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    Create,
    Update,
    Delete,
}

/// One changed node.
///
/// `path` is the fully key-qualified location of the node. The side that
/// does not exist is an empty map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffRecord {
    pub before: Value,
    pub after: Value,
    pub diff_type: DiffType,
    pub path: Path,
}

impl DiffRecord {
    pub fn create(path: Path, after: Value) -> Self {
        Self {
            before: Value::map(),
            after,
            diff_type: DiffType::Create,
            path,
        }
    }

    pub fn update(path: Path, before: Value, after: Value) -> Self {
        Self {
            before,
            after,
            diff_type: DiffType::Update,
            path,
        }
    }

    pub fn delete(path: Path, before: Value) -> Self {
        Self {
            before,
            after: Value::map(),
            diff_type: DiffType::Delete,
            path,
        }
    }
}

/// Diff records keyed by path.
pub type DiffMap = BTreeMap<Path, DiffRecord>;

/// Compare every module of `committed` with its counterpart in `working`.
pub(crate) fn diff_forests(
    schema: &dyn SchemaIndex,
    committed: &Forest,
    working: &Forest,
) -> Result<DiffMap> {
    let mut differ = Differ {
        schema,
        records: DiffMap::new(),
    };

    let mut modules: Vec<&String> = committed.keys().chain(working.keys()).collect();
    modules.sort();
    modules.dedup();

    for module in modules {
        let path = module_path(module)?;
        match (committed.get(module), working.get(module)) {
            (None, None) => {}
            (Some(before), None) => differ.push(DiffRecord::delete(path, Value::clone(before))),
            (None, Some(after)) => differ.created(path, after)?,
            (Some(before), Some(after)) => {
                if before != after {
                    differ.node(&path, before, after)?;
                }
            }
        }
    }

    Ok(differ.records)
}

struct Differ<'a> {
    schema: &'a dyn SchemaIndex,
    records: DiffMap,
}

impl Differ<'_> {
    fn push(&mut self, record: DiffRecord) {
        if record.before == record.after {
            return;
        }
        self.records.entry(record.path.clone()).or_insert(record);
    }

    /// Compare two versions of a container or list entry at `path`.
    fn node(&mut self, path: &Path, before: &Value, after: &Value) -> Result<()> {
        let (Some(ours), Some(theirs)) = (before.as_map(), after.as_map()) else {
            self.push(DiffRecord::update(path.clone(), before.clone(), after.clone()));
            return Ok(());
        };

        let mut names: Vec<&String> = ours.keys().chain(theirs.keys()).collect();
        names.sort();
        names.dedup();

        for name in names {
            let child = path.child(name)?;
            match (ours.get(name), theirs.get(name)) {
                (Some(b), Some(a)) => self.field(&child, b, a)?,
                (Some(b), None) => self.removed(&child, b)?,
                (None, Some(a)) => self.added(&child, a)?,
                (None, None) => {}
            }
        }
        Ok(())
    }

    fn field(&mut self, path: &Path, before: &Value, after: &Value) -> Result<()> {
        if before == after {
            return Ok(());
        }
        if let (Some(ours), Some(theirs)) = (before.as_array(), after.as_array()) {
            if self.schema.is_list(path) {
                if let Some(entries) = self.entries(ours, theirs, path) {
                    return self.list(path, entries);
                }
            } else if same_members(ours, theirs) {
                return Ok(());
            }
        }
        if before.is_map() && after.is_map() {
            return self.node(path, before, after);
        }
        self.push(DiffRecord::update(path.clone(), before.clone(), after.clone()));
        Ok(())
    }

    /// Pair list entries by key. `None` if any entry lacks its keys.
    fn entries<'v>(
        &self,
        before: &'v [Value],
        after: &'v [Value],
        path: &Path,
    ) -> Option<BTreeMap<Keys, (Option<&'v Value>, Option<&'v Value>)>> {
        let keys = self.schema.keys_of(path);
        if keys.is_empty() {
            return None;
        }
        let mut paired: BTreeMap<Keys, (Option<&Value>, Option<&Value>)> = BTreeMap::new();
        for entry in before {
            paired.entry(Keys::from_entry(entry, &keys)?).or_default().0 = Some(entry);
        }
        for entry in after {
            paired.entry(Keys::from_entry(entry, &keys)?).or_default().1 = Some(entry);
        }
        Some(paired)
    }

    fn list(
        &mut self,
        path: &Path,
        entries: BTreeMap<Keys, (Option<&Value>, Option<&Value>)>,
    ) -> Result<()> {
        for (keys, pair) in entries {
            let entry_path = path.add_keys(&keys)?;
            match pair {
                (Some(b), Some(a)) => {
                    if b != a {
                        self.node(&entry_path, b, a)?;
                    }
                }
                (Some(b), None) => self.push(DiffRecord::delete(entry_path, b.clone())),
                (None, Some(a)) => self.created(entry_path, a)?,
                (None, None) => {}
            }
        }
        Ok(())
    }

    fn removed(&mut self, path: &Path, before: &Value) -> Result<()> {
        match self.keyed_entries(path, before) {
            Some(entries) => {
                for (entry_path, entry) in entries? {
                    self.push(DiffRecord::delete(entry_path, entry.clone()));
                }
            }
            None => self.push(DiffRecord::delete(path.clone(), before.clone())),
        }
        Ok(())
    }

    fn added(&mut self, path: &Path, after: &Value) -> Result<()> {
        match self.keyed_entries(path, after) {
            Some(entries) => {
                for (entry_path, entry) in entries? {
                    self.created(entry_path, entry)?;
                }
            }
            None => self.created(path.clone(), after)?,
        }
        Ok(())
    }

    /// Keyed paths of every entry when `value` is a list whose entries all
    /// carry their keys.
    fn keyed_entries<'v>(
        &self,
        path: &Path,
        value: &'v Value,
    ) -> Option<Result<Vec<(Path, &'v Value)>>> {
        let entries = value.as_array()?;
        if !self.schema.is_list(path) {
            return None;
        }
        let keys = self.schema.keys_of(path);
        if keys.is_empty() {
            return None;
        }
        let identities = entries
            .iter()
            .map(|e| Keys::from_entry(e, &keys).map(|k| (k, e)))
            .collect::<Option<Vec<_>>>()?;
        Some(
            identities
                .into_iter()
                .map(|(k, e)| path.add_keys(&k).map(|p| (p, e)).map_err(Error::from))
                .collect(),
        )
    }

    /// Report a whole created subtree at its most specific node.
    fn created(&mut self, path: Path, value: &Value) -> Result<()> {
        let (path, value) = self.collapse(path, value)?;
        self.push(DiffRecord::create(path, value.clone()));
        Ok(())
    }

    /// Descend through wrappers whose only content is one nested object or
    /// one list entry. Entries with non-string keys are kept whole.
    fn collapse<'v>(&self, mut path: Path, mut value: &'v Value) -> Result<(Path, &'v Value)> {
        loop {
            let Some(map) = value.as_map() else {
                return Ok((path, value));
            };
            let own_keys = path.keys().unwrap_or_default();
            let string_keys = own_keys
                .iter()
                .all(|(k, _)| matches!(map.get(k), Some(Value::String(_))));
            if !string_keys {
                return Ok((path, value));
            }
            let mut rest = map.iter().filter(|(name, _)| own_keys.get(name).is_none());
            let (Some((name, child)), None) = (rest.next(), rest.next()) else {
                return Ok((path, value));
            };
            let child_path = path.child(name)?;

            match child {
                Value::Map(_) => {
                    path = child_path;
                    value = child;
                }
                Value::Array(entries) if entries.len() == 1 && self.schema.is_list(&child_path) => {
                    let entry = &entries[0];
                    let keys = self.schema.keys_of(&child_path);
                    match Keys::from_entry(entry, &keys) {
                        Some(identity) if !identity.is_empty() => {
                            path = child_path.add_keys(&identity)?;
                            value = entry;
                        }
                        _ => return Ok((path, value)),
                    }
                }
                _ => return Ok((path, value)),
            }
        }
    }
}

/// Order-insensitive comparison of leaf-list members.
fn same_members(a: &[Value], b: &[Value]) -> bool {
    let count = |items: &[Value], x: &Value| items.iter().filter(|y| *y == x).count();
    a.len() == b.len() && a.iter().all(|x| count(a, x) == count(b, x))
}
