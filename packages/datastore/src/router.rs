//! Routing of diff records to subscriber paths.
//!
//! Routing runs in three passes per record:
//! 1. split whole-subtree creates and deletes into one record per nested
//!    container and list entry,
//! 2. match each split record against the closest subscriber paths,
//! 3. notify each matched subscriber once per unified path, with before and
//!    after values re-read at the subscriber's depth.

use std::collections::BTreeMap;

use devstore_core::{Keys, Path, Result, SchemaIndex, Value};

use crate::diff::{DiffMap, DiffRecord, DiffType};
use crate::state::Forest;
use crate::tree;

/// A subscriber's interest in a subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Subscription {
    path: Path,
    /// Set while routing deletes: also match changes arbitrarily deeper.
    match_descendants: bool,
}

impl Subscription {
    fn new(path: Path) -> Self {
        Self {
            path,
            match_descendants: false,
        }
    }
}

/// Diff records grouped by the subscriber path they were routed to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiffResult {
    pub diffs: BTreeMap<Path, Vec<DiffRecord>>,
    /// Changed paths no subscriber matched.
    pub unhandled: Vec<Path>,
}

impl DiffResult {
    /// Records routed to one subscriber.
    pub fn for_subscriber(&self, path: &Path) -> &[DiffRecord] {
        self.diffs.get(path).map(Vec::as_slice).unwrap_or_default()
    }
}

pub(crate) struct Router<'a> {
    schema: &'a dyn SchemaIndex,
    committed: &'a Forest,
    working: &'a Forest,
    subscriptions: Vec<Subscription>,
    result: DiffResult,
}

impl<'a> Router<'a> {
    pub(crate) fn new(
        schema: &'a dyn SchemaIndex,
        committed: &'a Forest,
        working: &'a Forest,
        subscribers: &[Path],
    ) -> Self {
        let mut paths = subscribers.to_vec();
        paths.sort();
        paths.dedup();
        Self {
            schema,
            committed,
            working,
            subscriptions: paths.into_iter().map(Subscription::new).collect(),
            result: DiffResult::default(),
        }
    }

    pub(crate) fn route(mut self, diffs: &DiffMap) -> Result<DiffResult> {
        for record in diffs.values() {
            for split in self.split(record)? {
                let matched = self.matching(&split.path, split.diff_type);
                if matched.is_empty() {
                    tracing::debug!(path = %split.path, "no subscriber for changed path");
                    if !self.result.unhandled.contains(&split.path) {
                        self.result.unhandled.push(split.path.clone());
                    }
                    continue;
                }
                for index in matched {
                    self.notify(index, &split.path, split.diff_type)?;
                }
            }
        }
        if !self.result.unhandled.is_empty() {
            tracing::info!(count = self.result.unhandled.len(), "unhandled diff paths");
        }
        Ok(self.result)
    }

    fn split(&self, record: &DiffRecord) -> Result<Vec<DiffRecord>> {
        let mut out = Vec::new();
        match record.diff_type {
            DiffType::Update => out.push(record.clone()),
            DiffType::Delete => {
                out.push(record.clone());
                self.descend(&record.path, &record.before, DiffType::Delete, &mut out)?;
            }
            DiffType::Create => {
                for depth in 1..record.path.depth() {
                    let ancestor = record.path.ancestor_at_depth(depth);
                    if !self.exists_committed(&ancestor) {
                        let after = tree::read(self.schema, self.working, &ancestor)?;
                        out.push(DiffRecord::create(ancestor, after));
                    }
                }
                out.push(record.clone());
                self.descend(&record.path, &record.after, DiffType::Create, &mut out)?;
            }
        }
        Ok(out)
    }

    fn exists_committed(&self, path: &Path) -> bool {
        path.module_name()
            .and_then(|module| self.committed.get(module))
            .is_some_and(|content| !tree::find(self.schema, content, path).is_empty())
    }

    /// One record per nested container and list entry of `value`.
    fn descend(
        &self,
        path: &Path,
        value: &Value,
        diff_type: DiffType,
        out: &mut Vec<DiffRecord>,
    ) -> Result<()> {
        let Some(map) = value.as_map() else {
            return Ok(());
        };
        let record = |path: Path, value: &Value| match diff_type {
            DiffType::Delete => DiffRecord::delete(path, value.clone()),
            _ => DiffRecord::create(path, value.clone()),
        };

        for (name, child) in map {
            let child_path = path.child(name)?;
            match child {
                Value::Map(_) => {
                    out.push(record(child_path.clone(), child));
                    self.descend(&child_path, child, diff_type, out)?;
                }
                Value::Array(entries) if self.schema.is_list(&child_path) => {
                    let keys = self.schema.keys_of(&child_path);
                    for entry in entries {
                        let Some(identity) = Keys::from_entry(entry, &keys) else {
                            continue;
                        };
                        if identity.is_empty() {
                            continue;
                        }
                        let entry_path = child_path.add_keys(&identity)?;
                        out.push(record(entry_path.clone(), entry));
                        self.descend(&entry_path, entry, diff_type, out)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Indices of the subscriptions a changed path is routed to.
    ///
    /// A delete reaches every subscriber on or below the removed path, which
    /// then also accepts deeper changes, and every subscriber above it. A
    /// create or update reaches the deepest subscriber on or above the path;
    /// a create only when that subscriber sits at the same depth or accepts
    /// deeper changes.
    fn matching(&mut self, path: &Path, diff_type: DiffType) -> Vec<usize> {
        if diff_type == DiffType::Delete {
            let mut matched = Vec::new();
            for (index, subscription) in self.subscriptions.iter_mut().enumerate() {
                if subscription.path.is_child_of(path) {
                    subscription.match_descendants = true;
                    matched.push(index);
                } else if path.is_child_of(&subscription.path) {
                    matched.push(index);
                }
            }
            return matched;
        }

        let closest = self
            .subscriptions
            .iter()
            .enumerate()
            .filter(|(_, s)| path.is_child_of(&s.path))
            .max_by_key(|(_, s)| s.path.depth());

        let Some((index, subscription)) = closest else {
            return Vec::new();
        };
        let accepted = match diff_type {
            DiffType::Create => {
                subscription.match_descendants || path.depth() == subscription.path.depth()
            }
            _ => true,
        };
        if accepted {
            vec![index]
        } else {
            Vec::new()
        }
    }

    fn notify(&mut self, index: usize, path: &Path, diff_type: DiffType) -> Result<()> {
        let subscriber = self.subscriptions[index].path.clone();
        let unified = path.ancestor_at_depth(subscriber.depth());

        let delivered = self.result.diffs.entry(subscriber).or_default();
        let duplicate = delivered.iter().any(|r| {
            r.diff_type == diff_type && unified.ancestor_at_depth(r.path.depth()) == r.path
        });
        if duplicate {
            return Ok(());
        }

        let before = tree::read(self.schema, self.committed, &unified)?;
        let after = tree::read(self.schema, self.working, &unified)?;
        delivered.push(DiffRecord {
            before,
            after,
            diff_type,
            path: unified,
        });
        Ok(())
    }
}
