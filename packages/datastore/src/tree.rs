//! Path-addressed operations on module trees.
//!
//! A module tree is the content of one module root: a map whose fields are
//! containers (maps), lists (arrays of entry maps), leaf-lists (arrays of
//! scalars) and leaves (scalars). Paths handed to these functions are
//! absolute; their first segment names the module.

use devstore_core::{Error, Keys, Path, Result, SchemaIndex, Segment, Value};

use crate::state::Forest;

/// Path of a module root.
pub(crate) fn module_path(module: &str) -> Result<Path> {
    Ok(Path::root().child(module)?)
}

fn is_list_segment(schema: &dyn SchemaIndex, path: &Path, index: usize, segment: &Segment) -> bool {
    segment.is_keyed() || schema.is_list(&path.ancestor_at_depth(index + 1))
}

/// Nodes under `content` that `path` addresses.
///
/// An unkeyed list segment matches every entry of the list.
pub(crate) fn find<'a>(schema: &dyn SchemaIndex, content: &'a Value, path: &Path) -> Vec<&'a Value> {
    let mut level = vec![content];
    for (index, segment) in path.segments().iter().enumerate().skip(1) {
        let list = is_list_segment(schema, path, index, segment);
        level = level
            .into_iter()
            .filter_map(|node| node.field(segment.name()))
            .flat_map(|node| match node {
                Value::Array(entries) if list => entries
                    .iter()
                    .filter(|e| segment.keys().matches_entry(e))
                    .collect::<Vec<_>>(),
                _ if segment.is_keyed() => Vec::new(),
                other => vec![other],
            })
            .collect();
    }
    level
}

/// Read the single node `path` addresses in a forest.
///
/// Nothing matching yields an empty map. The root path yields a map of
/// every module.
pub(crate) fn read(schema: &dyn SchemaIndex, forest: &Forest, path: &Path) -> Result<Value> {
    let Some(module) = path.module_name() else {
        return Ok(Value::Map(
            forest
                .iter()
                .map(|(name, root)| (name.clone(), Value::clone(root)))
                .collect(),
        ));
    };
    let Some(content) = forest.get(module) else {
        return Ok(Value::map());
    };

    let matches = find(schema, content, path);
    match matches.as_slice() {
        [] => Ok(Value::map()),
        [single] => Ok((*single).clone()),
        _ => {
            tracing::warn!(%path, matches = matches.len(), "ambiguous read");
            Err(Error::AmbiguousRead {
                path: path.clone(),
                matches: matches.len(),
            })
        }
    }
}

/// Build module content holding `value` at `path`.
///
/// Every ancestor is synthesized: containers as single-field maps, keyed list
/// segments as one-entry arrays carrying their key leaves.
pub(crate) fn wrap(schema: &dyn SchemaIndex, path: &Path, value: Value) -> Result<Value> {
    let segments = path.segments();
    let mut node = value;

    for index in (1..segments.len()).rev() {
        let segment = &segments[index];
        let last = index == segments.len() - 1;

        let field = if segment.is_keyed() {
            let Value::Map(mut entry) = node else {
                return Err(Error::invalid_value(path, "list entry must be an object"));
            };
            for (name, key) in segment.keys().iter() {
                match entry.get(name) {
                    None => {
                        entry.insert(name.to_string(), Value::from(key));
                    }
                    Some(existing) if existing.key_string().as_deref() == Some(key) => {}
                    Some(_) => {
                        return Err(Error::invalid_value(
                            path,
                            format!("value of key '{}' does not match the path", name),
                        ));
                    }
                }
            }
            Value::Array(vec![Value::Map(entry)])
        } else if !last && is_list_segment(schema, path, index, segment) {
            return Err(Error::invalid_value(
                path,
                format!("list '{}' needs keys to address an entry", segment.name()),
            ));
        } else {
            node
        };

        node = Value::Map([(segment.name().to_string(), field)].into_iter().collect());
    }

    if !node.is_map() {
        return Err(Error::invalid_value(path, "module content must be an object"));
    }
    Ok(node)
}

/// Drop every list without entries below `node`, the node at schema path
/// `path`. Deleting the last entry of a list removes the list field, so
/// content entering a forest is held to the same shape.
pub(crate) fn prune_empty_lists(schema: &dyn SchemaIndex, node: &mut Value, path: &Path) {
    let Some(map) = node.as_map_mut() else {
        return;
    };
    map.retain(|name, child| {
        let Ok(child_path) = path.child(name) else {
            return true;
        };
        if let Value::Array(entries) = child {
            if !schema.is_list(&child_path) {
                return true;
            }
            for entry in entries.iter_mut() {
                prune_empty_lists(schema, entry, &child_path);
            }
            return !entries.is_empty();
        }
        prune_empty_lists(schema, child, &child_path);
        true
    });
}

/// Structurally merge `incoming` into `base`, the node at schema path `path`.
///
/// Maps merge field by field, list entries are matched by key, leaf-lists
/// are unioned and anything else is replaced.
pub(crate) fn merge(schema: &dyn SchemaIndex, base: &mut Value, incoming: Value, path: &Path) {
    match (base, incoming) {
        (Value::Map(ours), Value::Map(theirs)) => {
            for (name, value) in theirs {
                let child = path.child(&name).ok();
                match (ours.get_mut(&name), child) {
                    (Some(existing), Some(child)) => merge_field(schema, existing, value, &child),
                    (Some(existing), None) => *existing = value,
                    (None, _) => {
                        ours.insert(name, value);
                    }
                }
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}

fn merge_field(schema: &dyn SchemaIndex, existing: &mut Value, incoming: Value, path: &Path) {
    match (existing, incoming) {
        (Value::Array(ours), Value::Array(theirs)) if schema.is_list(path) => {
            let keys = schema.keys_of(path);
            for entry in theirs {
                let identity = Keys::from_entry(&entry, &keys).filter(|k| !k.is_empty());
                let position = identity
                    .as_ref()
                    .and_then(|id| ours.iter().position(|e| id.matches_entry(e)));
                match position {
                    Some(i) => merge(schema, &mut ours[i], entry, path),
                    None => ours.push(entry),
                }
            }
        }
        (Value::Array(ours), Value::Array(theirs)) => {
            for item in theirs {
                if !ours.contains(&item) {
                    ours.push(item);
                }
            }
        }
        (existing @ Value::Map(_), incoming @ Value::Map(_)) => {
            merge(schema, existing, incoming, path)
        }
        (slot, incoming) => *slot = incoming,
    }
}

/// Detach every node `path` addresses below `content`. Returns how many
/// nodes were removed. A list left without entries is removed too.
pub(crate) fn delete(schema: &dyn SchemaIndex, content: &mut Value, path: &Path) -> usize {
    if path.depth() < 2 {
        return 0;
    }
    remove_at(schema, content, path, 1)
}

fn remove_at(schema: &dyn SchemaIndex, node: &mut Value, path: &Path, index: usize) -> usize {
    let segment = &path.segments()[index];
    let list = is_list_segment(schema, path, index, segment);
    let Some(map) = node.as_map_mut() else {
        return 0;
    };

    if index + 1 == path.depth() {
        return match map.get_mut(segment.name()) {
            Some(Value::Array(entries)) if list => {
                let before = entries.len();
                entries.retain(|e| !segment.keys().matches_entry(e));
                let removed = before - entries.len();
                if entries.is_empty() {
                    map.remove(segment.name());
                }
                removed
            }
            Some(_) if !segment.is_keyed() => {
                map.remove(segment.name());
                1
            }
            _ => 0,
        };
    }

    match map.get_mut(segment.name()) {
        Some(Value::Array(entries)) if list => entries
            .iter_mut()
            .filter(|e| segment.keys().matches_entry(e))
            .map(|e| remove_at(schema, e, path, index + 1))
            .sum(),
        Some(child) if !segment.is_keyed() => remove_at(schema, child, path, index + 1),
        _ => 0,
    }
}
