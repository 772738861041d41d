//! List-entry identity: the ordered `key=value` pairs carried by a keyed path segment.

use std::collections::BTreeMap;
use std::fmt;

use crate::Value;

/// Ordered set of `key=value` pairs identifying one entry of a list.
///
/// Insertion order is preserved, so a path rendered from a `Keys` value
/// always lists its predicates in the order they were added (or parsed).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keys {
    entries: Vec<(String, String)>,
}

impl Keys {
    /// Create an empty key set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key, replacing the value in place if the key already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up the value of a key.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Extract the identity of a list entry from its payload.
    ///
    /// Returns `None` if any of `key_names` is missing from the entry or is
    /// not a scalar.
    pub fn from_entry(entry: &Value, key_names: &[String]) -> Option<Keys> {
        let mut keys = Keys::new();
        for name in key_names {
            let value = entry.field(name)?.key_string()?;
            keys.insert(name.clone(), value);
        }
        Some(keys)
    }

    /// Render the keys as an object of string leaves.
    pub fn to_value(&self) -> Value {
        Value::Map(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    /// True if every key of `self` appears in `entry` with the same value.
    pub fn matches_entry(&self, entry: &Value) -> bool {
        self.entries.iter().all(|(name, value)| {
            entry
                .field(name)
                .and_then(Value::key_string)
                .is_some_and(|v| v == *value)
        })
    }

    /// Parse predicate text such as `[a='1'][b="2"]` or `[a='1',b='2']`.
    pub(crate) fn parse_predicates(text: &str) -> Result<Keys, String> {
        let mut keys = Keys::new();
        let mut rest = text;

        while !rest.is_empty() {
            rest = rest
                .strip_prefix('[')
                .ok_or_else(|| format!("expected '[' before '{}'", rest))?;

            loop {
                let eq = rest
                    .find('=')
                    .ok_or_else(|| "missing '=' in key predicate".to_string())?;
                let name = rest[..eq].trim();
                if name.is_empty() || !name.chars().all(is_name_char) {
                    return Err(format!("invalid key name '{}'", name));
                }

                rest = rest[eq + 1..].trim_start();
                let quote = match rest.chars().next() {
                    Some(q @ ('\'' | '"')) => q,
                    _ => return Err(format!("value of key '{}' must be quoted", name)),
                };
                rest = &rest[1..];
                let end = rest
                    .find(quote)
                    .ok_or_else(|| format!("unterminated value for key '{}'", name))?;
                let value = &rest[..end];
                rest = rest[end + 1..].trim_start();

                if keys.get(name).is_some() {
                    return Err(format!("duplicate key '{}'", name));
                }
                keys.insert(name, value);

                if let Some(r) = rest.strip_prefix(',') {
                    rest = r.trim_start();
                } else if let Some(r) = rest.strip_prefix(']') {
                    rest = r;
                    break;
                } else {
                    return Err(format!("expected ',' or ']' after key '{}'", name));
                }
            }
        }

        Ok(keys)
    }

    /// Check that every value can be rendered inside a quoted predicate.
    pub(crate) fn check_renderable(&self) -> Result<(), String> {
        for (name, value) in &self.entries {
            if name.is_empty() || !name.chars().all(is_name_char) {
                return Err(format!("invalid key name '{}'", name));
            }
            if value.contains('\'') && value.contains('"') {
                return Err(format!("value of key '{}' mixes both quote characters", name));
            }
        }
        Ok(())
    }
}

/// Characters allowed in node and key names (YANG identifiers plus module prefix).
pub(crate) fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

impl fmt::Display for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            if value.contains('\'') {
                write!(f, "[{}=\"{}\"]", name, value)?;
            } else {
                write!(f, "[{}='{}']", name, value)?;
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Keys {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut keys = Keys::new();
        for (k, v) in iter {
            keys.insert(k, v);
        }
        keys
    }
}
