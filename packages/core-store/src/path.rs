//! Absolute, schema-addressed paths with optional list-entry key predicates.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::keys::{is_name_char, Keys};

const SEPARATOR: char = '/';

/// Errors related to path parsing and path algebra.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path text is malformed.
    #[error("invalid path '{path}': {message}")]
    Invalid { path: String, message: String },

    /// The operation has no meaning on the root path.
    #[error("invalid operation on root path: {operation}")]
    Root { operation: &'static str },

    /// A named segment does not occur in the path.
    #[error("cannot find segment '{segment}' in path '{path}'")]
    SegmentNotFound { path: String, segment: String },
}

/// One step of a path: a node name plus the keys of a list entry, if any.
///
/// A parsed segment remembers its predicate text as written (quote style and
/// bracket grouping) and renders it back unchanged. Equality and hashing
/// only consider the name and keys.
#[derive(Clone, Debug)]
pub struct Segment {
    name: String,
    keys: Keys,
    written: Option<String>,
}

impl Segment {
    /// The node name without key predicates.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn is_keyed(&self) -> bool {
        !self.keys.is_empty()
    }

    /// The same segment with its key predicates stripped.
    pub fn unkeyed(&self) -> Segment {
        Segment {
            name: self.name.clone(),
            keys: Keys::new(),
            written: None,
        }
    }

    /// The segment with every key rendered as its own `[k='v']` predicate.
    fn canonical(&self) -> String {
        format!("{}{}", self.name, self.keys)
    }

    fn parse(text: &str) -> Result<Segment, String> {
        let (name, predicates) = match text.find('[') {
            Some(i) => (&text[..i], &text[i..]),
            None => (text, ""),
        };
        if name.is_empty() {
            return Err("empty segment".to_string());
        }
        if let Some(c) = name.chars().find(|c| !is_name_char(*c)) {
            return Err(format!("invalid character '{}' in segment '{}'", c, name));
        }
        let keys = Keys::parse_predicates(predicates)?;
        let written = (!keys.is_empty()).then(|| predicates.to_string());
        Ok(Segment {
            name: name.to_string(),
            keys,
            written,
        })
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.keys == other.keys
    }
}

impl Eq for Segment {}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.keys.hash(state);
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.written {
            Some(predicates) => write!(f, "{}{}", self.name, predicates),
            None => write!(f, "{}{}", self.name, self.keys),
        }
    }
}

/// An absolute location in the configuration tree.
///
/// A path always starts at the implicit root (`/`). Any segment may carry
/// key predicates identifying one entry of a list, for example
/// `/interfaces/interface[name='eth0']/config`.
///
/// Paths are immutable. They display as written, but equality, hashing and
/// ordering are defined on the canonical text form, where every key is
/// rendered as its own `[k='v']` predicate.
///
/// # Examples
///
/// ```rust
/// use devstore_core::Path;
///
/// let p = Path::parse("/interfaces/interface[name='eth0']/config").unwrap();
/// assert_eq!(p.depth(), 3);
/// assert_eq!(p.unkeyed().to_string(), "/interfaces/interface/config");
/// assert_eq!(p.keys_from_segment("interface").unwrap().get("name"), Some("eth0"));
/// ```
#[derive(Clone)]
pub struct Path {
    segments: Vec<Segment>,
    canonical: String,
    text: String,
}

impl Path {
    /// The root path `/`.
    pub fn root() -> Path {
        Path::from_segments(Vec::new())
    }

    /// Parse an absolute path.
    ///
    /// Separators inside key predicates are not treated as segment
    /// boundaries, so `/ifaces/iface[id='ethernet 0/1']` has two segments.
    pub fn parse(text: &str) -> Result<Path, PathError> {
        let invalid = |message: String| PathError::Invalid {
            path: text.to_string(),
            message,
        };

        let body = text
            .strip_prefix(SEPARATOR)
            .ok_or_else(|| invalid("not an absolute path".to_string()))?;
        if body.is_empty() {
            return Ok(Path::root());
        }

        let segments = split_segments(body)
            .map_err(invalid)?
            .into_iter()
            .map(Segment::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;

        Ok(Path::from_segments(segments))
    }

    fn from_segments(segments: Vec<Segment>) -> Path {
        let render = |segment: fn(&Segment) -> String| -> String {
            if segments.is_empty() {
                SEPARATOR.to_string()
            } else {
                segments
                    .iter()
                    .map(|s| format!("{}{}", SEPARATOR, segment(s)))
                    .collect()
            }
        };
        let canonical = render(Segment::canonical);
        let text = render(|s| s.to_string());
        Path {
            segments,
            canonical,
            text,
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The segments of this path; empty at the root.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The canonical text form.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// This path with every key predicate removed.
    pub fn unkeyed(&self) -> Path {
        Path::from_segments(self.segments.iter().map(Segment::unkeyed).collect())
    }

    pub fn is_keyed(&self) -> bool {
        self.segments.iter().any(Segment::is_keyed)
    }

    pub fn last_segment(&self) -> Result<&Segment, PathError> {
        self.segments.last().ok_or(PathError::Root {
            operation: "last segment",
        })
    }

    /// Number of segments, ignoring keys.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Name of the module root this path addresses (its first segment).
    pub fn module_name(&self) -> Option<&str> {
        self.segments.first().map(Segment::name)
    }

    /// True iff `other`'s unkeyed segments are a prefix of this path's.
    ///
    /// A path is a child of itself; the root is a child only of the root.
    pub fn is_child_of(&self, other: &Path) -> bool {
        other.depth() <= self.depth()
            && other
                .segments
                .iter()
                .zip(&self.segments)
                .all(|(a, b)| a.name == b.name)
    }

    pub fn parent(&self) -> Result<Path, PathError> {
        if self.is_root() {
            return Err(PathError::Root {
                operation: "parent",
            });
        }
        Ok(self.ancestor_at_depth(self.depth() - 1))
    }

    /// Append one segment. The segment text may carry key predicates.
    pub fn child(&self, segment: &str) -> Result<Path, PathError> {
        let segment = Segment::parse(segment).map_err(|message| PathError::Invalid {
            path: format!("{}{}{}", self.prefix(), SEPARATOR, segment),
            message,
        })?;
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Path::from_segments(segments))
    }

    /// Attach list-entry keys to the last segment.
    ///
    /// Fails at the root, on an empty key set, and if the last segment is
    /// already keyed.
    pub fn add_keys(&self, keys: &Keys) -> Result<Path, PathError> {
        let last = self.segments.last().ok_or(PathError::Root {
            operation: "add keys",
        })?;
        let invalid = |message: String| PathError::Invalid {
            path: self.canonical.clone(),
            message,
        };
        if keys.is_empty() {
            return Err(invalid("unable to add empty keys".to_string()));
        }
        if last.is_keyed() {
            return Err(invalid("last segment already has keys".to_string()));
        }
        keys.check_renderable().map_err(invalid)?;

        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            last.keys = keys.clone();
            last.written = None;
        }
        Ok(Path::from_segments(segments))
    }

    /// Keys of the last segment (empty if it is not keyed).
    pub fn keys(&self) -> Result<Keys, PathError> {
        self.last_segment().map(|s| s.keys.clone())
    }

    /// Keys carried by the first segment named `name`.
    pub fn keys_from_segment(&self, name: &str) -> Result<Keys, PathError> {
        if self.is_root() {
            return Err(PathError::Root {
                operation: "keys from segment",
            });
        }
        self.segments
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.keys.clone())
            .ok_or_else(|| PathError::SegmentNotFound {
                path: self.canonical.clone(),
                segment: name.to_string(),
            })
    }

    /// Difference in depth between two paths.
    pub fn segment_distance(&self, other: &Path) -> usize {
        self.depth().abs_diff(other.depth())
    }

    /// The ancestor of this path at `depth`, keeping key predicates.
    ///
    /// Returns the path itself if it is not deeper than `depth`.
    pub fn ancestor_at_depth(&self, depth: usize) -> Path {
        if depth >= self.depth() {
            return self.clone();
        }
        Path::from_segments(self.segments[..depth].to_vec())
    }

    fn prefix(&self) -> &str {
        if self.is_root() {
            ""
        } else {
            &self.canonical
        }
    }
}

/// Split the text after the leading separator, ignoring separators inside
/// bracketed predicates and quoted key values.
fn split_segments(body: &str) -> Result<Vec<&str>, String> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (i, c) in body.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' if depth > 0 => quote = Some(c),
                '[' => depth += 1,
                ']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| "unbalanced ']'".to_string())?
                }
                SEPARATOR if depth == 0 => {
                    segments.push(&body[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }

    if quote.is_some() || depth > 0 {
        return Err("unterminated key predicate".to_string());
    }
    segments.push(&body[start..]);
    Ok(segments)
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self.text)
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl TryFrom<&str> for Path {
    type Error = PathError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Path::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Path::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Macro for creating paths from literals.
///
/// # Example
///
/// ```rust
/// use devstore_core::path;
///
/// let p = path!("/interfaces/interface[name='eth0']");
/// assert_eq!(p.depth(), 2);
/// ```
#[macro_export]
macro_rules! path {
    ($s:expr) => {
        $crate::Path::parse($s).expect("invalid path literal")
    };
}
