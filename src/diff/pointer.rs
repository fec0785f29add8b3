//! Pointer paths into a state tree (RFC 6901 string form)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One step of a pointer path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathKey {
    /// Object member name
    Key(String),
    /// Array position
    Index(usize),
}

impl PathKey {
    /// Segment-level equality that ignores whether a segment was parsed as a
    /// key or produced as an index (`Index(3)` matches `Key("3")`).
    pub fn matches(&self, other: &PathKey) -> bool {
        match (self, other) {
            (PathKey::Key(a), PathKey::Key(b)) => a == b,
            (PathKey::Index(a), PathKey::Index(b)) => a == b,
            (PathKey::Index(i), PathKey::Key(k)) | (PathKey::Key(k), PathKey::Index(i)) => {
                k.parse::<usize>().map(|n| n == *i).unwrap_or(false)
            }
        }
    }

    /// Object key form of this segment
    pub fn as_key(&self) -> String {
        match self {
            PathKey::Key(k) => k.clone(),
            PathKey::Index(i) => i.to_string(),
        }
    }
}

impl From<&str> for PathKey {
    fn from(key: &str) -> Self {
        PathKey::Key(key.to_string())
    }
}

impl From<String> for PathKey {
    fn from(key: String) -> Self {
        PathKey::Key(key)
    }
}

impl From<usize> for PathKey {
    fn from(index: usize) -> Self {
        PathKey::Index(index)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Key(k) => write!(f, "{}", k.replace('~', "~0").replace('/', "~1")),
            PathKey::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Location of a value inside a state tree. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PointerPath {
    segments: Vec<PathKey>,
}

impl PointerPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<PathKey>) -> Self {
        Self { segments }
    }

    /// Parse an RFC 6901 pointer such as `/units/0/position`
    pub fn parse(pointer: &str) -> Result<Self, PointerError> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let rest = pointer
            .strip_prefix('/')
            .ok_or_else(|| PointerError::MissingLeadingSlash(pointer.to_string()))?;

        let segments = rest
            .split('/')
            .map(|raw| PathKey::Key(raw.replace("~1", "/").replace("~0", "~")))
            .collect();

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathKey] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// New path with one more segment
    pub fn child(&self, key: impl Into<PathKey>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(key.into());
        Self { segments }
    }

    /// Split into parent path and last segment; `None` for the root
    pub fn split_last(&self) -> Option<(&[PathKey], &PathKey)> {
        self.segments
            .split_last()
            .map(|(last, parent)| (parent, last))
    }

    /// Segment-wise prefix check: `/units` is a prefix of `/units/3/hp`
    /// but not of `/units_extra`.
    pub fn starts_with(&self, prefix: &PointerPath) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix
                .segments
                .iter()
                .zip(&self.segments)
                .all(|(a, b)| a.matches(b))
    }
}

impl fmt::Display for PointerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for PointerPath {
    type Err = PointerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PointerPath {
    type Error = PointerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PointerPath> for String {
    fn from(path: PointerPath) -> Self {
        path.to_string()
    }
}

/// Pointer parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PointerError {
    #[error("JSON pointer must start with '/': {0:?}")]
    MissingLeadingSlash(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_escapes() {
        let path = PointerPath::parse("/a~1b/c~0d/0").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathKey::Key("a/b".into()),
                PathKey::Key("c~d".into()),
                PathKey::Key("0".into())
            ]
        );
        assert_eq!(path.to_string(), "/a~1b/c~0d/0");
        assert!(PointerPath::parse("").unwrap().is_root());
        assert!(PointerPath::parse("units").is_err());
    }

    #[test]
    fn prefix_matching_is_segment_wise() {
        let units = PointerPath::parse("/units").unwrap();
        let hp = PointerPath::root().child("units").child(3usize).child("hp");
        assert!(hp.starts_with(&units));
        assert!(hp.starts_with(&PointerPath::parse("/units/3").unwrap()));
        assert!(!PointerPath::parse("/units_extra").unwrap().starts_with(&units));
        assert!(hp.starts_with(&PointerPath::root()));
    }

    #[test]
    fn serde_uses_pointer_strings() {
        let path = PointerPath::root().child("tiles").child(2usize);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/tiles/2\"");
        let back: PointerPath = serde_json::from_str(&json).unwrap();
        assert!(back.starts_with(&path) && path.starts_with(&back));
    }
}
