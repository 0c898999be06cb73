//! Query key definitions.
//!
//! A `QueryKey` is an ordered tuple of segments such as
//! `["/api/series", "<id>", "chapters"]`. Keys double as filters: a key
//! matches every key it is a prefix of, so invalidating `["/api/series"]`
//! reaches every cached series resource.

use std::fmt;

/// Structured cache key: resource kind, optional id, optional sub-path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Build a key from any sequence of segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The empty key, which matches every entry.
    pub fn all() -> Self {
        Self(Vec::new())
    }

    /// A key naming a whole resource kind, e.g. `["/api/series"]`.
    pub fn resource(kind: impl Into<String>) -> Self {
        Self(vec![kind.into()])
    }

    /// Append one segment.
    #[must_use]
    pub fn with(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `self` is a prefix of `other` (every key matches itself).
    ///
    /// The empty key matches everything.
    pub fn matches(&self, other: &QueryKey) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, segment) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{segment:?}")?;
        }
        f.write_str("]")
    }
}

impl<const N: usize> From<[&str; N]> for QueryKey {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl From<Vec<String>> for QueryKey {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}
