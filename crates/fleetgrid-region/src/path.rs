//! Dotted region paths.

use std::fmt;
use std::str::FromStr;

use crate::error::{RegionError, RegionResult};

/// A parsed, validated region path. The empty path denotes the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionPath {
    segments: Vec<String>,
}

impl RegionPath {
    /// The root path (global placement).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path.
    ///
    /// `""` is the root. Leading, trailing, and consecutive dots are
    /// rejected with [`RegionError::InvalidPath`].
    pub fn parse(path: &str) -> RegionResult<Self> {
        if path.is_empty() {
            return Ok(Self::root());
        }

        let invalid = |reason| RegionError::InvalidPath {
            path: path.to_string(),
            reason,
        };

        if path.starts_with('.') {
            return Err(invalid("leading dot"));
        }
        if path.ends_with('.') {
            return Err(invalid("trailing dot"));
        }

        let mut segments = Vec::new();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The enclosing path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a single segment.
    pub fn child(&self, name: &str) -> RegionResult<Self> {
        if name.is_empty() || name.contains('.') {
            return Err(RegionError::InvalidPath {
                path: format!("{self}.{name}"),
                reason: "child name must be a single non-empty segment",
            });
        }
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// True when `other` equals this path or lies beneath it.
    pub fn contains(&self, other: &RegionPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Every prefix from the first segment down to the full path, root excluded.
    pub fn prefixes(&self) -> impl Iterator<Item = RegionPath> + '_ {
        (1..=self.segments.len()).map(|n| RegionPath {
            segments: self.segments[..n].to_vec(),
        })
    }
}

impl fmt::Display for RegionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for RegionPath {
    type Err = RegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_is_root() {
        let path = RegionPath::parse("").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "");
        assert_eq!(path.parent(), None);
    }

    #[test]
    fn parses_segments() {
        let path = RegionPath::parse("eu.west.cluster1").unwrap();
        assert_eq!(path.segments(), ["eu", "west", "cluster1"]);
        assert_eq!(path.depth(), 3);
        assert_eq!(path.to_string(), "eu.west.cluster1");
        assert_eq!(path.parent().unwrap().to_string(), "eu.west");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in [".", "..", ".eu", "eu.", "eu..west", "eu.west."] {
            let err = RegionPath::parse(bad).unwrap_err();
            assert!(
                matches!(err, RegionError::InvalidPath { .. }),
                "expected InvalidPath for {bad:?}"
            );
        }
    }

    #[test]
    fn reports_reason() {
        let err = RegionPath::parse(".eu").unwrap_err();
        assert_eq!(
            err,
            RegionError::InvalidPath {
                path: ".eu".to_string(),
                reason: "leading dot"
            }
        );
        let err = RegionPath::parse("eu..west").unwrap_err();
        assert!(err.to_string().contains("empty segment"));
    }

    #[test]
    fn containment_is_segment_wise() {
        let eu = RegionPath::parse("eu").unwrap();
        let eu_west = RegionPath::parse("eu.west").unwrap();
        let europa = RegionPath::parse("europa").unwrap();

        assert!(eu.contains(&eu));
        assert!(eu.contains(&eu_west));
        assert!(!eu_west.contains(&eu));
        assert!(!eu.contains(&europa));
        assert!(RegionPath::root().contains(&europa));
    }

    #[test]
    fn prefixes_walk_down_from_the_top() {
        let path = RegionPath::parse("eu.west.cluster1").unwrap();
        let prefixes: Vec<String> = path.prefixes().map(|p| p.to_string()).collect();
        assert_eq!(prefixes, ["eu", "eu.west", "eu.west.cluster1"]);
        assert_eq!(RegionPath::root().prefixes().count(), 0);
    }

    #[test]
    fn child_rejects_dotted_names() {
        let eu = RegionPath::parse("eu").unwrap();
        assert_eq!(eu.child("west").unwrap().to_string(), "eu.west");
        assert!(eu.child("a.b").is_err());
        assert!(eu.child("").is_err());
    }
}
