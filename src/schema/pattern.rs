// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed path patterns used by delegations to describe which target paths a delegated role is
//! trusted to provide.
//!
//! A `Pattern` is a `/`-separated sequence of segments, each of which is an exact literal, a
//! single-segment wildcard (`*`), or an any-depth wildcard (`**`). `**` may only appear as the
//! final segment, matching zero or more trailing path segments.

use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Exact(String),
    Wildcard,
    Globstar,
}

/// A compiled path pattern, as used in a delegation's `paths` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
    source: String,
}

impl Pattern {
    /// Parses `s` into a `Pattern`. Fails if `**` appears anywhere but the last segment.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "**" => {
                    ensure!(
                        i == parts.len() - 1,
                        error::InvalidPatternSnafu {
                            pattern: s.to_owned(),
                            reason: "'**' is only allowed as the final segment".to_owned(),
                        }
                    );
                    Segment::Globstar
                }
                "*" => Segment::Wildcard,
                literal => Segment::Exact(literal.to_owned()),
            };
            segments.push(segment);
        }
        Ok(Self {
            segments,
            source: s.to_owned(),
        })
    }

    /// Matches `path` against this pattern, returning the positional captures (the concrete
    /// value matched by each wildcard or globstar segment, in order) on success.
    pub fn matches(&self, path: &str) -> Option<Vec<String>> {
        let path_segments: Vec<&str> = path.split('/').collect();
        let mut captures = Vec::new();
        if Self::match_segments(&self.segments, &path_segments, &mut captures) {
            Some(captures)
        } else {
            None
        }
    }

    /// Returns `true` if `path` matches this pattern, discarding any captures.
    pub fn is_match(&self, path: &str) -> bool {
        self.matches(path).is_some()
    }

    fn match_segments(pattern: &[Segment], path: &[&str], captures: &mut Vec<String>) -> bool {
        match (pattern.first(), path.first()) {
            (None, None) => true,
            (None, Some(_)) | (Some(_), None) => false,
            (Some(Segment::Globstar), _) => {
                captures.push(path.join("/"));
                true
            }
            (Some(Segment::Wildcard), Some(head)) => {
                captures.push((*head).to_owned());
                Self::match_segments(&pattern[1..], &path[1..], captures)
            }
            (Some(Segment::Exact(expected)), Some(head)) => {
                expected == head && Self::match_segments(&pattern[1..], &path[1..], captures)
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Pattern {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Pattern::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_segments_match_only_themselves() {
        let p = Pattern::parse("package/foo.cabal").unwrap();
        assert!(p.is_match("package/foo.cabal"));
        assert!(!p.is_match("package/bar.cabal"));
        assert!(!p.is_match("package/foo.cabal/extra"));
    }

    #[test]
    fn single_wildcard_matches_one_segment_and_captures_it() {
        let p = Pattern::parse("package/*/foo.cabal").unwrap();
        let captures = p.matches("package/1.2.3/foo.cabal").unwrap();
        assert_eq!(captures, vec!["1.2.3".to_owned()]);
        assert!(!p.is_match("package/1.2.3/extra/foo.cabal"));
    }

    #[test]
    fn globstar_matches_any_depth() {
        let p = Pattern::parse("package/**").unwrap();
        assert!(p.is_match("package/foo.cabal"));
        assert!(p.is_match("package/1.2.3/foo.cabal"));
        assert_eq!(
            p.matches("package/1.2.3/foo.cabal").unwrap(),
            vec!["1.2.3/foo.cabal".to_owned()]
        );
    }

    #[test]
    fn globstar_must_be_final_segment() {
        assert!(Pattern::parse("**/foo").is_err());
        assert!(Pattern::parse("a/**/b").is_err());
    }
}
