// src/version/mod.rs

//! Version handling and constraint satisfaction for package specs
//!
//! Versions are sequences of numeric and alphabetic components separated by
//! `.`, `-` or `_`. Numeric components compare numerically and sort above
//! alphabetic ones. A handful of branch names (`develop`, `main`, `master`,
//! `head`, `trunk`) compare newer than any numbered release.
//!
//! A [`VersionConstraint`] is a union of inclusive [`VersionRange`]s. The
//! upper bound of a range also admits every version that extends it, so
//! `@1.2` matches `1.2`, `1.2.0` and `1.2.9`, and `@:1.5` matches `1.5.3`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Branch names that sort above every numbered release, lowest first
const INFINITY_NAMES: [&str; 5] = ["trunk", "head", "master", "main", "develop"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Component {
    Alpha(String),
    Numeric(u64),
    Infinity(usize),
}

/// A parsed package version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    text: String,
    components: Vec<Component>,
}

impl Version {
    /// Parse a version string such as `1.2.3`, `2.0rc1` or `develop`
    pub fn parse(s: &str) -> Result<Self> {
        let text = s.trim();
        if text.is_empty() {
            return Err(Error::ParseError("empty version".to_string()));
        }

        let mut components = Vec::new();
        let mut current = String::new();

        let flush = |current: &mut String, components: &mut Vec<Component>| -> Result<()> {
            if current.is_empty() {
                return Ok(());
            }
            let component = if current.chars().all(|c| c.is_ascii_digit()) {
                let value = current.parse::<u64>().map_err(|e| {
                    Error::ParseError(format!("invalid version component '{}': {}", current, e))
                })?;
                Component::Numeric(value)
            } else {
                let lower = current.to_ascii_lowercase();
                match INFINITY_NAMES.iter().position(|name| *name == lower) {
                    Some(rank) => Component::Infinity(rank),
                    None => Component::Alpha(current.clone()),
                }
            };
            components.push(component);
            current.clear();
            Ok(())
        };

        for c in text.chars() {
            match c {
                '.' | '-' | '_' => flush(&mut current, &mut components)?,
                c if c.is_ascii_alphanumeric() => {
                    // Split on transitions between digits and letters: 2.0rc1 -> 2, 0, rc, 1
                    let switch = current
                        .chars()
                        .last()
                        .is_some_and(|last| last.is_ascii_digit() != c.is_ascii_digit());
                    if switch {
                        flush(&mut current, &mut components)?;
                    }
                    current.push(c);
                }
                _ => {
                    return Err(Error::ParseError(format!(
                        "invalid character '{}' in version '{}'",
                        c, text
                    )));
                }
            }
        }
        flush(&mut current, &mut components)?;

        if components.is_empty() {
            return Err(Error::ParseError(format!("empty version '{}'", text)));
        }

        Ok(Self {
            text: text.to_string(),
            components,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True if every component of `prefix` leads this version
    pub fn starts_with(&self, prefix: &Version) -> bool {
        self.components.starts_with(&prefix.components)
    }

    /// True for branch versions such as `develop` that are never picked by
    /// default while a numbered release is available
    pub fn is_infinity(&self) -> bool {
        self.components
            .iter()
            .any(|c| matches!(c, Component::Infinity(_)))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.text
    }
}

/// Intersection of two prefix-inclusive upper bounds
fn min_upper<'a>(a: &'a Version, b: &'a Version) -> &'a Version {
    if a.starts_with(b) {
        a
    } else if b.starts_with(a) {
        b
    } else {
        a.min(b)
    }
}

/// An inclusive version range; `None` bounds are open
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub lo: Option<Version>,
    pub hi: Option<Version>,
}

impl VersionRange {
    pub fn new(lo: Option<Version>, hi: Option<Version>) -> Self {
        Self { lo, hi }
    }

    /// The range `v:v`, which matches `v` and every version extending it
    pub fn exact(v: Version) -> Self {
        Self {
            lo: Some(v.clone()),
            hi: Some(v),
        }
    }

    /// Parse `1.2`, `1.0:1.5`, `1.0:` or `:1.5`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let range = match s.split_once(':') {
            Some((lo, hi)) => {
                let lo = lo.trim();
                let hi = hi.trim();
                Self {
                    lo: if lo.is_empty() { None } else { Some(Version::parse(lo)?) },
                    hi: if hi.is_empty() { None } else { Some(Version::parse(hi)?) },
                }
            }
            None => Self::exact(Version::parse(s)?),
        };

        if range.is_empty() {
            return Err(Error::ParseError(format!("empty version range '{}'", s)));
        }
        Ok(range)
    }

    pub fn is_any(&self) -> bool {
        self.lo.is_none() && self.hi.is_none()
    }

    fn is_empty(&self) -> bool {
        match (&self.lo, &self.hi) {
            (Some(lo), Some(hi)) => lo > hi && !lo.starts_with(hi),
            _ => false,
        }
    }

    /// Check if a version falls inside this range
    pub fn contains(&self, version: &Version) -> bool {
        let above = self.lo.as_ref().is_none_or(|lo| version >= lo);
        let below = self
            .hi
            .as_ref()
            .is_none_or(|hi| version <= hi || version.starts_with(hi));
        above && below
    }

    /// The overlap of two ranges, or `None` if they are disjoint
    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        let lo = match (&self.lo, &other.lo) {
            (Some(a), Some(b)) => Some(a.max(b).clone()),
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };
        let hi = match (&self.hi, &other.hi) {
            (Some(a), Some(b)) => Some(min_upper(a, b).clone()),
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };
        let range = VersionRange { lo, hi };
        if range.is_empty() { None } else { Some(range) }
    }

    /// True if every version in this range is also in `other`
    pub fn is_subset_of(&self, other: &VersionRange) -> bool {
        let lower = match (&self.lo, &other.lo) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(b)) => a >= b,
        };
        let upper = match (&self.hi, &other.hi) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(b)) => a.starts_with(b) || (a < b && !b.starts_with(a)),
        };
        lower && upper
    }

    /// The single version this range pins, if its bounds coincide
    pub fn as_exact(&self) -> Option<&Version> {
        match (&self.lo, &self.hi) {
            (Some(lo), Some(hi)) if lo == hi => Some(lo),
            _ => None,
        }
    }

    fn sort_key_cmp(&self, other: &Self) -> Ordering {
        let lo = match (&self.lo, &other.lo) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        };
        lo.then_with(|| match (&self.hi, &other.hi) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = self.as_exact() {
            return write!(f, "{}", v);
        }
        if let Some(lo) = &self.lo {
            write!(f, "{}", lo)?;
        }
        write!(f, ":")?;
        if let Some(hi) = &self.hi {
            write!(f, "{}", hi)?;
        }
        Ok(())
    }
}

/// Version constraint: any version, or a union of ranges
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum VersionConstraint {
    /// Any version is acceptable
    #[default]
    Any,
    /// At least one of these ranges must contain the version (never empty)
    Ranges(Vec<VersionRange>),
}

impl VersionConstraint {
    /// Parse a version constraint string
    ///
    /// Examples:
    /// - "1.2" → 1.2 and every 1.2.x
    /// - "1.0:1.5" → 1.0 through 1.5.x
    /// - "2.0:" → 2.0 or newer
    /// - "1.0,2.0:2.4" → union of the two
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" || s == ":" {
            return Ok(VersionConstraint::Any);
        }

        let mut ranges = Vec::new();
        for part in s.split(',') {
            let range = VersionRange::parse(part)?;
            if range.is_any() {
                return Ok(VersionConstraint::Any);
            }
            ranges.push(range);
        }
        Ok(Self::from_ranges(ranges))
    }

    /// Constraint matching exactly one version and its extensions
    pub fn exact(version: Version) -> Self {
        VersionConstraint::Ranges(vec![VersionRange::exact(version)])
    }

    fn from_ranges(mut ranges: Vec<VersionRange>) -> Self {
        ranges.sort_by(|a, b| a.sort_key_cmp(b));
        ranges.dedup();
        VersionConstraint::Ranges(ranges)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, VersionConstraint::Any)
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Ranges(ranges) => ranges.iter().any(|r| r.contains(version)),
        }
    }

    /// Intersect two constraints, or `None` if no version can satisfy both
    pub fn intersect(&self, other: &VersionConstraint) -> Option<VersionConstraint> {
        match (self, other) {
            (VersionConstraint::Any, c) | (c, VersionConstraint::Any) => Some(c.clone()),
            (VersionConstraint::Ranges(left), VersionConstraint::Ranges(right)) => {
                let ranges: Vec<VersionRange> = left
                    .iter()
                    .flat_map(|a| right.iter().filter_map(move |b| a.intersect(b)))
                    .collect();
                if ranges.is_empty() {
                    None
                } else {
                    Some(Self::from_ranges(ranges))
                }
            }
        }
    }

    /// True if every version admitted here is admitted by `other`
    ///
    /// Conservative for unions: a range covered only jointly by several of
    /// `other`'s ranges is reported as not contained.
    pub fn is_subset_of(&self, other: &VersionConstraint) -> bool {
        match (self, other) {
            (_, VersionConstraint::Any) => true,
            (VersionConstraint::Any, VersionConstraint::Ranges(_)) => false,
            (VersionConstraint::Ranges(mine), VersionConstraint::Ranges(theirs)) => mine
                .iter()
                .all(|r| theirs.iter().any(|o| r.is_subset_of(o))),
        }
    }

    /// True if the two constraints share at least one version
    pub fn is_compatible_with(&self, other: &VersionConstraint) -> bool {
        self.intersect(other).is_some()
    }

    /// The single version this constraint pins, if any
    pub fn concrete(&self) -> Option<&Version> {
        match self {
            VersionConstraint::Ranges(ranges) if ranges.len() == 1 => ranges[0].as_exact(),
            _ => None,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, ":"),
            VersionConstraint::Ranges(ranges) => {
                for (i, range) in ranges.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", range)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn c(s: &str) -> VersionConstraint {
        VersionConstraint::parse(s).unwrap()
    }

    #[test]
    fn test_version_compare_numeric() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("1.2.4") > v("1.2.3"));
        assert!(v("2.0") > v("1.99.99"));
    }

    #[test]
    fn test_version_prefix_is_older() {
        assert!(v("1.2") < v("1.2.0"));
        assert!(v("1.2") < v("1.2.1"));
        assert!(v("1.2").starts_with(&v("1")));
        assert!(!v("1.20").starts_with(&v("1.2")));
    }

    #[test]
    fn test_version_alpha_below_numeric() {
        assert!(v("1.2a") < v("1.2.0"));
        assert!(v("2.0rc1") < v("2.0.1"));
        assert_eq!(v("2.0rc1").components.len(), 4);
    }

    #[test]
    fn test_version_infinity_names() {
        assert!(v("develop") > v("999.0"));
        assert!(v("main") > v("999.0"));
        assert!(v("develop") > v("main"));
        assert!(v("develop").is_infinity());
        assert!(!v("1.0").is_infinity());
    }

    #[test]
    fn test_version_separators_equal() {
        assert_eq!(v("1.2.3"), v("1-2_3"));
        assert_eq!(v("1.2.3").to_string(), "1.2.3");
    }

    #[test]
    fn test_version_parse_errors() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.2@3").is_err());
        assert!(Version::parse("...").is_err());
    }

    #[test]
    fn test_exact_constraint_matches_extensions() {
        let constraint = c("1.2");
        assert!(constraint.satisfies(&v("1.2")));
        assert!(constraint.satisfies(&v("1.2.9")));
        assert!(!constraint.satisfies(&v("1.20")));
        assert!(!constraint.satisfies(&v("1.3")));
        assert_eq!(constraint.concrete(), Some(&v("1.2")));
    }

    #[test]
    fn test_range_constraint() {
        let constraint = c("1.0:1.5");
        assert!(constraint.satisfies(&v("1.0")));
        assert!(constraint.satisfies(&v("1.5.3")));
        assert!(!constraint.satisfies(&v("2.0")));
        assert!(!constraint.satisfies(&v("0.9")));

        assert!(c("2.0:").satisfies(&v("develop")));
        assert!(c(":1.5").satisfies(&v("0.1")));
    }

    #[test]
    fn test_constraint_list() {
        let constraint = c("1.0,2.0:2.4");
        assert!(constraint.satisfies(&v("1.0.1")));
        assert!(constraint.satisfies(&v("2.3")));
        assert!(!constraint.satisfies(&v("1.5")));
        assert_eq!(constraint.to_string(), "1.0,2.0:2.4");
    }

    #[test]
    fn test_constraint_any() {
        assert!(c("").is_any());
        assert!(c(":").is_any());
        assert!(c("*").satisfies(&v("99.99.99")));
        assert!(c("1.0,:").is_any());
    }

    #[test]
    fn test_intersect_disjoint() {
        assert_eq!(c("2.0").intersect(&c("1.0:1.5")), None);
        assert!(!c("2.0").is_compatible_with(&c("1.0:1.5")));
    }

    #[test]
    fn test_intersect_prefix_upper_bound() {
        // :2 admits 2.1, so the longer bound wins
        assert_eq!(c(":2").intersect(&c(":2.1")).unwrap().to_string(), ":2.1");
        assert_eq!(c("1.0:").intersect(&c(":1.5")).unwrap().to_string(), "1.0:1.5");
        assert_eq!(c("1.2").intersect(&c("1.2.3")).unwrap().to_string(), "1.2.3");
    }

    #[test]
    fn test_intersect_lists() {
        let result = c("1.0,2.0:2.4").intersect(&c("2.2:")).unwrap();
        assert_eq!(result.to_string(), "2.2:2.4");
        assert!(c("1.0:1.5").intersect(&VersionConstraint::Any).is_some());
    }

    #[test]
    fn test_subset() {
        assert!(c("1.5").is_subset_of(&c("1.5")));
        assert!(c("1.5.2").is_subset_of(&c("1.0:1.5")));
        assert!(c("1.2:1.4").is_subset_of(&c("1:")));
        // :1 admits 1.9, which :1.5 does not
        assert!(!c(":1").is_subset_of(&c(":1.5")));
        assert!(!VersionConstraint::Any.is_subset_of(&c("1.0")));
        assert!(c("1.0,2.0").is_subset_of(&VersionConstraint::Any));
    }

    #[test]
    fn test_empty_range_rejected() {
        assert!(VersionConstraint::parse("2.0:1.0").is_err());
        // lo extends hi, so 1.5.2 still fits under :1.5
        assert!(VersionConstraint::parse("1.5.2:1.5").is_ok());
    }

    #[test]
    fn test_version_serde_as_string() {
        let json = serde_json::to_string(&v("1.2.3")).unwrap();
        assert_eq!(json, "\"1.2.3\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.2.3"));
        assert!(serde_json::from_str::<Version>("\"1.2@\"").is_err());
    }
}
