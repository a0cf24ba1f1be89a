// src/spec/variant.rs

//! Variant values and their constraint semantics
//!
//! A variant is a named build option. Boolean variants are written `+name`
//! or `~name`; valued variants are written `name=value`, and multi-valued
//! variants accept a comma separated list (`name=a,b`). In an abstract spec a
//! multi-valued constraint means "contains at least these values".

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The value (or constraint on the value) of one variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
    Bool(bool),
    Single(String),
    Multi(BTreeSet<String>),
}

impl VariantValue {
    /// Interpret the right-hand side of `name=value`
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("true") {
            return VariantValue::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return VariantValue::Bool(false);
        }
        if raw.contains(',') {
            return VariantValue::Multi(
                raw.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        VariantValue::Single(raw.to_string())
    }

    /// Build a set value from any collection of strings
    pub fn multi<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        VariantValue::Multi(values.into_iter().map(Into::into).collect())
    }

    /// Every string value carried, in sorted order (empty for booleans)
    pub fn values(&self) -> Vec<&str> {
        match self {
            VariantValue::Bool(_) => Vec::new(),
            VariantValue::Single(v) => vec![v.as_str()],
            VariantValue::Multi(set) => set.iter().map(String::as_str).collect(),
        }
    }

    /// Re-express a single value as a one-element set
    pub fn into_multi(self) -> Self {
        match self {
            VariantValue::Single(v) => VariantValue::Multi(BTreeSet::from([v])),
            other => other,
        }
    }

    /// Merge two abstract constraints, or `None` if they contradict
    pub fn intersect(&self, other: &VariantValue) -> Option<VariantValue> {
        match (self, other) {
            (VariantValue::Bool(a), VariantValue::Bool(b)) => {
                (a == b).then(|| VariantValue::Bool(*a))
            }
            (VariantValue::Single(a), VariantValue::Single(b)) => {
                (a == b).then(|| VariantValue::Single(a.clone()))
            }
            (VariantValue::Multi(a), VariantValue::Multi(b)) => {
                Some(VariantValue::Multi(a.union(b).cloned().collect()))
            }
            (VariantValue::Single(a), VariantValue::Multi(set))
            | (VariantValue::Multi(set), VariantValue::Single(a)) => {
                let mut merged = set.clone();
                merged.insert(a.clone());
                Some(VariantValue::Multi(merged))
            }
            _ => None,
        }
    }

    /// Check whether a concrete value meets this constraint
    pub fn satisfied_by(&self, concrete: &VariantValue) -> bool {
        match (self, concrete) {
            (VariantValue::Bool(a), VariantValue::Bool(b)) => a == b,
            (VariantValue::Single(a), VariantValue::Single(b)) => a == b,
            (VariantValue::Single(a), VariantValue::Multi(set)) => set.contains(a),
            (VariantValue::Multi(wanted), VariantValue::Multi(set)) => wanted.is_subset(set),
            (VariantValue::Multi(wanted), VariantValue::Single(b)) => {
                wanted.iter().all(|w| w == b)
            }
            _ => false,
        }
    }

    /// Render as it appears in a spec string for the given variant name
    pub fn format_with_name(&self, name: &str) -> String {
        match self {
            VariantValue::Bool(true) => format!("+{}", name),
            VariantValue::Bool(false) => format!("~{}", name),
            _ => format!("{}={}", name, self),
        }
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantValue::Bool(b) => write!(f, "{}", b),
            VariantValue::Single(v) => write!(f, "{}", v),
            VariantValue::Multi(set) => {
                let joined: Vec<&str> = set.iter().map(String::as_str).collect();
                write!(f, "{}", joined.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        assert_eq!(VariantValue::parse("true"), VariantValue::Bool(true));
        assert_eq!(VariantValue::parse("False"), VariantValue::Bool(false));
        assert_eq!(
            VariantValue::parse("release"),
            VariantValue::Single("release".to_string())
        );
        assert_eq!(VariantValue::parse("b,a"), VariantValue::multi(["a", "b"]));
    }

    #[test]
    fn test_bool_intersection() {
        let on = VariantValue::Bool(true);
        let off = VariantValue::Bool(false);
        assert_eq!(on.intersect(&on), Some(on.clone()));
        assert_eq!(on.intersect(&off), None);
        assert_eq!(on.intersect(&VariantValue::Single("x".into())), None);
    }

    #[test]
    fn test_multi_intersection_unions() {
        let a = VariantValue::multi(["cuda"]);
        let b = VariantValue::Single("rocm".to_string());
        assert_eq!(a.intersect(&b), Some(VariantValue::multi(["cuda", "rocm"])));
    }

    #[test]
    fn test_satisfied_by() {
        let concrete = VariantValue::multi(["cuda", "openmp"]);
        assert!(VariantValue::Single("cuda".into()).satisfied_by(&concrete));
        assert!(VariantValue::multi(["openmp"]).satisfied_by(&concrete));
        assert!(!VariantValue::multi(["rocm"]).satisfied_by(&concrete));
        assert!(!VariantValue::Bool(true).satisfied_by(&concrete));
        assert!(VariantValue::multi(["x"]).satisfied_by(&VariantValue::Single("x".into())));
    }

    #[test]
    fn test_format_with_name() {
        assert_eq!(VariantValue::Bool(true).format_with_name("shared"), "+shared");
        assert_eq!(VariantValue::Bool(false).format_with_name("shared"), "~shared");
        assert_eq!(
            VariantValue::multi(["b", "a"]).format_with_name("backends"),
            "backends=a,b"
        );
    }

    #[test]
    fn test_serde_untagged() {
        let json = serde_json::to_string(&VariantValue::multi(["a", "b"])).unwrap();
        assert_eq!(json, "[\"a\",\"b\"]");
        let back: VariantValue = serde_json::from_str("true").unwrap();
        assert_eq!(back, VariantValue::Bool(true));
        let back: VariantValue = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(back, VariantValue::Single("x".to_string()));
    }
}
