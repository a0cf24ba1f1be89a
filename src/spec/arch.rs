// src/spec/arch.rs

//! Architecture triples: platform, operating system and target
//!
//! A target constraint is either one microarchitecture or a range over a
//! family, `lo:`, `:hi` or `lo:hi`. `x86_64:` means x86_64 or anything that
//! descends from it, so `haswell` and `zen2` satisfy it but `aarch64` does
//! not. Targets missing from the family table only match themselves.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A concrete `platform-os-target` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Arch {
    pub platform: String,
    pub os: String,
    pub target: String,
}

impl Arch {
    pub fn new(
        platform: impl Into<String>,
        os: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            os: os.into(),
            target: target.into(),
        }
    }

    /// Parse `linux-ubuntu22.04-x86_64`; no part may be a wildcard
    pub fn parse(s: &str) -> Result<Self> {
        let constraint = ArchConstraint::parse_triple(s)?;
        match (constraint.platform, constraint.os, constraint.target) {
            (Some(platform), Some(os), Some(TargetConstraint::Exact(target))) => {
                Ok(Self::new(platform, os, target))
            }
            _ => Err(Error::ParseError(format!(
                "architecture '{}' must not contain wildcards or ranges",
                s
            ))),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.platform, self.os, self.target)
    }
}

/// Which part of an architecture two constraints disagree on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchField {
    Platform,
    Os,
    Target,
}

impl fmt::Display for ArchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchField::Platform => write!(f, "platform"),
            ArchField::Os => write!(f, "os"),
            ArchField::Target => write!(f, "target"),
        }
    }
}

/// Microarchitectures and the target each one descends from
const TARGET_PARENTS: &[(&str, &str)] = &[
    ("x86_64_v2", "x86_64"),
    ("x86_64_v3", "x86_64_v2"),
    ("x86_64_v4", "x86_64_v3"),
    ("nocona", "x86_64"),
    ("core2", "nocona"),
    ("nehalem", "core2"),
    ("westmere", "nehalem"),
    ("sandybridge", "westmere"),
    ("ivybridge", "sandybridge"),
    ("haswell", "ivybridge"),
    ("broadwell", "haswell"),
    ("skylake", "broadwell"),
    ("skylake_avx512", "skylake"),
    ("cascadelake", "skylake_avx512"),
    ("icelake", "cascadelake"),
    ("sapphirerapids", "icelake"),
    ("k10", "x86_64"),
    ("bulldozer", "k10"),
    ("piledriver", "bulldozer"),
    ("zen", "x86_64"),
    ("zen2", "zen"),
    ("zen3", "zen2"),
    ("zen4", "zen3"),
    ("neoverse_n1", "aarch64"),
    ("neoverse_v1", "neoverse_n1"),
    ("neoverse_v2", "neoverse_v1"),
    ("a64fx", "aarch64"),
    ("m1", "aarch64"),
    ("m2", "m1"),
    ("power8le", "ppc64le"),
    ("power9le", "power8le"),
    ("power10le", "power9le"),
];

fn parent_target(target: &str) -> Option<&'static str> {
    TARGET_PARENTS
        .iter()
        .find(|(name, _)| *name == target)
        .map(|(_, parent)| *parent)
}

/// Whether `target` is `ancestor` or descends from it
pub fn descends_from(target: &str, ancestor: &str) -> bool {
    let mut current = Some(target);
    while let Some(name) = current {
        if name == ancestor {
            return true;
        }
        current = parent_target(name);
    }
    false
}

/// The more specific of two targets on one line of descent
fn newer<'a>(a: &'a str, b: &'a str) -> Option<&'a str> {
    if descends_from(a, b) {
        Some(a)
    } else if descends_from(b, a) {
        Some(b)
    } else {
        None
    }
}

/// The more generic of two targets on one line of descent
fn older<'a>(a: &'a str, b: &'a str) -> Option<&'a str> {
    newer(a, b).map(|n| if n == a { b } else { a })
}

/// One target or a range of them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetConstraint {
    Exact(String),
    /// Both ends inclusive; at least one is set
    Range { lo: Option<String>, hi: Option<String> },
}

impl TargetConstraint {
    /// Parse `name`, `lo:`, `:hi` or `lo:hi`; `None` for a wildcard
    pub fn parse(s: &str) -> Result<Option<Self>> {
        let s = s.trim();
        let Some((lo, hi)) = s.split_once(':') else {
            return Ok(wildcard(s).map(Self::Exact));
        };
        let bad = |why: &str| Error::ParseError(format!("invalid target range '{}': {}", s, why));
        if hi.contains(':') {
            return Err(bad("more than one ':'"));
        }
        let lo = wildcard(lo);
        let hi = wildcard(hi);
        match (lo, hi) {
            (None, None) => Ok(None),
            (Some(lo), Some(hi)) if lo == hi => Ok(Some(Self::Exact(lo))),
            (Some(lo), Some(hi)) if !descends_from(&hi, &lo) => {
                Err(bad(&format!("{} does not descend from {}", hi, lo)))
            }
            (lo, hi) => Ok(Some(Self::Range { lo, hi })),
        }
    }

    pub fn contains(&self, target: &str) -> bool {
        match self {
            Self::Exact(name) => name == target,
            Self::Range { lo, hi } => {
                lo.as_deref().is_none_or(|lo| descends_from(target, lo))
                    && hi.as_deref().is_none_or(|hi| descends_from(hi, target))
            }
        }
    }

    /// Targets in both; `None` when they share none
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Exact(a), b) | (b, Self::Exact(a)) => {
                b.contains(a).then(|| Self::Exact(a.clone()))
            }
            (Self::Range { lo: lo_a, hi: hi_a }, Self::Range { lo: lo_b, hi: hi_b }) => {
                let lo = match (lo_a, lo_b) {
                    (Some(a), Some(b)) => Some(newer(a, b)?.to_string()),
                    (a, b) => a.clone().or_else(|| b.clone()),
                };
                let hi = match (hi_a, hi_b) {
                    (Some(a), Some(b)) => Some(older(a, b)?.to_string()),
                    (a, b) => a.clone().or_else(|| b.clone()),
                };
                match (lo, hi) {
                    (Some(lo), Some(hi)) if lo == hi => Some(Self::Exact(lo)),
                    (Some(lo), Some(hi)) if !descends_from(&hi, &lo) => None,
                    (lo, hi) => Some(Self::Range { lo, hi }),
                }
            }
        }
    }

    /// Whether every target in `self` is also in `other`
    pub fn is_subset_of(&self, other: &Self) -> bool {
        other.intersect(self).as_ref() == Some(self)
    }

    /// `preferred` when it fits, otherwise the most generic target in range
    fn pick(&self, preferred: &str) -> String {
        match self {
            Self::Exact(name) => name.clone(),
            _ if self.contains(preferred) => preferred.to_string(),
            Self::Range { lo: Some(lo), .. } => lo.clone(),
            Self::Range { hi: Some(hi), .. } => hi.clone(),
            Self::Range { .. } => preferred.to_string(),
        }
    }
}

impl fmt::Display for TargetConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => write!(f, "{}", name),
            Self::Range { lo, hi } => write!(
                f,
                "{}:{}",
                lo.as_deref().unwrap_or(""),
                hi.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Architecture constraint; `None` parts are unconstrained
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchConstraint {
    pub platform: Option<String>,
    pub os: Option<String>,
    pub target: Option<TargetConstraint>,
}

fn wildcard(part: &str) -> Option<String> {
    match part.trim() {
        "" | "*" | "None" | "none" => None,
        other => Some(other.to_string()),
    }
}

/// A platform or os value; ranges only exist for targets
fn plain(field: ArchField, part: &str) -> Result<Option<String>> {
    if part.contains(':') {
        return Err(Error::ParseError(format!("{} '{}' cannot be a range", field, part)));
    }
    Ok(wildcard(part))
}

fn merge(
    field: ArchField,
    left: &Option<String>,
    right: &Option<String>,
) -> std::result::Result<Option<String>, ArchField> {
    match (left, right) {
        (Some(a), Some(b)) if a != b => Err(field),
        (Some(a), _) | (None, Some(a)) => Ok(Some(a.clone())),
        (None, None) => Ok(None),
    }
}

impl ArchConstraint {
    /// Parse `platform-os-target`, where `*` or `None` leaves a part open
    pub fn parse_triple(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().splitn(3, '-').collect();
        if parts.len() != 3 {
            return Err(Error::ParseError(format!(
                "architecture '{}' must be platform-os-target",
                s
            )));
        }
        Ok(Self {
            platform: plain(ArchField::Platform, parts[0])?,
            os: plain(ArchField::Os, parts[1])?,
            target: TargetConstraint::parse(parts[2])?,
        })
    }

    /// Set one part from a `platform=`, `os=` or `target=` token
    pub fn with_field(mut self, field: ArchField, value: &str) -> Result<Self> {
        match field {
            ArchField::Platform => self.platform = plain(field, value)?,
            ArchField::Os => self.os = plain(field, value)?,
            ArchField::Target => self.target = TargetConstraint::parse(value)?,
        }
        Ok(self)
    }

    pub fn is_unconstrained(&self) -> bool {
        self.platform.is_none() && self.os.is_none() && self.target.is_none()
    }

    /// Merge part by part; on disagreement, report the offending part
    pub fn intersect(&self, other: &ArchConstraint) -> std::result::Result<Self, ArchField> {
        Ok(Self {
            platform: merge(ArchField::Platform, &self.platform, &other.platform)?,
            os: merge(ArchField::Os, &self.os, &other.os)?,
            target: match (&self.target, &other.target) {
                (Some(a), Some(b)) => Some(a.intersect(b).ok_or(ArchField::Target)?),
                (a, b) => a.clone().or_else(|| b.clone()),
            },
        })
    }

    pub fn satisfied_by(&self, arch: &Arch) -> bool {
        self.platform.as_ref().is_none_or(|p| *p == arch.platform)
            && self.os.as_ref().is_none_or(|o| *o == arch.os)
            && self.target.as_ref().is_none_or(|t| t.contains(&arch.target))
    }

    /// Fill open parts from a default architecture
    ///
    /// A target range keeps the default target when it falls inside the
    /// range and otherwise takes the range's most generic end.
    pub fn complete(&self, defaults: &Arch) -> Arch {
        Arch {
            platform: self.platform.clone().unwrap_or_else(|| defaults.platform.clone()),
            os: self.os.clone().unwrap_or_else(|| defaults.os.clone()),
            target: match &self.target {
                Some(target) => target.pick(&defaults.target),
                None => defaults.target.clone(),
            },
        }
    }
}

impl From<&Arch> for ArchConstraint {
    fn from(arch: &Arch) -> Self {
        Self {
            platform: Some(arch.platform.clone()),
            os: Some(arch.os.clone()),
            target: Some(TargetConstraint::Exact(arch.target.clone())),
        }
    }
}

impl fmt::Display for ArchConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(p), Some(o), Some(t)) = (&self.platform, &self.os, &self.target) {
            return write!(f, "arch={}-{}-{}", p, o, t);
        }
        let mut parts = Vec::new();
        if let Some(p) = &self.platform {
            parts.push(format!("platform={}", p));
        }
        if let Some(o) = &self.os {
            parts.push(format!("os={}", o));
        }
        if let Some(t) = &self.target {
            parts.push(format!("target={}", t));
        }
        write!(f, "{}", parts.join(" "))
    }
}
