// src/spec/deptypes.rs

//! Dependency types: how a dependent uses its dependency

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Set of `build`, `link` and `run` flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DepTypes(u8);

impl DepTypes {
    pub const NONE: DepTypes = DepTypes(0);
    /// Needed while building: tools on PATH
    pub const BUILD: DepTypes = DepTypes(1);
    /// Linked against: libraries and headers
    pub const LINK: DepTypes = DepTypes(2);
    /// Needed when the dependent runs
    pub const RUN: DepTypes = DepTypes(4);
    /// Applied when a recipe declares no type
    pub const DEFAULT: DepTypes = DepTypes(1 | 2);

    const NAMES: [(&'static str, DepTypes); 3] = [
        ("build", DepTypes::BUILD),
        ("link", DepTypes::LINK),
        ("run", DepTypes::RUN),
    ];

    /// Parse `build,link` style lists
    pub fn parse(s: &str) -> Result<Self> {
        let mut types = DepTypes::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let flag = Self::NAMES
                .iter()
                .find(|(name, _)| *name == part)
                .map(|(_, flag)| *flag)
                .ok_or_else(|| Error::ParseError(format!("unknown dependency type '{}'", part)))?;
            types = types.union(flag);
        }
        Ok(types)
    }

    pub const fn union(self, other: DepTypes) -> DepTypes {
        DepTypes(self.0 | other.0)
    }

    pub const fn contains(self, other: DepTypes) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: DepTypes) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(","))
    }
}

impl TryFrom<String> for DepTypes {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<DepTypes> for String {
    fn from(types: DepTypes) -> Self {
        types.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let types = DepTypes::parse("link, build").unwrap();
        assert_eq!(types, DepTypes::DEFAULT);
        assert_eq!(types.to_string(), "build,link");
        assert!(DepTypes::parse("bogus").is_err());
        assert!(DepTypes::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_set_operations() {
        let types = DepTypes::BUILD.union(DepTypes::RUN);
        assert!(types.contains(DepTypes::RUN));
        assert!(!types.contains(DepTypes::LINK));
        assert!(types.intersects(DepTypes::DEFAULT));
        assert!(!DepTypes::LINK.intersects(DepTypes::RUN));
    }
}
