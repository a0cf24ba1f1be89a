// src/repo/condition.rs

//! Evaluation of recipe `when` conditions
//!
//! During concretization a package is often only partially constrained, so
//! a condition may be known to hold, known not to hold, or undecided yet.
//! Undecided conditions are revisited once the package is concrete.

use crate::spec::{AbstractSpec, ConcreteNode, TargetConstraint, VariantValue};

/// Three-valued truth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn from_bool(value: bool) -> Self {
        if value { Truth::True } else { Truth::False }
    }

    /// Conjunction: any false is false, all true is true
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn is_true(self) -> bool {
        self == Truth::True
    }
}

fn variant_truth(wanted: &VariantValue, known: &VariantValue) -> Truth {
    match (wanted, known) {
        (VariantValue::Bool(a), VariantValue::Bool(b)) => Truth::from_bool(a == b),
        (VariantValue::Single(a), VariantValue::Single(b)) => Truth::from_bool(a == b),
        // A set constraint only says "at least": more values may still arrive
        (VariantValue::Multi(w), VariantValue::Multi(k)) if w.is_subset(k) => Truth::True,
        (VariantValue::Single(a), VariantValue::Multi(k)) if k.contains(a) => Truth::True,
        (VariantValue::Bool(_), _) | (_, VariantValue::Bool(_)) => Truth::False,
        _ => Truth::Unknown,
    }
}

fn option_truth(wanted: &Option<String>, known: &Option<String>) -> Truth {
    match (wanted, known) {
        (None, _) => Truth::True,
        (Some(_), None) => Truth::Unknown,
        (Some(a), Some(b)) => Truth::from_bool(a == b),
    }
}

fn target_truth(wanted: &Option<TargetConstraint>, known: &Option<TargetConstraint>) -> Truth {
    match (wanted, known) {
        (None, _) => Truth::True,
        (Some(_), None) => Truth::Unknown,
        (Some(w), Some(k)) if k.is_subset_of(w) => Truth::True,
        (Some(w), Some(k)) if w.intersect(k).is_none() => Truth::False,
        (Some(_), Some(_)) => Truth::Unknown,
    }
}

/// Evaluate a condition's local fields against a partial constraint
///
/// `^dependency` parts of the condition are not considered here; callers
/// combine them with what they know about the dependency graph.
pub fn evaluate_local(when: &AbstractSpec, known: &AbstractSpec) -> Truth {
    let mut truth = Truth::True;

    if let (Some(a), Some(b)) = (&when.name, &known.name) {
        truth = truth.and(Truth::from_bool(a == b));
    }

    let version_truth = if known.versions.is_subset_of(&when.versions) {
        Truth::True
    } else if known.versions.is_compatible_with(&when.versions) {
        Truth::Unknown
    } else {
        Truth::False
    };
    truth = truth.and(version_truth);

    for (key, wanted) in &when.variants {
        let part = match known.variants.get(key) {
            Some(value) => variant_truth(wanted, value),
            None => Truth::Unknown,
        };
        truth = truth.and(part);
    }

    if let Some(wanted) = &when.compiler {
        let part = match &known.compiler {
            None => Truth::Unknown,
            Some(c) if c.name != wanted.name => Truth::False,
            Some(c) if c.versions.is_subset_of(&wanted.versions) => Truth::True,
            Some(c) if !c.versions.is_compatible_with(&wanted.versions) => Truth::False,
            Some(_) => Truth::Unknown,
        };
        truth = truth.and(part);
    }

    truth = truth
        .and(option_truth(&when.arch.platform, &known.arch.platform))
        .and(option_truth(&when.arch.os, &known.arch.os))
        .and(target_truth(&when.arch.target, &known.arch.target));

    truth
}

/// Evaluate a condition's local fields against a concrete node
pub fn evaluate_concrete(when: &AbstractSpec, node: &ConcreteNode) -> bool {
    node.satisfies_local(&when.without_dependencies())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Arch, CompilerSpec};
    use crate::version::Version;
    use std::collections::BTreeMap;

    fn spec(s: &str) -> AbstractSpec {
        AbstractSpec::parse(s).unwrap()
    }

    #[test]
    fn test_unconditional_is_true() {
        assert_eq!(evaluate_local(&AbstractSpec::default(), &spec("libfoo")), Truth::True);
    }

    #[test]
    fn test_version_conditions() {
        assert_eq!(evaluate_local(&spec("@2:"), &spec("x@2.1")), Truth::True);
        assert_eq!(evaluate_local(&spec("@2:"), &spec("x@1.0:1.5")), Truth::False);
        assert_eq!(evaluate_local(&spec("@2:"), &spec("x@1:")), Truth::Unknown);
        assert_eq!(evaluate_local(&spec("@2:"), &spec("x")), Truth::Unknown);
    }

    #[test]
    fn test_variant_conditions() {
        assert_eq!(evaluate_local(&spec("+mpi"), &spec("x+mpi")), Truth::True);
        assert_eq!(evaluate_local(&spec("+mpi"), &spec("x~mpi")), Truth::False);
        assert_eq!(evaluate_local(&spec("+mpi"), &spec("x")), Truth::Unknown);
        assert_eq!(
            evaluate_local(&spec("backends=cuda"), &spec("x backends=cuda,openmp")),
            Truth::True
        );
        assert_eq!(
            evaluate_local(&spec("backends=cuda"), &spec("x backends=openmp,rocm")),
            Truth::Unknown
        );
    }

    #[test]
    fn test_compiler_and_arch_conditions() {
        assert_eq!(evaluate_local(&spec("%intel"), &spec("x%gcc")), Truth::False);
        assert_eq!(evaluate_local(&spec("%gcc@9:"), &spec("x%gcc@10")), Truth::True);
        assert_eq!(evaluate_local(&spec("%gcc@9:"), &spec("x%gcc")), Truth::Unknown);
        assert_eq!(
            evaluate_local(&spec("target=aarch64"), &spec("x target=x86_64")),
            Truth::False
        );
        assert_eq!(evaluate_local(&spec("@2: +mpi"), &spec("x@1~mpi")), Truth::False);
    }

    #[test]
    fn test_target_range_conditions() {
        let x86 = spec("target=x86_64:");
        assert_eq!(evaluate_local(&x86, &spec("x target=haswell")), Truth::True);
        assert_eq!(evaluate_local(&x86, &spec("x target=neoverse_n1")), Truth::False);
        assert_eq!(evaluate_local(&x86, &spec("x target=zen:")), Truth::True);
        assert_eq!(evaluate_local(&spec("target=haswell:"), &spec("x target=x86_64:")), Truth::Unknown);
        assert_eq!(evaluate_local(&x86, &spec("x")), Truth::Unknown);
    }

    #[test]
    fn test_concrete_evaluation() {
        let node = ConcreteNode {
            name: "x".to_string(),
            version: Version::parse("2.1").unwrap(),
            variants: BTreeMap::from([("mpi".to_string(), VariantValue::Bool(true))]),
            compiler: CompilerSpec::parse("gcc@11.4.0").unwrap(),
            arch: Arch::parse("linux-ubuntu22.04-x86_64").unwrap(),
            dependencies: BTreeMap::new(),
            external: None,
        };
        assert!(evaluate_concrete(&spec("@2: +mpi %gcc"), &node));
        assert!(!evaluate_concrete(&spec("@:1"), &node));
        assert!(!evaluate_concrete(&spec("~mpi"), &node));
        assert!(evaluate_concrete(&spec("^zlib"), &node));
    }
}
