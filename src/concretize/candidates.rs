// src/concretize/candidates.rs

//! Candidate enumeration and ordering
//!
//! Candidates for a package are tried in a fixed order: installed specs
//! (when reuse is enabled), then configured externals, then fresh builds.
//! Fresh builds are ordered by version (configured preference, recipe
//! `preferred` flag, then newest finite version first, infinity versions
//! last), then by how far the variant values stray from their defaults,
//! then by compiler.

use super::conflict::Conflict;
use super::state::{Context, NodeState, State};
use crate::config::External;
use crate::repo::condition::{self, Truth};
use crate::repo::{RecipeDefinition, VariantDecl, VersionDecl};
use crate::spec::{
    AbstractSpec, Arch, ArchConstraint, CompilerSpec, ConcreteGraph, ConcreteNode, VariantValue,
};
use crate::version::{Version, VersionConstraint};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

/// Most variant combinations tried per version and compiler
pub const MAX_VARIANT_COMBINATIONS: usize = 64;

/// One way to decide a package or a virtual
#[derive(Debug, Clone)]
pub enum Candidate {
    /// Build from source with these local fields
    Build(ConcreteNode),
    /// Reuse an installed subgraph rooted at the package
    Reuse(ConcreteGraph),
    /// Use a site-provided external (a single-node graph)
    External(ConcreteGraph),
    /// Use `package` as the provider, via its `decl`-th provides declaration
    Provider { package: String, decl: usize },
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Build(node) => write!(f, "build {}", node),
            Candidate::Reuse(graph) | Candidate::External(graph) => {
                let kind = if matches!(self, Candidate::Reuse(_)) { "reuse" } else { "external" };
                match graph.root_specs().first() {
                    Some(root) => write!(f, "{} {}", kind, root.node()),
                    None => write!(f, "{}", kind),
                }
            }
            Candidate::Provider { package, .. } => write!(f, "provider {}", package),
        }
    }
}

/// Sort key putting preferred versions first
fn version_key(
    ctx: &Context,
    package: &str,
    version: &Version,
    preferred: bool,
) -> (usize, bool, bool, Reverse<Version>) {
    (
        ctx.prefs.version_rank(package, version).unwrap_or(usize::MAX),
        !preferred,
        version.is_infinity(),
        Reverse(version.clone()),
    )
}

/// Declared versions meeting a constraint, most preferred first
pub fn ordered_versions<'r>(
    ctx: &Context,
    recipe: &'r RecipeDefinition,
    versions: &VersionConstraint,
) -> Vec<&'r VersionDecl> {
    let mut matching: Vec<&VersionDecl> = recipe
        .versions
        .iter()
        .filter(|v| versions.satisfies(&v.version))
        .collect();
    matching.sort_by_key(|v| version_key(ctx, &recipe.name, &v.version, v.preferred));
    matching
}

/// Available compilers meeting the constraint, most preferred first
///
/// Configured preference wins, then the compiler already chosen by a
/// decided dependent, then configuration order.
pub fn ordered_compilers(ctx: &Context, state: &State, node: &NodeState, arch: &Arch) -> Vec<CompilerSpec> {
    let inherited = state
        .nodes()
        .filter(|n| n.edges.contains_key(&node.name))
        .find_map(|n| n.concrete.as_ref().map(|c| c.compiler.clone()));

    let mut usable: Vec<(usize, &CompilerSpec)> = ctx
        .prefs
        .compilers()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.usable_on(arch))
        .filter(|(_, c)| {
            node.constraint
                .compiler
                .as_ref()
                .is_none_or(|wanted| wanted.satisfied_by(&c.spec))
        })
        .map(|(i, c)| (i, &c.spec))
        .collect();
    usable.sort_by_key(|(index, spec)| {
        (
            ctx.prefs.compiler_rank(&node.name, spec).unwrap_or(usize::MAX),
            Some(*spec) != inherited.as_ref(),
            *index,
        )
    });

    let mut ordered: Vec<CompilerSpec> = Vec::with_capacity(usable.len());
    for (_, spec) in usable {
        if !ordered.contains(spec) {
            ordered.push(spec.clone());
        }
    }
    ordered
}

/// Values to try for one variant, best first
fn variant_options(
    decl: &VariantDecl,
    wanted: Option<&VariantValue>,
    preferred: Option<&VariantValue>,
) -> Vec<VariantValue> {
    let mut options: Vec<VariantValue> = Vec::new();
    match wanted {
        Some(wanted) if decl.multi => {
            let base = wanted.clone().into_multi();
            if let Some(with_default) = base.intersect(&decl.default) {
                options.push(base);
                options.push(with_default);
            }
        }
        Some(wanted) => options.push(wanted.clone()),
        None => {
            let first = preferred
                .map(|p| decl.normalize(p.clone()))
                .filter(|p| decl.accepts(p))
                .unwrap_or_else(|| decl.default.clone());
            options.push(first);
            options.push(decl.default.clone());
            if decl.is_bool() {
                options.push(VariantValue::Bool(true));
                options.push(VariantValue::Bool(false));
            }
            for value in &decl.values {
                let single = VariantValue::Single(value.clone());
                options.push(decl.normalize(single));
            }
        }
    }

    let mut unique: Vec<VariantValue> = Vec::with_capacity(options.len());
    for option in options {
        if decl.accepts(&option) && !unique.contains(&option) {
            unique.push(option);
        }
    }
    unique
}

/// Index vectors over the given option counts, ordered by how many slots
/// deviate from their first option
pub fn combinations(sizes: &[usize], cap: usize) -> Vec<Vec<usize>> {
    fn fill(
        sizes: &[usize],
        remaining: usize,
        start: usize,
        current: &mut Vec<usize>,
        out: &mut Vec<Vec<usize>>,
        cap: usize,
    ) {
        if out.len() >= cap {
            return;
        }
        if remaining == 0 {
            out.push(current.clone());
            return;
        }
        for slot in start..sizes.len() {
            if sizes.len() - slot < remaining {
                break;
            }
            for choice in 1..sizes[slot] {
                current[slot] = choice;
                fill(sizes, remaining - 1, slot + 1, current, out, cap);
                current[slot] = 0;
            }
        }
    }

    let mut out = Vec::new();
    let mut current = vec![0; sizes.len()];
    for deviations in 0..=sizes.len() {
        fill(sizes, deviations, 0, &mut current, &mut out, cap);
        if out.len() >= cap {
            break;
        }
    }
    out.truncate(cap);
    out
}

/// Variant assignments for one version/compiler/arch, best first
///
/// Conditional variants are active when their condition holds for the
/// version, compiler, arch and the preferred values of earlier variants.
pub fn variant_assignments(
    ctx: &Context,
    recipe: &RecipeDefinition,
    constraint: &AbstractSpec,
    version: &Version,
    compiler: &CompilerSpec,
    arch: &Arch,
) -> Vec<BTreeMap<String, VariantValue>> {
    let preferred = ctx.prefs.variant_preferences(&recipe.name);
    let mut partial = AbstractSpec {
        name: Some(recipe.name.clone()),
        versions: VersionConstraint::exact(version.clone()),
        variants: BTreeMap::new(),
        compiler: Some(compiler.to_constraint()),
        arch: ArchConstraint::from(arch),
        dependencies: BTreeMap::new(),
    };

    let mut slots: Vec<(&str, Vec<VariantValue>)> = Vec::new();
    for decl in &recipe.variants {
        let active = condition::evaluate_local(&decl.when, &partial) == Truth::True;
        if !active {
            if constraint.variants.contains_key(&decl.name) {
                return Vec::new();
            }
            continue;
        }
        let options = variant_options(
            decl,
            constraint.variants.get(&decl.name),
            preferred.get(&decl.name),
        );
        let Some(first) = options.first() else {
            return Vec::new();
        };
        partial.variants.insert(decl.name.clone(), first.clone());
        slots.push((decl.name.as_str(), options));
    }

    let sizes: Vec<usize> = slots.iter().map(|(_, options)| options.len()).collect();
    combinations(&sizes, MAX_VARIANT_COMBINATIONS)
        .into_iter()
        .map(|choice| {
            slots
                .iter()
                .zip(choice)
                .map(|((name, options), index)| (name.to_string(), options[index].clone()))
                .collect()
        })
        .collect()
}

fn single_node_graph(node: ConcreteNode) -> Option<ConcreteGraph> {
    let name = node.name.clone();
    ConcreteGraph::new(vec![name.clone()], BTreeMap::from([(name, node)])).ok()
}

fn external_candidate(
    ctx: &Context,
    recipe: &RecipeDefinition,
    node: &NodeState,
    compilers: &[CompilerSpec],
    external: &External,
) -> Option<Candidate> {
    let version = external.version()?.clone();
    let merged = node.constraint.intersect(&external.spec.without_dependencies()).ok()?;
    let arch = merged.arch.complete(ctx.prefs.default_arch());
    let compiler = match &external.spec.compiler {
        Some(c) => match c.versions.concrete() {
            Some(v) => CompilerSpec::new(c.name.clone(), v.clone()),
            None => compilers.iter().find(|spec| c.satisfied_by(spec))?.clone(),
        },
        None => compilers.first()?.clone(),
    };
    let variants = variant_assignments(ctx, recipe, &merged, &version, &compiler, &arch)
        .into_iter()
        .next()?;

    let chosen = ConcreteNode {
        name: recipe.name.clone(),
        version,
        variants,
        compiler,
        arch,
        dependencies: BTreeMap::new(),
        external: Some(external.prefix.clone()),
    };
    if !chosen.satisfies_local(&node.constraint) {
        return None;
    }
    single_node_graph(chosen).map(Candidate::External)
}

/// Every candidate for an undecided package, in trial order
pub fn node_candidates(
    ctx: &Context,
    state: &State,
    node: &NodeState,
    installed: &[ConcreteGraph],
) -> Result<Vec<Candidate>, Conflict> {
    let recipe = ctx.repo.recipe(&node.name).ok_or_else(|| Conflict::MissingPackage {
        package: node.name.clone(),
        required_by: node.origins.iter().map(|o| o.requirer.clone()).collect(),
    })?;
    let arch = node.constraint.arch.complete(ctx.prefs.default_arch());
    let compilers = ordered_compilers(ctx, state, node, &arch);
    let mut candidates = Vec::new();

    let mut reusable: Vec<&ConcreteGraph> = installed
        .iter()
        .filter(|graph| {
            graph
                .node(&node.name)
                .is_some_and(|n| n.satisfies_local(&node.constraint))
        })
        .collect();
    reusable.sort_by_key(|graph| {
        graph
            .node(&node.name)
            .map(|n| version_key(ctx, &node.name, &n.version, false))
    });
    candidates.extend(reusable.into_iter().cloned().map(Candidate::Reuse));

    for external in ctx.prefs.externals(&node.name) {
        if let Some(candidate) = external_candidate(ctx, &recipe, node, &compilers, external) {
            candidates.push(candidate);
        }
    }

    let buildable = ctx.prefs.is_buildable(&node.name);
    let versions = ordered_versions(ctx, &recipe, &node.constraint.versions);
    if buildable {
        for decl in &versions {
            let per_compiler: Vec<(&CompilerSpec, Vec<BTreeMap<String, VariantValue>>)> = compilers
                .iter()
                .map(|c| {
                    (
                        c,
                        variant_assignments(ctx, &recipe, &node.constraint, &decl.version, c, &arch),
                    )
                })
                .collect();
            let depth = per_compiler.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
            for index in 0..depth {
                for (compiler, assignments) in &per_compiler {
                    let Some(variants) = assignments.get(index) else { continue };
                    let chosen = ConcreteNode {
                        name: node.name.clone(),
                        version: decl.version.clone(),
                        variants: variants.clone(),
                        compiler: (*compiler).clone(),
                        arch: arch.clone(),
                        dependencies: BTreeMap::new(),
                        external: None,
                    };
                    if chosen.satisfies_local(&node.constraint) {
                        candidates.push(Candidate::Build(chosen));
                    }
                }
            }
        }
    }

    if candidates.is_empty() {
        let reason = if !buildable {
            "the package is not buildable and no external or installed spec matches".to_string()
        } else if versions.is_empty() {
            let declared: Vec<String> = recipe.versions.iter().map(|v| v.version.to_string()).collect();
            format!("no declared version matches (declared: {})", declared.join(", "))
        } else if compilers.is_empty() {
            format!("no configured compiler is usable on {}", arch)
        } else {
            "no variant combination satisfies the constraint".to_string()
        };
        return Err(Conflict::NoCandidates {
            package: node.name.clone(),
            constraint: node.constraint.to_string(),
            reason,
        });
    }
    Ok(candidates)
}

/// Cheap upper bound on the number of candidates, used to pick decisions
pub fn estimate(ctx: &Context, node: &NodeState, installed: usize) -> usize {
    let Some(recipe) = ctx.repo.recipe(&node.name) else {
        return 0;
    };
    let builds = if ctx.prefs.is_buildable(&node.name) {
        recipe
            .versions
            .iter()
            .filter(|v| node.constraint.versions.satisfies(&v.version))
            .count()
    } else {
        0
    };
    builds + ctx.prefs.externals(&node.name).len() + installed
}

/// Providers able to stand in for a virtual, in trial order
///
/// Providers already in the graph or named by a `^` requirement come
/// first, then configured provider preferences, then package name order.
pub fn provider_candidates(ctx: &Context, state: &State, virtual_name: &str) -> Vec<Candidate> {
    let Some(virtual_state) = state.virtual_state(virtual_name) else {
        return Vec::new();
    };
    let providers = ctx.repo.providers(virtual_name);

    let mut ranked = Vec::new();
    let mut decl_index: BTreeMap<&str, usize> = BTreeMap::new();
    for (position, provider) in providers.iter().enumerate() {
        let index = decl_index.entry(provider.package.as_str()).or_insert(0);
        let decl = *index;
        *index += 1;

        if !provider
            .provides
            .versions()
            .is_compatible_with(&virtual_state.constraint.versions)
        {
            continue;
        }
        let possible = match state.node(&provider.package) {
            Some(NodeState { concrete: Some(chosen), .. }) => {
                condition::evaluate_concrete(&provider.provides.when, chosen)
            }
            Some(node) => {
                node.constraint
                    .intersect(&provider.provides.when.without_dependencies())
                    .is_ok()
            }
            None => true,
        };
        if !possible {
            continue;
        }

        let present = state.node(&provider.package).is_some()
            || state.requirement(&provider.package).is_some();
        let key = (
            !present,
            ctx.prefs
                .provider_rank(virtual_name, &provider.package)
                .unwrap_or(usize::MAX),
            position,
        );
        ranked.push((
            key,
            Candidate::Provider {
                package: provider.package.clone(),
                decl,
            },
        ));
    }
    ranked.sort_by_key(|(key, _)| *key);
    ranked.into_iter().map(|(_, candidate)| candidate).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AvailableCompiler, PackagePreferences, Preferences};
    use crate::repo::{InMemoryRepository, RepoCache, parse_recipe};
    use crate::spec::Arch;

    const LIBFOO: &str = r#"
[package]
name = "libfoo"
[[versions]]
version = "develop"
[[versions]]
version = "1.0"
[[versions]]
version = "2.0"
[[versions]]
version = "1.5"
preferred = true
[[variants]]
name = "shared"
default = true
[[variants]]
name = "build_type"
default = "Release"
values = ["Debug", "Release", "RelWithDebInfo"]
[[variants]]
name = "cuda_arch"
default = "70"
values = ["70", "80"]
when = "@2:"
"#;

    fn arch() -> Arch {
        Arch::new("linux", "ubuntu22.04", "x86_64")
    }

    fn compilers() -> Vec<AvailableCompiler> {
        vec![
            AvailableCompiler::new(CompilerSpec::parse("gcc@11.4.0").unwrap()),
            AvailableCompiler::new(CompilerSpec::parse("clang@15.0.7").unwrap()),
        ]
    }

    #[test]
    fn test_combinations_order() {
        let combos = combinations(&[2, 3], 64);
        assert_eq!(
            combos,
            vec![
                vec![0, 0],
                vec![1, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 1],
                vec![1, 2],
            ]
        );
        assert_eq!(combinations(&[2, 2, 2, 2, 2, 2, 2, 2], 10).len(), 10);
        assert_eq!(combinations(&[], 64), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_version_order() {
        let recipe = parse_recipe(LIBFOO).unwrap();
        let repo = InMemoryRepository::new();
        let cache = RepoCache::new(&repo);
        let prefs = Preferences::new(compilers(), arch());
        let ctx = Context { repo: &cache, prefs: &prefs };

        let order: Vec<String> = ordered_versions(&ctx, &recipe, &VersionConstraint::Any)
            .iter()
            .map(|v| v.version.to_string())
            .collect();
        assert_eq!(order, vec!["1.5", "2.0", "1.0", "develop"]);

        let prefs = Preferences::new(compilers(), arch()).with_package(
            "libfoo",
            PackagePreferences {
                versions: vec![VersionConstraint::parse("1.0").unwrap()],
                ..Default::default()
            },
        );
        let ctx = Context { repo: &cache, prefs: &prefs };
        let first = ordered_versions(&ctx, &recipe, &VersionConstraint::Any)[0];
        assert_eq!(first.version.to_string(), "1.0");
    }

    #[test]
    fn test_variant_assignments_defaults_first() {
        let recipe = parse_recipe(LIBFOO).unwrap();
        let repo = InMemoryRepository::new();
        let cache = RepoCache::new(&repo);
        let prefs = Preferences::new(compilers(), arch());
        let ctx = Context { repo: &cache, prefs: &prefs };
        let gcc = CompilerSpec::parse("gcc@11.4.0").unwrap();

        let old = variant_assignments(
            &ctx,
            &recipe,
            &AbstractSpec::named("libfoo"),
            &Version::parse("1.0").unwrap(),
            &gcc,
            &arch(),
        );
        assert_eq!(old[0]["shared"], VariantValue::Bool(true));
        assert_eq!(old[0]["build_type"], VariantValue::Single("Release".into()));
        assert!(!old[0].contains_key("cuda_arch"));
        // shared, build_type: 2 * 3 combinations
        assert_eq!(old.len(), 6);

        let new = variant_assignments(
            &ctx,
            &recipe,
            &AbstractSpec::parse("libfoo~shared").unwrap(),
            &Version::parse("2.0").unwrap(),
            &gcc,
            &arch(),
        );
        assert_eq!(new[0]["shared"], VariantValue::Bool(false));
        assert_eq!(new[0]["cuda_arch"], VariantValue::Single("70".into()));
        assert!(new.iter().all(|v| v["shared"] == VariantValue::Bool(false)));
    }

    #[test]
    fn test_multi_variant_options() {
        let decl = VariantDecl {
            name: "backends".to_string(),
            default: VariantValue::multi(["serial"]),
            values: vec!["serial".into(), "cuda".into(), "openmp".into()],
            multi: true,
            when: AbstractSpec::default(),
            description: None,
        };
        let free = variant_options(&decl, None, None);
        assert_eq!(free[0], VariantValue::multi(["serial"]));
        assert!(free.contains(&VariantValue::multi(["cuda"])));

        let wanted = VariantValue::Single("cuda".into());
        let constrained = variant_options(&decl, Some(&wanted), None);
        assert_eq!(
            constrained,
            vec![VariantValue::multi(["cuda"]), VariantValue::multi(["cuda", "serial"])]
        );
    }

    #[test]
    fn test_node_candidates_respect_constraint() {
        let mut repo = InMemoryRepository::new();
        repo.add_toml(LIBFOO).unwrap();
        let cache = RepoCache::new(&repo);
        let prefs = Preferences::new(compilers(), arch());
        let ctx = Context { repo: &cache, prefs: &prefs };

        let mut state = State::default();
        let spec = AbstractSpec::parse("libfoo@:1.5 %clang").unwrap();
        let constrain = state.constrain(&ctx, "libfoo", &spec, "request");
        assert!(constrain.is_ok());

        let node = state.node("libfoo").unwrap();
        let candidates = node_candidates(&ctx, &state, node, &[]).unwrap();
        let Candidate::Build(first) = &candidates[0] else {
            panic!("expected a build candidate");
        };
        assert_eq!(first.version.to_string(), "1.5");
        assert_eq!(first.compiler.name, "clang");
        assert!(candidates.iter().all(|c| match c {
            Candidate::Build(n) => n.version.to_string() != "2.0",
            _ => false,
        }));
    }

    #[test]
    fn test_no_candidates_reason() {
        let mut repo = InMemoryRepository::new();
        repo.add_toml(LIBFOO).unwrap();
        let cache = RepoCache::new(&repo);
        let prefs = Preferences::new(Vec::new(), arch());
        let ctx = Context { repo: &cache, prefs: &prefs };

        let mut state = State::default();
        assert!(state
            .constrain(&ctx, "libfoo", &AbstractSpec::named("libfoo"), "request")
            .is_ok());
        let node = state.node("libfoo").unwrap();
        match node_candidates(&ctx, &state, node, &[]) {
            Err(Conflict::NoCandidates { reason, .. }) => {
                assert!(reason.contains("compiler"), "{}", reason)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
