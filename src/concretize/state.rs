// src/concretize/state.rs

//! Partial assignments explored by the concretizer
//!
//! A [`State`] maps package names to their accumulated constraints, the
//! concrete value chosen so far (if any) and the dependency edges expanded
//! from their recipes. Every entry sits behind an `Arc` and is copied on
//! write, so a checkpoint is a cheap clone of the maps and restoring one is
//! an assignment.

use super::conflict::Conflict;
use crate::config::Preferences;
use crate::repo::condition::{self, Truth};
use crate::repo::{DependencyDecl, RecipeDefinition, RepoCache};
use crate::spec::{
    AbstractSpec, ConcreteGraph, ConcreteNode, DepTypes, DependencyEdge, Unsatisfiable,
    VariantValue,
};
use crate::version::VersionConstraint;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Read-only inputs shared by every step of one resolution
pub struct Context<'a> {
    pub repo: &'a RepoCache<'a>,
    pub prefs: &'a Preferences,
}

/// Who asked for a constraint, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub requirer: String,
    pub spec: AbstractSpec,
}

#[derive(Debug, Clone)]
pub struct NodeState {
    pub name: String,
    /// Local constraints; dependency constraints live on the edges' targets
    pub constraint: AbstractSpec,
    pub origins: Vec<Origin>,
    /// Chosen local fields; `dependencies` stays empty until the graph is built
    pub concrete: Option<ConcreteNode>,
    /// Reused or external: edges are fixed and recipe declarations ignored
    pub pinned: bool,
    pub edges: BTreeMap<String, DependencyEdge>,
    /// Dependency declarations already expanded or ruled out
    pub resolved_decls: BTreeSet<usize>,
    /// Discovery order, used to break ties between decisions
    pub order: usize,
}

impl NodeState {
    fn new(name: &str, order: usize) -> Self {
        Self {
            name: name.to_string(),
            constraint: AbstractSpec::named(name),
            origins: Vec::new(),
            concrete: None,
            pinned: false,
            edges: BTreeMap::new(),
            resolved_decls: BTreeSet::new(),
            order,
        }
    }

    /// `name@version`, or just the name while undecided
    pub fn label(&self) -> String {
        match &self.concrete {
            Some(node) => format!("{}@{}", node.name, node.version),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VirtualState {
    pub name: String,
    pub constraint: AbstractSpec,
    pub origins: Vec<Origin>,
    /// Packages depending on the virtual, with the dependency types they use
    pub requesters: BTreeMap<String, DepTypes>,
    pub provider: Option<String>,
    pub order: usize,
}

/// A `^name` constraint that applies wherever `name` appears
#[derive(Debug, Clone)]
pub struct Requirement {
    pub origins: Vec<Origin>,
    /// Requested by a root, so the graph must contain the package
    pub must_appear: bool,
}

#[derive(Debug, Clone, Default)]
pub struct State {
    nodes: BTreeMap<String, Arc<NodeState>>,
    virtuals: BTreeMap<String, Arc<VirtualState>>,
    requirements: Arc<BTreeMap<String, Requirement>>,
    next_order: usize,
}

/// Strip a dependency's `name@versions` so it can constrain a provider
fn provider_view(spec: &AbstractSpec) -> AbstractSpec {
    AbstractSpec {
        name: None,
        versions: VersionConstraint::Any,
        dependencies: BTreeMap::new(),
        ..spec.clone()
    }
}

/// Whether a constraint says anything about the field an intersection failed on
fn touches(spec: &AbstractSpec, field: &str) -> bool {
    match field {
        "version" => !spec.versions.is_any(),
        "compiler" => spec.compiler.is_some(),
        "platform" => spec.arch.platform.is_some(),
        "os" => spec.arch.os.is_some(),
        "target" => spec.arch.target.is_some(),
        other => match other.strip_prefix("variant ") {
            Some(variant) => spec.variants.contains_key(variant),
            None => true,
        },
    }
}

fn conflicting(
    package: &str,
    error: &Unsatisfiable,
    origins: &[Origin],
    requirer: &str,
    spec: &AbstractSpec,
) -> Conflict {
    let mut constraints: Vec<(String, String)> = origins
        .iter()
        .filter(|o| touches(&o.spec, &error.field))
        .map(|o| (o.requirer.clone(), o.spec.to_string()))
        .collect();
    constraints.push((requirer.to_string(), spec.to_string()));
    constraints.dedup();
    Conflict::ConflictingConstraints {
        package: package.to_string(),
        field: error.field.clone(),
        constraints,
    }
}

/// Express valued constraints on multi-valued variants as sets
fn normalize_variants(recipe: &RecipeDefinition, spec: &mut AbstractSpec) {
    for (key, value) in spec.variants.iter_mut() {
        if let Some(decl) = recipe.variant(key) {
            *value = decl.normalize(value.clone());
        }
    }
}

fn validate_variants(recipe: &RecipeDefinition, spec: &AbstractSpec) -> Result<(), Conflict> {
    for (key, value) in &spec.variants {
        let invalid = |reason: String| Conflict::InvalidVariant {
            package: recipe.name.clone(),
            variant: key.clone(),
            reason,
        };
        let Some(decl) = recipe.variant(key) else {
            return Err(invalid("not declared by the recipe".to_string()));
        };
        match (value, decl.is_bool()) {
            (VariantValue::Bool(_), true) => {}
            (VariantValue::Bool(_), false) | (_, true) => {
                return Err(invalid(format!("'{}' has the wrong kind of value", value)));
            }
            (VariantValue::Multi(set), false) if set.len() > 1 => {
                return Err(invalid("only one value may be chosen".to_string()));
            }
            _ => {
                let allowed = |v: &&str| decl.values.iter().any(|a| a == v);
                if let Some(bad) = value.values().into_iter().find(|v| !allowed(v)) {
                    return Err(invalid(format!(
                        "'{}' is not one of {}",
                        bad,
                        decl.values.join(", ")
                    )));
                }
            }
        }
    }
    Ok(())
}

impl State {
    pub fn nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes.values().map(|n| n.as_ref())
    }

    pub fn node(&self, name: &str) -> Option<&NodeState> {
        self.nodes.get(name).map(|n| n.as_ref())
    }

    pub fn virtuals(&self) -> impl Iterator<Item = &VirtualState> {
        self.virtuals.values().map(|v| v.as_ref())
    }

    pub fn virtual_state(&self, name: &str) -> Option<&VirtualState> {
        self.virtuals.get(name).map(|v| v.as_ref())
    }

    pub fn requirement(&self, name: &str) -> Option<&Requirement> {
        self.requirements.get(name)
    }

    fn node_mut(&mut self, name: &str) -> Option<&mut NodeState> {
        self.nodes.get_mut(name).map(Arc::make_mut)
    }

    fn virtual_mut(&mut self, name: &str) -> Option<&mut VirtualState> {
        self.virtuals.get_mut(name).map(Arc::make_mut)
    }

    fn take_order(&mut self) -> usize {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    /// Create the node if needed; returns true if it is new
    fn ensure_node(&mut self, name: &str) -> bool {
        if self.nodes.contains_key(name) {
            return false;
        }
        let order = self.take_order();
        self.nodes
            .insert(name.to_string(), Arc::new(NodeState::new(name, order)));
        true
    }

    /// Requirement origins to replay onto a newly created node or virtual
    fn requirement_origins(&self, name: &str) -> Vec<Origin> {
        self.requirements
            .get(name)
            .map(|r| r.origins.clone())
            .unwrap_or_default()
    }

    /// Add a local constraint to a package (or virtual) by name
    pub fn constrain(
        &mut self,
        ctx: &Context,
        name: &str,
        spec: &AbstractSpec,
        requirer: &str,
    ) -> Result<(), Conflict> {
        let Some(recipe) = ctx.repo.recipe(name) else {
            if ctx.repo.is_virtual(name) {
                return self.constrain_virtual(ctx, name, spec, requirer);
            }
            return Err(Conflict::MissingPackage {
                package: name.to_string(),
                required_by: vec![requirer.to_string()],
            });
        };

        let mut local = spec.without_dependencies();
        local.name = Some(name.to_string());
        normalize_variants(&recipe, &mut local);
        validate_variants(&recipe, &local)?;

        if self.ensure_node(name) {
            for origin in self.requirement_origins(name) {
                let mut required = origin.spec.clone();
                normalize_variants(&recipe, &mut required);
                validate_variants(&recipe, &required)?;
                self.merge_node(name, &required, &origin.requirer)?;
            }
        }
        self.merge_node(name, &local, requirer)
    }

    fn merge_node(&mut self, name: &str, spec: &AbstractSpec, requirer: &str) -> Result<(), Conflict> {
        let Some(node) = self.node(name) else {
            return Ok(());
        };
        let merged = node
            .constraint
            .intersect(spec)
            .map_err(|e| conflicting(name, &e, &node.origins, requirer, spec))?;
        if let Some(chosen) = &node.concrete {
            if !chosen.satisfies_local(spec) {
                return Err(Conflict::UnsatisfiedRequirement {
                    package: name.to_string(),
                    chosen: chosen.to_string(),
                    required_constraint: spec.to_string(),
                    required_by: requirer.to_string(),
                });
            }
        }

        let record = !spec.without_dependencies().is_unconstrained();
        if let Some(node) = self.node_mut(name) {
            node.constraint = merged;
            if record {
                node.origins.push(Origin {
                    requirer: requirer.to_string(),
                    spec: spec.clone(),
                });
            }
        }
        Ok(())
    }

    fn constrain_virtual(
        &mut self,
        ctx: &Context,
        name: &str,
        spec: &AbstractSpec,
        requirer: &str,
    ) -> Result<(), Conflict> {
        let mut local = spec.without_dependencies();
        local.name = Some(name.to_string());

        if !self.virtuals.contains_key(name) {
            let order = self.take_order();
            self.virtuals.insert(
                name.to_string(),
                Arc::new(VirtualState {
                    name: name.to_string(),
                    constraint: AbstractSpec::named(name),
                    origins: Vec::new(),
                    requesters: BTreeMap::new(),
                    provider: None,
                    order,
                }),
            );
            for origin in self.requirement_origins(name) {
                self.merge_virtual(ctx, name, &origin.spec, &origin.requirer)?;
            }
        }
        self.merge_virtual(ctx, name, &local, requirer)
    }

    fn merge_virtual(
        &mut self,
        ctx: &Context,
        name: &str,
        spec: &AbstractSpec,
        requirer: &str,
    ) -> Result<(), Conflict> {
        let Some(state) = self.virtual_state(name) else {
            return Ok(());
        };
        let merged = state
            .constraint
            .intersect(spec)
            .map_err(|e| conflicting(name, &e, &state.origins, requirer, spec))?;
        let provider = state.provider.clone();

        if let Some(state) = self.virtual_mut(name) {
            state.constraint = merged.clone();
            if !spec.is_unconstrained() {
                state.origins.push(Origin {
                    requirer: requirer.to_string(),
                    spec: spec.clone(),
                });
            }
        }

        if let Some(provider) = provider {
            if !self.provides_compatible(ctx, &provider, name, &merged.versions) {
                return Err(Conflict::UnsatisfiedRequirement {
                    package: name.to_string(),
                    chosen: provider,
                    required_constraint: spec.to_string(),
                    required_by: requirer.to_string(),
                });
            }
            let view = provider_view(spec);
            if !view.is_unconstrained() {
                self.constrain(ctx, &provider, &view, requirer)?;
            }
        }
        Ok(())
    }

    /// Whether `provider` may provide `virtual_name` at the requested versions
    ///
    /// While the provider is undecided any declaration whose condition can
    /// still hold counts; once decided its condition must hold.
    fn provides_compatible(
        &self,
        ctx: &Context,
        provider: &str,
        virtual_name: &str,
        versions: &VersionConstraint,
    ) -> bool {
        let Some(recipe) = ctx.repo.recipe(provider) else {
            return false;
        };
        let node = self.node(provider);
        recipe.provides_for(virtual_name).any(|decl| {
            if !decl.versions().is_compatible_with(versions) {
                return false;
            }
            match node {
                Some(NodeState { concrete: Some(chosen), .. }) => {
                    condition::evaluate_concrete(&decl.when, chosen)
                }
                Some(state) => {
                    condition::evaluate_local(&decl.when, &state.constraint) != Truth::False
                }
                None => true,
            }
        })
    }

    /// Record a `^name` constraint that applies wherever `name` appears
    pub fn add_requirement(
        &mut self,
        ctx: &Context,
        name: &str,
        spec: &AbstractSpec,
        requirer: &str,
        must_appear: bool,
    ) -> Result<(), Conflict> {
        let mut local = spec.without_dependencies();
        local.name = Some(name.to_string());

        let requirements = Arc::make_mut(&mut self.requirements);
        let entry = requirements
            .entry(name.to_string())
            .or_insert_with(|| Requirement {
                origins: Vec::new(),
                must_appear: false,
            });
        entry.must_appear |= must_appear;
        entry.origins.push(Origin {
            requirer: requirer.to_string(),
            spec: local.clone(),
        });

        if self.nodes.contains_key(name) || self.virtuals.contains_key(name) {
            self.constrain(ctx, name, &local, requirer)?;
        }
        Ok(())
    }

    /// Expand one dependency declaration of a decided package
    pub fn add_dependency(
        &mut self,
        ctx: &Context,
        parent: &str,
        decl: &DependencyDecl,
    ) -> Result<(), Conflict> {
        let requirer = self.node(parent).map(NodeState::label).unwrap_or_default();
        let target = decl.target();

        for (name, nested) in &decl.spec.dependencies {
            self.add_requirement(ctx, name, &nested.spec, &requirer, false)?;
        }

        if ctx.repo.recipe(target).is_some() {
            self.constrain(ctx, target, &decl.spec, &requirer)?;
            return self.add_edge(parent, target, decl.deptypes, None);
        }

        if ctx.repo.is_virtual(target) {
            self.constrain_virtual(ctx, target, &decl.spec, &requirer)?;
            let provider = self.virtual_state(target).and_then(|v| v.provider.clone());
            if let Some(state) = self.virtual_mut(target) {
                let types = state.requesters.entry(parent.to_string()).or_insert(DepTypes::NONE);
                *types = types.union(decl.deptypes);
            }
            if let Some(provider) = provider {
                self.add_edge(parent, &provider, decl.deptypes, Some(target))?;
            }
            return Ok(());
        }

        Err(Conflict::MissingPackage {
            package: target.to_string(),
            required_by: vec![requirer],
        })
    }

    /// Path of edges from `from` to `to`, if one exists
    fn path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut stack = vec![vec![from.to_string()]];
        let mut seen = BTreeSet::new();
        while let Some(path) = stack.pop() {
            let Some(last) = path.last() else { continue };
            if last == to {
                return Some(path);
            }
            if !seen.insert(last.clone()) {
                continue;
            }
            if let Some(node) = self.node(last) {
                for next in node.edges.keys().rev() {
                    let mut extended = path.clone();
                    extended.push(next.clone());
                    stack.push(extended);
                }
            }
        }
        None
    }

    fn add_edge(
        &mut self,
        parent: &str,
        target: &str,
        deptypes: DepTypes,
        virtual_name: Option<&str>,
    ) -> Result<(), Conflict> {
        if let Some(path) = self.path(target, parent) {
            let mut cycle = vec![parent.to_string()];
            cycle.extend(path);
            return Err(Conflict::CircularDependency { cycle });
        }
        if let Some(node) = self.node_mut(parent) {
            let edge = node
                .edges
                .entry(target.to_string())
                .or_insert_with(|| DependencyEdge::new(DepTypes::NONE));
            edge.deptypes = edge.deptypes.union(deptypes);
            if let Some(v) = virtual_name {
                edge.virtuals.insert(v.to_string());
            }
        }
        Ok(())
    }

    /// Make `provider` the provider of a virtual and connect its requesters
    pub fn choose_provider(
        &mut self,
        ctx: &Context,
        virtual_name: &str,
        provider: &str,
        decl_index: usize,
    ) -> Result<(), Conflict> {
        let Some(state) = self.virtual_state(virtual_name).cloned() else {
            return Ok(());
        };
        let requirer = format!("virtual {}", virtual_name);

        let mut view = provider_view(&state.constraint);
        let decl = ctx.repo.recipe(provider).and_then(|recipe| {
            let decl = recipe.provides_for(virtual_name).nth(decl_index).cloned();
            decl
        });
        if let Some(decl) = decl {
            view = view
                .intersect(&decl.when.without_dependencies())
                .map_err(|e| Conflict::NoProvider {
                    virtual_name: virtual_name.to_string(),
                    constraint: state.constraint.to_string(),
                    required_by: vec![format!("{} ({})", provider, e)],
                })?;
        }

        if let Some(state) = self.virtual_mut(virtual_name) {
            state.provider = Some(provider.to_string());
        }
        self.constrain(ctx, provider, &view, &requirer)?;
        for (requester, deptypes) in &state.requesters {
            self.add_edge(requester, provider, *deptypes, Some(virtual_name))?;
        }
        Ok(())
    }

    /// Decide a package's local fields
    pub fn set_concrete(&mut self, name: &str, chosen: ConcreteNode) -> Result<(), Conflict> {
        let Some(node) = self.node(name) else {
            return Ok(());
        };
        if !chosen.satisfies_local(&node.constraint) {
            return Err(Conflict::UnsatisfiedRequirement {
                package: name.to_string(),
                chosen: chosen.to_string(),
                required_constraint: node.constraint.to_string(),
                required_by: node
                    .origins
                    .last()
                    .map(|o| o.requirer.clone())
                    .unwrap_or_default(),
            });
        }
        if let Some(node) = self.node_mut(name) {
            node.concrete = Some(ConcreteNode {
                dependencies: BTreeMap::new(),
                ..chosen
            });
        }
        Ok(())
    }

    /// Fix a previously installed (or external) subgraph into the assignment
    pub fn pin_graph(&mut self, ctx: &Context, graph: &ConcreteGraph) -> Result<(), Conflict> {
        for (name, installed) in graph.nodes() {
            let local = ConcreteNode {
                dependencies: BTreeMap::new(),
                ..installed.clone()
            };

            if let Some(existing) = self.node(name) {
                match &existing.concrete {
                    Some(chosen) => {
                        if !existing.pinned || *chosen != local || existing.edges != installed.dependencies {
                            return Err(Conflict::UnsatisfiedRequirement {
                                package: name.clone(),
                                chosen: chosen.to_string(),
                                required_constraint: installed.to_string(),
                                required_by: format!("installed {}", graph.roots().join(", ")),
                            });
                        }
                        continue;
                    }
                    None => {
                        if !installed.satisfies_local(&existing.constraint) {
                            return Err(Conflict::UnsatisfiedRequirement {
                                package: name.clone(),
                                chosen: installed.to_string(),
                                required_constraint: existing.constraint.to_string(),
                                required_by: existing
                                    .origins
                                    .last()
                                    .map(|o| o.requirer.clone())
                                    .unwrap_or_default(),
                            });
                        }
                    }
                }
            } else {
                self.ensure_node(name);
                for origin in self.requirement_origins(name) {
                    if !installed.satisfies_local(&origin.spec) {
                        return Err(Conflict::UnsatisfiedRequirement {
                            package: name.clone(),
                            chosen: installed.to_string(),
                            required_constraint: origin.spec.to_string(),
                            required_by: origin.requirer,
                        });
                    }
                }
            }

            if let Some(node) = self.node_mut(name) {
                node.concrete = Some(local);
                node.pinned = true;
                node.edges = installed.dependencies.clone();
            }
        }

        for (name, installed) in graph.nodes() {
            for (target, edge) in &installed.dependencies {
                for virtual_name in &edge.virtuals {
                    self.pin_provider(ctx, virtual_name, name, target, edge.deptypes)?;
                }
            }
        }
        Ok(())
    }

    fn pin_provider(
        &mut self,
        ctx: &Context,
        virtual_name: &str,
        requester: &str,
        provider: &str,
        deptypes: DepTypes,
    ) -> Result<(), Conflict> {
        if !self.virtuals.contains_key(virtual_name) {
            let order = self.take_order();
            self.virtuals.insert(
                virtual_name.to_string(),
                Arc::new(VirtualState {
                    name: virtual_name.to_string(),
                    constraint: AbstractSpec::named(virtual_name),
                    origins: Vec::new(),
                    requesters: BTreeMap::new(),
                    provider: None,
                    order,
                }),
            );
            for origin in self.requirement_origins(virtual_name) {
                self.merge_virtual(ctx, virtual_name, &origin.spec, &origin.requirer)?;
            }
        }

        let current = self.virtual_state(virtual_name).and_then(|v| v.provider.clone());
        match current {
            Some(existing) if existing != provider => Err(Conflict::UnsatisfiedRequirement {
                package: virtual_name.to_string(),
                chosen: existing,
                required_constraint: provider.to_string(),
                required_by: format!("installed {}", requester),
            }),
            Some(_) => {
                if let Some(state) = self.virtual_mut(virtual_name) {
                    state.requesters.insert(requester.to_string(), deptypes);
                }
                Ok(())
            }
            None => {
                if let Some(state) = self.virtual_mut(virtual_name) {
                    state.requesters.insert(requester.to_string(), deptypes);
                    state.provider = Some(provider.to_string());
                }
                let others: Vec<(String, DepTypes)> = self
                    .virtual_state(virtual_name)
                    .map(|v| {
                        v.requesters
                            .iter()
                            .filter(|(r, _)| *r != requester)
                            .map(|(r, t)| (r.clone(), *t))
                            .collect()
                    })
                    .unwrap_or_default();
                for (other, types) in others {
                    self.add_edge(&other, provider, types, Some(virtual_name))?;
                }
                Ok(())
            }
        }
    }

    /// Evaluate a `when` condition for a decided package
    ///
    /// `^dep` parts are checked against the package's direct dependencies.
    /// A dependency that is missing is undecided until `settled`, since a
    /// later declaration may still add it.
    pub fn condition_truth(&self, name: &str, when: &AbstractSpec, settled: bool) -> Truth {
        let Some(node) = self.node(name) else {
            return Truth::Unknown;
        };
        let Some(chosen) = &node.concrete else {
            return condition::evaluate_local(when, &node.constraint);
        };

        let mut truth = Truth::from_bool(condition::evaluate_concrete(when, chosen));
        for (dep_name, constraint) in &when.dependencies {
            let target = if node.edges.contains_key(dep_name) {
                Some((dep_name.as_str(), false))
            } else {
                node.edges
                    .iter()
                    .find(|(_, edge)| edge.virtuals.contains(dep_name))
                    .map(|(t, _)| (t.as_str(), true))
            };
            let part = match target {
                None if settled => Truth::False,
                None => Truth::Unknown,
                Some((target, via_virtual)) => {
                    match self.node(target).and_then(|n| n.concrete.as_ref()) {
                        None => Truth::Unknown,
                        Some(dep) => {
                            let wanted = if via_virtual {
                                provider_view(&constraint.spec)
                            } else {
                                constraint.spec.without_dependencies()
                            };
                            Truth::from_bool(dep.satisfies_local(&wanted))
                        }
                    }
                }
            };
            truth = truth.and(part);
        }
        truth
    }

    /// Expand every dependency declaration whose condition now holds
    ///
    /// Returns true if anything was expanded.
    pub fn propagate(&mut self, ctx: &Context, settled: bool) -> Result<bool, Conflict> {
        let mut any = false;
        loop {
            let mut changed = false;
            let decided: Vec<String> = self
                .nodes()
                .filter(|n| n.concrete.is_some() && !n.pinned)
                .map(|n| n.name.clone())
                .collect();

            for name in decided {
                let Some(recipe) = ctx.repo.recipe(&name) else { continue };
                for (index, decl) in recipe.dependencies.iter().enumerate() {
                    let done = self
                        .node(&name)
                        .is_some_and(|n| n.resolved_decls.contains(&index));
                    if done {
                        continue;
                    }
                    let truth = self.condition_truth(&name, &decl.when, settled);
                    if truth == Truth::Unknown {
                        continue;
                    }
                    if let Some(node) = self.node_mut(&name) {
                        node.resolved_decls.insert(index);
                    }
                    if truth.is_true() {
                        self.add_dependency(ctx, &name, decl)?;
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
            any = true;
        }

        self.check_recipe_conflicts(ctx, settled)?;
        Ok(any)
    }

    /// Fail if a decided package matches one of its recipe's conflicts
    pub fn check_recipe_conflicts(&self, ctx: &Context, settled: bool) -> Result<(), Conflict> {
        for node in self.nodes() {
            let Some(chosen) = &node.concrete else { continue };
            if node.pinned && !chosen.is_external() {
                continue;
            }
            let Some(recipe) = ctx.repo.recipe(&node.name) else { continue };
            for decl in &recipe.conflicts {
                let truth = self
                    .condition_truth(&node.name, &decl.when, settled)
                    .and(self.condition_truth(&node.name, &decl.spec, settled));
                if truth.is_true() {
                    return Err(Conflict::RecipeConflict {
                        package: node.name.clone(),
                        chosen: chosen.to_string(),
                        spec: decl.spec.to_string(),
                        msg: decl.msg.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Final checks once every package is decided; returns the graph's nodes
    pub fn finish(&self, ctx: &Context) -> Result<BTreeMap<String, ConcreteNode>, Conflict> {
        for state in self.virtuals() {
            let Some(provider) = &state.provider else {
                return Err(Conflict::NoProvider {
                    virtual_name: state.name.clone(),
                    constraint: state.constraint.to_string(),
                    required_by: state.requesters.keys().cloned().collect(),
                });
            };
            if !self.provides_compatible(ctx, provider, &state.name, &state.constraint.versions) {
                return Err(Conflict::NoProvider {
                    virtual_name: state.name.clone(),
                    constraint: state.constraint.to_string(),
                    required_by: state.requesters.keys().cloned().collect(),
                });
            }
        }

        for (name, requirement) in self.requirements.iter() {
            let present = self.nodes.contains_key(name) || self.virtuals.contains_key(name);
            if requirement.must_appear && !present {
                return Err(Conflict::UnusedRequirement {
                    package: name.clone(),
                    required_by: requirement
                        .origins
                        .first()
                        .map(|o| o.requirer.clone())
                        .unwrap_or_default(),
                });
            }
        }

        let mut nodes = BTreeMap::new();
        for node in self.nodes() {
            let Some(chosen) = &node.concrete else {
                return Err(Conflict::NoCandidates {
                    package: node.name.clone(),
                    constraint: node.constraint.to_string(),
                    reason: "left undecided".to_string(),
                });
            };
            nodes.insert(
                node.name.clone(),
                ConcreteNode {
                    dependencies: node.edges.clone(),
                    ..chosen.clone()
                },
            );
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryRepository;
    use crate::spec::{Arch, CompilerSpec};
    use crate::version::Version;

    fn repo() -> InMemoryRepository {
        let mut repo = InMemoryRepository::new();
        repo.add_toml(
            r#"
[package]
name = "app"
[[versions]]
version = "1.0"
[[variants]]
name = "mpi"
default = false
[[depends_on]]
spec = "libfoo@1.0:1.5"
[[depends_on]]
spec = "mpi"
when = "+mpi"
"#,
        )
        .unwrap();
        repo.add_toml(
            "[package]\nname = \"libfoo\"\n[[versions]]\nversion = \"2.0\"\n[[versions]]\nversion = \"1.0\"\n",
        )
        .unwrap();
        repo.add_toml(
            "[package]\nname = \"mpich\"\n[[versions]]\nversion = \"4.1\"\n[[provides]]\nspec = \"mpi@:4\"\n",
        )
        .unwrap();
        repo
    }

    fn prefs() -> Preferences {
        Preferences::new(Vec::new(), Arch::new("linux", "ubuntu22.04", "x86_64"))
    }

    fn node(name: &str, version: &str, variants: &[(&str, bool)]) -> ConcreteNode {
        ConcreteNode {
            name: name.to_string(),
            version: Version::parse(version).unwrap(),
            variants: variants
                .iter()
                .map(|(k, v)| (k.to_string(), VariantValue::Bool(*v)))
                .collect(),
            compiler: CompilerSpec::parse("gcc@11.4.0").unwrap(),
            arch: Arch::new("linux", "ubuntu22.04", "x86_64"),
            dependencies: BTreeMap::new(),
            external: None,
        }
    }

    fn spec(s: &str) -> AbstractSpec {
        AbstractSpec::parse(s).unwrap()
    }

    #[test]
    fn test_version_conflict_names_both_requirers() {
        let repo = repo();
        let cache = RepoCache::new(&repo);
        let prefs = prefs();
        let ctx = Context { repo: &cache, prefs: &prefs };

        let mut state = State::default();
        state.constrain(&ctx, "app", &spec("app"), "request").unwrap();
        state.constrain(&ctx, "libfoo", &spec("libfoo@2.0"), "request").unwrap();
        state.set_concrete("app", node("app", "1.0", &[("mpi", false)])).unwrap();

        let err = state.propagate(&ctx, false).unwrap_err();
        match err {
            Conflict::ConflictingConstraints { package, field, constraints } => {
                assert_eq!(package, "libfoo");
                assert_eq!(field, "version");
                assert_eq!(
                    constraints,
                    vec![
                        ("request".to_string(), "libfoo@2.0".to_string()),
                        ("app@1.0".to_string(), "libfoo@1.0:1.5".to_string()),
                    ]
                );
            }
            other => panic!("unexpected conflict: {:?}", other),
        }
    }

    #[test]
    fn test_checkpoint_restore() {
        let repo = repo();
        let cache = RepoCache::new(&repo);
        let prefs = prefs();
        let ctx = Context { repo: &cache, prefs: &prefs };

        let mut state = State::default();
        state.constrain(&ctx, "app", &spec("app"), "request").unwrap();
        let checkpoint = state.clone();

        state.set_concrete("app", node("app", "1.0", &[("mpi", true)])).unwrap();
        assert!(state.propagate(&ctx, false).unwrap());
        assert!(state.node("libfoo").is_some());
        assert!(state.virtual_state("mpi").is_some());

        state = checkpoint;
        assert!(state.node("libfoo").is_none());
        assert!(state.node("app").unwrap().concrete.is_none());
    }

    #[test]
    fn test_virtual_provider_edges() {
        let repo = repo();
        let cache = RepoCache::new(&repo);
        let prefs = prefs();
        let ctx = Context { repo: &cache, prefs: &prefs };

        let mut state = State::default();
        state.constrain(&ctx, "app", &spec("app+mpi"), "request").unwrap();
        state.set_concrete("app", node("app", "1.0", &[("mpi", true)])).unwrap();
        state.propagate(&ctx, false).unwrap();

        state.choose_provider(&ctx, "mpi", "mpich", 0).unwrap();
        let edge = &state.node("app").unwrap().edges["mpich"];
        assert!(edge.virtuals.contains("mpi"));
        assert_eq!(state.virtual_state("mpi").unwrap().provider.as_deref(), Some("mpich"));
    }

    #[test]
    fn test_invalid_variant_and_missing_package() {
        let repo = repo();
        let cache = RepoCache::new(&repo);
        let prefs = prefs();
        let ctx = Context { repo: &cache, prefs: &prefs };

        let mut state = State::default();
        assert!(matches!(
            state.constrain(&ctx, "app", &spec("app+cuda"), "request"),
            Err(Conflict::InvalidVariant { .. })
        ));
        assert!(matches!(
            state.constrain(&ctx, "nope", &spec("nope"), "request"),
            Err(Conflict::MissingPackage { .. })
        ));
    }

    #[test]
    fn test_unused_requirement() {
        let repo = repo();
        let cache = RepoCache::new(&repo);
        let prefs = prefs();
        let ctx = Context { repo: &cache, prefs: &prefs };

        let mut state = State::default();
        state.add_requirement(&ctx, "zlib", &spec("zlib@1.3"), "request", true).unwrap();
        assert!(matches!(state.finish(&ctx), Err(Conflict::UnusedRequirement { .. })));
    }
}
