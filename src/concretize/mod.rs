// src/concretize/mod.rs

//! Concretization: abstract specs to a fully decided dependency graph
//!
//! The concretizer runs a depth-first search over decisions. Each decision
//! fixes one package's local fields (or one virtual's provider); after every
//! decision the dependency declarations whose conditions now hold are
//! expanded, which adds new packages and tightens constraints. A conflict
//! restores the checkpoint taken before the decision and tries its next
//! candidate.
//!
//! Decisions are taken most-constrained first: the undecided package or
//! virtual with the fewest candidates, ties broken by discovery order.
//! Candidate order (see [`candidates`]) implements the preference policy,
//! so the first complete assignment found is the preferred one.

mod candidates;
mod conflict;
mod state;

pub use candidates::{Candidate, MAX_VARIANT_COMBINATIONS};
pub use conflict::{Conflict, ResolutionFailure};

use crate::config::Preferences;
use crate::error::{Error, Result};
use crate::repo::RepoCache;
use crate::spec::{AbstractSpec, ConcreteGraph};
use state::{Context, State};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Most conflicts kept for the final report
const MAX_REPORTED_CONFLICTS: usize = 8;

/// Requirer label for constraints typed by the user
const REQUEST: &str = "request";

/// Access to already-installed concrete specs, for reuse
pub trait InstalledLookup {
    /// Installed subgraphs rooted at a package with this name
    fn installed(&self, name: &str) -> Result<Vec<ConcreteGraph>>;
}

/// Search settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcretizeOptions {
    /// Prefer installed specs over fresh builds
    pub reuse: bool,
    /// Candidate applications before the search gives up
    pub max_steps: usize,
}

impl Default for ConcretizeOptions {
    fn default() -> Self {
        Self {
            reuse: true,
            max_steps: 100_000,
        }
    }
}

#[derive(Debug, Clone)]
enum Decision {
    Package(String),
    Provider(String),
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Package(name) => write!(f, "{}", name),
            Decision::Provider(name) => write!(f, "provider of {}", name),
        }
    }
}

struct Frame {
    checkpoint: State,
    decision: Decision,
    candidates: Vec<Candidate>,
    next: usize,
}

/// Conflicts seen at the deepest point of the search
#[derive(Default)]
struct Deepest {
    depth: usize,
    conflicts: Vec<Conflict>,
}

impl Deepest {
    fn record(&mut self, depth: usize, conflict: Conflict) {
        if self.conflicts.is_empty() || depth > self.depth {
            self.depth = depth;
            self.conflicts = vec![conflict];
        } else if depth == self.depth
            && self.conflicts.len() < MAX_REPORTED_CONFLICTS
            && !self.conflicts.contains(&conflict)
        {
            self.conflicts.push(conflict);
        }
    }
}

/// Resolves abstract specs against a recipe repository and preferences
pub struct Concretizer<'a> {
    repo: &'a RepoCache<'a>,
    prefs: &'a Preferences,
    installed: Option<&'a dyn InstalledLookup>,
    options: ConcretizeOptions,
    installed_cache: RefCell<HashMap<String, Arc<Vec<ConcreteGraph>>>>,
}

/// One running search over a set of roots
struct Search<'c> {
    ctx: Context<'c>,
    roots: Vec<String>,
    stack: Vec<Frame>,
    steps: usize,
    max_steps: usize,
    deepest: Deepest,
}

impl Search<'_> {
    fn failure(&mut self, extra: Option<Conflict>) -> Error {
        let mut conflicts = std::mem::take(&mut self.deepest.conflicts);
        conflicts.extend(extra);
        Error::Unsatisfiable(Box::new(ResolutionFailure {
            roots: self.roots.clone(),
            conflicts,
            steps: self.steps,
        }))
    }

    /// Apply the next untried candidate of the innermost decision,
    /// popping exhausted decisions
    ///
    /// Returns the resulting state, or `None` once every branch is exhausted.
    fn advance(&mut self) -> Result<Option<State>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            if frame.next >= frame.candidates.len() {
                self.stack.pop();
                continue;
            }
            let index = frame.next;
            frame.next += 1;
            self.steps += 1;
            if self.steps > self.max_steps {
                let steps = self.max_steps;
                return Err(self.failure(Some(Conflict::StepLimit { steps })));
            }

            let depth = self.stack.len();
            let frame = &self.stack[depth - 1];
            let candidate = &frame.candidates[index];
            debug!("Trying {} for {}", candidate, frame.decision);
            let mut next = frame.checkpoint.clone();
            let applied = apply(&self.ctx, &mut next, &frame.decision, candidate)
                .and_then(|_| next.propagate(&self.ctx, false));
            match applied {
                Ok(_) => return Ok(Some(next)),
                Err(conflict) => {
                    debug!("Rejected {}: {}", candidate, conflict.to_string().trim_end());
                    self.deepest.record(depth, conflict);
                }
            }
        }
    }
}

fn apply(
    ctx: &Context,
    state: &mut State,
    decision: &Decision,
    candidate: &Candidate,
) -> std::result::Result<(), Conflict> {
    match (decision, candidate) {
        (Decision::Package(name), Candidate::Build(node)) => {
            state.set_concrete(name, node.clone())
        }
        (Decision::Package(_), Candidate::Reuse(graph) | Candidate::External(graph)) => {
            state.pin_graph(ctx, graph)
        }
        (Decision::Provider(virtual_name), Candidate::Provider { package, decl }) => {
            state.choose_provider(ctx, virtual_name, package, *decl)
        }
        (decision, candidate) => Err(Conflict::NoCandidates {
            package: decision.to_string(),
            constraint: String::new(),
            reason: format!("{} cannot decide this", candidate),
        }),
    }
}

/// Every `^dep` in a spec, nested ones included, as local constraints
fn dependency_requirements(spec: &AbstractSpec, out: &mut Vec<(String, AbstractSpec)>) {
    for (name, dep) in &spec.dependencies {
        out.push((name.clone(), dep.spec.without_dependencies()));
        dependency_requirements(&dep.spec, out);
    }
}

impl<'a> Concretizer<'a> {
    pub fn new(repo: &'a RepoCache<'a>, prefs: &'a Preferences) -> Self {
        Self {
            repo,
            prefs,
            installed: None,
            options: ConcretizeOptions::default(),
            installed_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Consult installed specs for reuse
    pub fn with_installed(mut self, installed: &'a dyn InstalledLookup) -> Self {
        self.installed = Some(installed);
        self
    }

    pub fn with_options(mut self, options: ConcretizeOptions) -> Self {
        self.options = options;
        self
    }

    fn installed_for(&self, name: &str) -> Result<Arc<Vec<ConcreteGraph>>> {
        let Some(lookup) = self.installed.filter(|_| self.options.reuse) else {
            return Ok(Arc::new(Vec::new()));
        };
        if let Some(found) = self.installed_cache.borrow().get(name) {
            return Ok(Arc::clone(found));
        }
        let found = Arc::new(lookup.installed(name)?);
        self.installed_cache
            .borrow_mut()
            .insert(name.to_string(), Arc::clone(&found));
        Ok(found)
    }

    /// Concretize a single root spec
    pub fn concretize_one(&self, spec: &AbstractSpec) -> Result<ConcreteGraph> {
        self.concretize(std::slice::from_ref(spec))
    }

    /// Concretize several roots together into one unified graph
    ///
    /// Each package name appears at most once in the result, so the roots
    /// share every common dependency.
    pub fn concretize(&self, roots: &[AbstractSpec]) -> Result<ConcreteGraph> {
        if roots.is_empty() {
            return Err(Error::ParseError("Nothing to concretize".to_string()));
        }
        if self.prefs.compilers().is_empty() {
            return Err(Error::Config(
                "No compilers configured; add a [[compilers]] entry to the configuration"
                    .to_string(),
            ));
        }

        let mut root_names = Vec::with_capacity(roots.len());
        for root in roots {
            let name = root.require_name()?;
            if self.repo.recipe(name).is_none() {
                if self.repo.is_virtual(name) {
                    return Err(Error::NotFound(format!(
                        "{} is a virtual package; request one of its providers instead",
                        name
                    )));
                }
                return Err(Error::NotFound(format!("Unknown package: {}", name)));
            }
            if !root_names.iter().any(|n| n == name) {
                root_names.push(name.to_string());
            }
        }

        let mut search = Search {
            ctx: Context {
                repo: self.repo,
                prefs: self.prefs,
            },
            roots: root_names.clone(),
            stack: Vec::new(),
            steps: 0,
            max_steps: self.options.max_steps,
            deepest: Deepest::default(),
        };

        let mut state = State::default();
        let seeded = self.seed(&search.ctx, &mut state, roots);
        if let Err(conflict) = seeded {
            return Err(search.failure(Some(conflict)));
        }

        loop {
            match self.next_decision(&search.ctx, &state)? {
                Some((decision, Ok(candidates))) => {
                    debug!("Deciding {} among {} candidates", decision, candidates.len());
                    search.stack.push(Frame {
                        checkpoint: state.clone(),
                        decision,
                        candidates,
                        next: 0,
                    });
                }
                Some((_, Err(conflict))) => {
                    let depth = search.stack.len() + 1;
                    search.deepest.record(depth, conflict);
                }
                None => match state.propagate(&search.ctx, true) {
                    Ok(true) => continue,
                    Ok(false) => match state.finish(&search.ctx) {
                        Ok(nodes) => {
                            let graph = ConcreteGraph::new(root_names.clone(), nodes)?;
                            match unmet_root(&graph, roots) {
                                None => {
                                    info!(
                                        "Concretized {} into {} packages after {} steps",
                                        root_names.join(", "),
                                        graph.len(),
                                        search.steps
                                    );
                                    return Ok(graph);
                                }
                                Some(conflict) => {
                                    let depth = search.stack.len();
                                    search.deepest.record(depth, conflict);
                                }
                            }
                        }
                        Err(conflict) => {
                            let depth = search.stack.len();
                            search.deepest.record(depth, conflict);
                        }
                    },
                    Err(conflict) => {
                        let depth = search.stack.len();
                        search.deepest.record(depth, conflict);
                    }
                },
            }

            match search.advance()? {
                Some(next) => state = next,
                None => return Err(search.failure(None)),
            }
        }
    }

    fn seed(
        &self,
        ctx: &Context,
        state: &mut State,
        roots: &[AbstractSpec],
    ) -> std::result::Result<(), Conflict> {
        for root in roots {
            let Some(name) = root.name.as_deref() else { continue };
            state.constrain(ctx, name, &root.without_dependencies(), REQUEST)?;
            let mut required = Vec::new();
            dependency_requirements(root, &mut required);
            for (dep, spec) in required {
                state.add_requirement(ctx, &dep, &spec, REQUEST, true)?;
            }
        }
        state.propagate(ctx, false).map(|_| ())
    }

    /// The most constrained open decision with its candidates
    #[allow(clippy::type_complexity)]
    fn next_decision(
        &self,
        ctx: &Context,
        state: &State,
    ) -> Result<Option<(Decision, std::result::Result<Vec<Candidate>, Conflict>)>> {
        let mut best: Option<(usize, usize, String, bool)> = None;
        let mut consider = |estimate: usize, order: usize, name: &str, is_virtual: bool| {
            let key = (estimate, order, name.to_string(), is_virtual);
            if best.as_ref().is_none_or(|b| key < *b) {
                best = Some(key);
            }
        };

        for node in state.nodes().filter(|n| n.concrete.is_none()) {
            let installed = self.installed_for(&node.name)?;
            consider(
                candidates::estimate(ctx, node, installed.len()),
                node.order,
                &node.name,
                false,
            );
        }
        for virtual_state in state.virtuals().filter(|v| v.provider.is_none()) {
            let count = candidates::provider_candidates(ctx, state, &virtual_state.name).len();
            consider(count, virtual_state.order, &virtual_state.name, true);
        }

        let Some((_, _, name, is_virtual)) = best else {
            return Ok(None);
        };
        if is_virtual {
            let found = candidates::provider_candidates(ctx, state, &name);
            let result = match state.virtual_state(&name) {
                Some(v) if found.is_empty() => Err(Conflict::NoProvider {
                    virtual_name: name.clone(),
                    constraint: v.constraint.to_string(),
                    required_by: v.requesters.keys().cloned().collect(),
                }),
                _ => Ok(found),
            };
            return Ok(Some((Decision::Provider(name), result)));
        }

        let installed = self.installed_for(&name)?;
        let result = match state.node(&name) {
            Some(node) => candidates::node_candidates(ctx, state, node, &installed),
            None => Ok(Vec::new()),
        };
        Ok(Some((Decision::Package(name), result)))
    }
}

/// A root request the finished graph fails to meet
fn unmet_root(graph: &ConcreteGraph, roots: &[AbstractSpec]) -> Option<Conflict> {
    roots.iter().find_map(|root| {
        let name = root.name.as_deref()?;
        let spec = graph.spec(name)?;
        (!spec.satisfies(root)).then(|| Conflict::UnsatisfiedRequirement {
            package: name.to_string(),
            chosen: spec.node().to_string(),
            required_constraint: root.to_string(),
            required_by: REQUEST.to_string(),
        })
    })
}
