// src/build/orchestrator.rs

//! Parallel installation of a concrete graph
//!
//! The calling thread dispatches; a rayon pool of `jobs` threads runs the
//! builds. A node is dispatched once every direct dependency holds a
//! database record, and each finished build reports back over a channel.
//!
//! Per node, in order:
//! 1. already recorded: reused, the callback is never invoked
//! 2. external: recorded at its site prefix, never built
//! 3. otherwise claimed with an in-progress marker, built into a fresh
//!    prefix from a private stage, then recorded
//!
//! While a build runs its marker is refreshed every quarter of the claim
//! timeout, so only a dead builder's marker ever goes stale. A prefix is
//! only ever removed by the current holder of its marker, and a builder
//! that loses the race to record a hash reuses the winner's install.
//!
//! The database lock is only taken for lookups, claims and records, never
//! across a build. A failed node blocks all of its transitive dependents;
//! unrelated branches keep going and their installs stay recorded.
//! Cancellation stops dispatching, discards whatever in-flight builds
//! produce and leaves no record behind.

use super::callback::{BuildCallback, BuildRequest};
use super::environment::BuildEnvironment;
use super::graph::BuildGraph;
use super::layout::InstallLayout;
use super::report::{InstallReport, NodeOutcome, NodeReport};
use crate::config::AvailableCompiler;
use crate::db::{Claim, InstallDatabase};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::progress::{ProgressTracker, SilentProgress};
use crate::spec::ConcreteGraph;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often a builder waiting on another holder's claim checks again
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lower bound on how often a running build refreshes its claim
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Installer settings
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Parallel builds
    pub jobs: usize,
    /// Keep stage directories of successful builds
    pub keep_stage: bool,
    /// Parent of the per-build stage directories
    pub stage_root: PathBuf,
    pub poll_interval: Duration,
}

impl InstallOptions {
    pub fn new(stage_root: impl Into<PathBuf>) -> Self {
        Self {
            jobs: 1,
            keep_stage: false,
            stage_root: stage_root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_keep_stage(mut self, keep: bool) -> Self {
        self.keep_stage = keep;
        self
    }
}

/// Install status of one node before anything runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStatus {
    Installed,
    External,
    Build,
}

/// One line of a dry-run schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNode {
    pub name: String,
    pub hash: Hash,
    pub prefix: PathBuf,
    pub status: PlanStatus,
}

/// Installs concrete graphs into a layout, recording them in a database
pub struct Installer {
    db: InstallDatabase,
    layout: InstallLayout,
    callback: Arc<dyn BuildCallback>,
    compilers: Vec<AvailableCompiler>,
    options: InstallOptions,
    progress: Arc<dyn ProgressTracker>,
    cancel: Arc<AtomicBool>,
    holder: String,
}

/// What the dispatcher decided for a ready node
enum Dispatch {
    Done(NodeOutcome),
    Build(BuildJob),
}

/// What a worker reports back
#[derive(Debug)]
enum WorkerResult {
    Built,
    /// Someone else recorded it while we waited on their claim
    AlreadyInstalled(PathBuf),
    Failed(String),
    Cancelled,
}

impl Installer {
    pub fn new(
        db: InstallDatabase,
        layout: InstallLayout,
        callback: Arc<dyn BuildCallback>,
        options: InstallOptions,
    ) -> Self {
        Self {
            db,
            layout,
            callback,
            compilers: Vec::new(),
            options,
            progress: Arc::new(SilentProgress::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            holder: format!("{}-{}", std::process::id(), uuid::Uuid::new_v4()),
        }
    }

    /// Compilers whose paths are exported to builds
    pub fn with_compilers(mut self, compilers: Vec<AvailableCompiler>) -> Self {
        self.compilers = compilers;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// Flag that cancels a running install when set
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// The schedule `install` would follow, without touching anything
    pub fn plan(&self, graph: &ConcreteGraph) -> Result<Vec<PlannedNode>> {
        let order = BuildGraph::from_concrete(graph).topological_sort()?;
        let hashes = graph.dag_hashes();
        let mut plan = Vec::with_capacity(order.len());
        for name in order {
            let spec = graph
                .spec(&name)
                .ok_or_else(|| Error::NotFound(format!("{} is not part of the graph", name)))?;
            let hash = hashes[&name].clone();
            let (status, prefix) = match self.db.lookup(&hash)? {
                Some(record) => (PlanStatus::Installed, record.prefix),
                None if spec.node().is_external() => {
                    (PlanStatus::External, self.layout.prefix_for(&spec))
                }
                None => (PlanStatus::Build, self.layout.prefix_for(&spec)),
            };
            plan.push(PlannedNode {
                name,
                hash,
                prefix,
                status,
            });
        }
        Ok(plan)
    }

    /// Install every node; fails with `BuildFailed` or `Cancelled` when
    /// not every node made it
    pub fn install(&self, graph: &ConcreteGraph) -> Result<InstallReport> {
        self.execute(graph)?.into_result()
    }

    /// Install every node and report each outcome
    ///
    /// Only setup problems are returned as errors; per-node failures are in
    /// the report.
    pub fn execute(&self, graph: &ConcreteGraph) -> Result<InstallReport> {
        let graph = Arc::new(graph.clone());
        let build_graph = BuildGraph::from_concrete(&graph);
        let order = build_graph.topological_sort()?;
        let hashes = graph.dag_hashes();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .thread_name(|i| format!("spackle-build-{}", i))
            .build()
            .map_err(|e| Error::IoError(format!("Failed to start build workers: {}", e)))?;
        let (tx, rx) = mpsc::channel::<(String, WorkerResult)>();

        info!(
            "Installing {} package(s) with {} job(s)",
            order.len(),
            self.options.jobs
        );
        self.progress.set_length(order.len() as u64);

        let mut pending = build_graph.pending_counts();
        let mut ready: BTreeSet<String> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| name.clone())
            .collect();
        let mut outcomes: BTreeMap<String, NodeOutcome> = BTreeMap::new();
        let mut prefixes: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut running: BTreeMap<String, PathBuf> = BTreeMap::new();

        loop {
            while let Some(name) = ready.pop_first() {
                if self.is_cancelled() {
                    self.finish_node(&name, NodeOutcome::Cancelled, &mut outcomes);
                    continue;
                }
                let dispatch = self
                    .dispatch(&graph, &name, &hashes[&name], &prefixes)
                    .unwrap_or_else(|e| {
                        Dispatch::Done(NodeOutcome::Failed {
                            message: e.to_string(),
                        })
                    });
                match dispatch {
                    Dispatch::Done(outcome) => {
                        let outcome = self.settle(&name, outcome, &build_graph, &mut outcomes);
                        if let Some(prefix) = outcome {
                            self.release_dependents(
                                &name,
                                prefix,
                                &build_graph,
                                &mut pending,
                                &mut prefixes,
                                &mut ready,
                                &outcomes,
                            );
                        }
                    }
                    Dispatch::Build(job) => {
                        self.progress.set_message(&format!("Building {}", name));
                        running.insert(name.clone(), job.prefix.clone());
                        let tx = tx.clone();
                        pool.spawn(move || {
                            let name = job.name.clone();
                            let result = job.run();
                            let _ = tx.send((name, result));
                        });
                    }
                }
            }

            if running.is_empty() {
                break;
            }
            let Ok((name, result)) = rx.recv() else {
                break;
            };
            let prefix = running.remove(&name).unwrap_or_default();
            let outcome = self.complete(&graph, &name, &hashes[&name], prefix, result);
            let outcome = self.settle(&name, outcome, &build_graph, &mut outcomes);
            if let Some(prefix) = outcome {
                self.release_dependents(
                    &name,
                    prefix,
                    &build_graph,
                    &mut pending,
                    &mut prefixes,
                    &mut ready,
                    &outcomes,
                );
            }
        }

        let cancelled = self.is_cancelled();
        let nodes: Vec<NodeReport> = order
            .into_iter()
            .map(|name| {
                let outcome = outcomes.remove(&name).unwrap_or(NodeOutcome::Cancelled);
                if !cancelled && outcome == NodeOutcome::Cancelled {
                    warn!("{} was never scheduled", name);
                }
                NodeReport {
                    hash: hashes[&name].clone(),
                    name,
                    outcome,
                }
            })
            .collect();
        let report = InstallReport { nodes };

        if report.is_success() {
            self.progress
                .finish_with_message(&format!("Installed {} package(s)", report.nodes.len()));
        } else if cancelled {
            self.progress.finish_with_error("Install cancelled");
        } else {
            self.progress.finish_with_error("Install failed");
        }
        Ok(report)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Decide what to do with a node whose dependencies are all recorded
    fn dispatch(
        &self,
        graph: &Arc<ConcreteGraph>,
        name: &str,
        hash: &Hash,
        prefixes: &BTreeMap<String, PathBuf>,
    ) -> Result<Dispatch> {
        let spec = graph
            .spec(name)
            .ok_or_else(|| Error::NotFound(format!("{} is not part of the graph", name)))?;
        let explicit = graph.roots().iter().any(|root| root == name);

        if let Some(record) = self.db.lookup(hash)? {
            debug!("{}/{} already installed", name, hash.short());
            if explicit && !record.explicit {
                self.db.mark_explicit(hash)?;
            }
            return Ok(Dispatch::Done(NodeOutcome::Reused {
                prefix: record.prefix,
            }));
        }

        if let Some(external) = &spec.node().external {
            match self.db.record(graph, name, external, explicit) {
                Ok(_) | Err(Error::AlreadyInstalled(_)) => {}
                Err(e) => return Err(e),
            }
            return Ok(Dispatch::Done(NodeOutcome::External {
                prefix: external.clone(),
            }));
        }

        let dependency_prefixes: BTreeMap<String, PathBuf> = spec
            .dependencies()
            .filter_map(|(dep, _)| {
                prefixes
                    .get(dep.name())
                    .map(|prefix| (dep.name().to_string(), prefix.clone()))
            })
            .collect();
        let compiler = self
            .compilers
            .iter()
            .find(|c| c.spec == spec.node().compiler)
            .cloned();

        Ok(Dispatch::Build(BuildJob {
            name: name.to_string(),
            hash: hash.clone(),
            graph: Arc::clone(graph),
            prefix: self.layout.prefix_for(&spec),
            dependency_prefixes,
            compiler,
            db: self.db.clone(),
            layout: self.layout.clone(),
            callback: Arc::clone(&self.callback),
            options: self.options.clone(),
            cancel: Arc::clone(&self.cancel),
            holder: self.holder.clone(),
        }))
    }

    /// Turn a worker result into an outcome, recording successful builds
    fn complete(
        &self,
        graph: &ConcreteGraph,
        name: &str,
        hash: &Hash,
        prefix: PathBuf,
        result: WorkerResult,
    ) -> NodeOutcome {
        match result {
            WorkerResult::Built => {
                let explicit = graph.roots().iter().any(|root| root == name);
                match self.db.record(graph, name, &prefix, explicit) {
                    Ok(_) => NodeOutcome::Installed { prefix },
                    Err(Error::AlreadyInstalled(_)) => {
                        // The recorded prefix is the winner's; leave it alone
                        info!("{}/{} was recorded by another builder", name, hash.short());
                        if let Err(e) = self.db.release(hash, &self.holder) {
                            warn!("Failed to release claim on {}: {}", hash.short(), e);
                        }
                        match self.db.lookup(hash) {
                            Ok(Some(record)) => NodeOutcome::Reused {
                                prefix: record.prefix,
                            },
                            _ => NodeOutcome::Reused { prefix },
                        }
                    }
                    Err(e) => {
                        warn!("Failed to record {}/{}: {}", name, hash.short(), e);
                        discard(&self.db, &self.layout, &self.holder, name, hash, &prefix);
                        NodeOutcome::Failed {
                            message: e.to_string(),
                        }
                    }
                }
            }
            WorkerResult::AlreadyInstalled(prefix) => NodeOutcome::Reused { prefix },
            WorkerResult::Failed(message) => NodeOutcome::Failed { message },
            WorkerResult::Cancelled => NodeOutcome::Cancelled,
        }
    }

    /// Store an outcome; failures block every transitive dependent.
    /// Returns the prefix when dependents may proceed.
    fn settle(
        &self,
        name: &str,
        outcome: NodeOutcome,
        build_graph: &BuildGraph,
        outcomes: &mut BTreeMap<String, NodeOutcome>,
    ) -> Option<PathBuf> {
        let prefix = outcome.prefix().cloned();
        if let NodeOutcome::Failed { message } = &outcome {
            warn!("Build of {} failed: {}", name, message);
            for dependent in build_graph.transitive_dependents(name) {
                if !outcomes.contains_key(&dependent) {
                    info!("Skipping {}: blocked by {}", dependent, name);
                    self.finish_node(
                        &dependent,
                        NodeOutcome::Blocked {
                            by: name.to_string(),
                        },
                        outcomes,
                    );
                }
            }
        }
        self.finish_node(name, outcome, outcomes);
        prefix
    }

    fn finish_node(&self, name: &str, outcome: NodeOutcome, outcomes: &mut BTreeMap<String, NodeOutcome>) {
        debug!("{}: {}", name, outcome);
        self.progress.increment(1);
        outcomes.insert(name.to_string(), outcome);
    }

    #[allow(clippy::too_many_arguments)]
    fn release_dependents(
        &self,
        name: &str,
        prefix: PathBuf,
        build_graph: &BuildGraph,
        pending: &mut BTreeMap<String, usize>,
        prefixes: &mut BTreeMap<String, PathBuf>,
        ready: &mut BTreeSet<String>,
        outcomes: &BTreeMap<String, NodeOutcome>,
    ) {
        prefixes.insert(name.to_string(), prefix);
        let Some(dependents) = build_graph.dependents(name) else {
            return;
        };
        for dependent in dependents {
            if let Some(count) = pending.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 && !outcomes.contains_key(dependent) {
                    ready.insert(dependent.clone());
                }
            }
        }
    }
}

/// Remove a prefix that will not be recorded and drop the claim on it
///
/// The prefix is left in place when `holder` no longer owns the marker,
/// since it now belongs to whoever took the claim over.
fn discard(
    db: &InstallDatabase,
    layout: &InstallLayout,
    holder: &str,
    name: &str,
    hash: &Hash,
    prefix: &Path,
) {
    match db.refresh_claim(hash, holder) {
        Ok(true) => {
            if let Err(e) = layout.remove_prefix(prefix) {
                warn!("Failed to discard {} prefix: {}", name, e);
            }
        }
        Ok(false) => debug!("Leaving {} prefix to the current claim holder", name),
        Err(e) => warn!("Failed to check claim on {}: {}", hash.short(), e),
    }
    if let Err(e) = db.release(hash, holder) {
        warn!("Failed to release claim on {}: {}", hash.short(), e);
    }
}

/// One build, owned by a worker thread
struct BuildJob {
    name: String,
    hash: Hash,
    graph: Arc<ConcreteGraph>,
    prefix: PathBuf,
    dependency_prefixes: BTreeMap<String, PathBuf>,
    compiler: Option<AvailableCompiler>,
    db: InstallDatabase,
    layout: InstallLayout,
    callback: Arc<dyn BuildCallback>,
    options: InstallOptions,
    cancel: Arc<AtomicBool>,
    holder: String,
}

impl BuildJob {
    fn run(self) -> WorkerResult {
        loop {
            match self.claim() {
                Ok(None) => {}
                Ok(Some(result)) => return result,
                Err(e) => return WorkerResult::Failed(e.to_string()),
            }

            let result = match self.build() {
                Ok(()) if self.cancel.load(Ordering::SeqCst) => WorkerResult::Cancelled,
                Ok(()) => WorkerResult::Built,
                Err(_) if self.cancel.load(Ordering::SeqCst) => WorkerResult::Cancelled,
                Err(message) => WorkerResult::Failed(message),
            };

            if matches!(result, WorkerResult::Built) {
                match self.db.refresh_claim(&self.hash, &self.holder) {
                    Ok(true) => return result,
                    Ok(false) => {
                        // Whoever took the claim over owns the prefix now
                        warn!(
                            "Lost claim on {} ({}) during the build, waiting for its new holder",
                            self.name,
                            self.hash.short()
                        );
                        continue;
                    }
                    Err(e) => {
                        self.discard();
                        return WorkerResult::Failed(e.to_string());
                    }
                }
            }
            self.discard();
            return result;
        }
    }

    fn discard(&self) {
        discard(
            &self.db,
            &self.layout,
            &self.holder,
            &self.name,
            &self.hash,
            &self.prefix,
        );
    }

    /// Take the in-progress marker, waiting while another builder holds it.
    /// `Some` means there is nothing left to build.
    fn claim(&self) -> Result<Option<WorkerResult>> {
        let mut announced = false;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(Some(WorkerResult::Cancelled));
            }
            match self.db.claim(&self.hash, &self.holder)? {
                Claim::Acquired => return Ok(None),
                Claim::Installed(record) => {
                    return Ok(Some(WorkerResult::AlreadyInstalled(record.prefix)));
                }
                Claim::Busy { holder, since } => {
                    if !announced {
                        info!(
                            "Waiting for {} ({}), being built by {} since {}",
                            self.name,
                            self.hash.short(),
                            holder,
                            since.to_rfc3339()
                        );
                        announced = true;
                    }
                    std::thread::sleep(self.options.poll_interval);
                }
            }
        }
    }

    fn build(&self) -> std::result::Result<(), String> {
        let spec = self
            .graph
            .spec(&self.name)
            .ok_or_else(|| format!("{} is not part of the graph", self.name))?;

        if self.prefix.exists() {
            let owned = self
                .db
                .refresh_claim(&self.hash, &self.holder)
                .map_err(|e| e.to_string())?;
            if !owned {
                return Err(format!("Lost claim on {} before building", self.name));
            }
            warn!("Removing leftover prefix {}", self.prefix.display());
            self.layout
                .remove_prefix(&self.prefix)
                .map_err(|e| e.to_string())?;
        }
        fs::create_dir_all(&self.prefix)
            .map_err(|e| format!("Failed to create {}: {}", self.prefix.display(), e))?;
        fs::create_dir_all(&self.options.stage_root).map_err(|e| {
            format!(
                "Failed to create stage root {}: {}",
                self.options.stage_root.display(),
                e
            )
        })?;
        let stage = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", self.name, self.hash.short()))
            .tempdir_in(&self.options.stage_root)
            .map_err(|e| format!("Failed to create stage: {}", e))?;

        let env = BuildEnvironment::for_node(&spec, &self.dependency_prefixes, self.compiler.as_ref());
        let request = BuildRequest {
            spec,
            prefix: &self.prefix,
            stage: stage.path(),
            dependency_prefixes: &self.dependency_prefixes,
            env: &env,
            jobs: self.options.jobs,
            cancel: &self.cancel,
        };
        info!("Building {}/{}", self.name, self.hash.short());

        let (stop, ticks) = mpsc::channel::<()>();
        let built = std::thread::scope(|scope| {
            scope.spawn(move || self.heartbeat(ticks));
            let built = self.callback.build(&request);
            drop(stop);
            built
        });

        if let Err(e) = built {
            // Keep the stage around for inspection
            let kept = stage.into_path();
            debug!("Kept failed stage {}", kept.display());
            return Err(e.to_string());
        }

        InstallLayout::write_metadata(&self.prefix, &spec).map_err(|e| e.to_string())?;
        if self.options.keep_stage {
            let kept = stage.into_path();
            info!("Kept stage {}", kept.display());
        }
        Ok(())
    }

    /// Refresh the claim until `ticks` disconnects
    fn heartbeat(&self, ticks: mpsc::Receiver<()>) {
        let interval = (self.db.claim_timeout() / 4).max(MIN_HEARTBEAT);
        while let Err(RecvTimeoutError::Timeout) = ticks.recv_timeout(interval) {
            match self.db.refresh_claim(&self.hash, &self.holder) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Claim on {} was taken over by another builder", self.hash.short());
                    return;
                }
                Err(e) => warn!("Failed to refresh claim on {}: {}", self.hash.short(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::callback::BuildError;
    use crate::config::LocksSection;
    use crate::spec::{Arch, CompilerSpec, ConcreteNode, DepTypes, DependencyEdge};
    use crate::version::Version;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn node(name: &str, deps: &[&str]) -> ConcreteNode {
        ConcreteNode {
            name: name.to_string(),
            version: Version::parse("1.0").unwrap(),
            variants: BTreeMap::new(),
            compiler: CompilerSpec::parse("gcc@11.4.0").unwrap(),
            arch: Arch::new("linux", "ubuntu22.04", "x86_64"),
            dependencies: deps
                .iter()
                .map(|d| (d.to_string(), DependencyEdge::new(DepTypes::DEFAULT)))
                .collect(),
            external: None,
        }
    }

    fn graph(nodes: Vec<ConcreteNode>, roots: &[&str]) -> ConcreteGraph {
        ConcreteGraph::new(
            roots.iter().map(|r| r.to_string()).collect(),
            nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
        )
        .unwrap()
    }

    /// Records which packages were built and fails the ones listed
    struct Recorder {
        built: Mutex<Vec<String>>,
        fail: Vec<String>,
    }

    impl Recorder {
        fn new(fail: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                built: Mutex::new(Vec::new()),
                fail: fail.iter().map(|s| s.to_string()).collect(),
            })
        }

        fn built(&self) -> Vec<String> {
            self.built.lock().unwrap().clone()
        }
    }

    impl BuildCallback for Recorder {
        fn build(&self, request: &BuildRequest<'_>) -> std::result::Result<(), BuildError> {
            let name = request.spec.name().to_string();
            self.built.lock().unwrap().push(name.clone());
            if self.fail.contains(&name) {
                return Err(BuildError::new(format!("{} does not compile", name)));
            }
            for dep in request.dependency_prefixes.values() {
                assert!(dep.join(".spackle/spec.json").exists());
            }
            fs::write(request.prefix.join("built"), &name).map_err(|e| BuildError::new(e.to_string()))
        }
    }

    struct Fixture {
        _dir: TempDir,
        db: InstallDatabase,
        layout: InstallLayout,
        options: InstallOptions,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = InstallDatabase::open(dir.path().join("db/spackle.db"), LocksSection::default())
            .unwrap();
        let layout = InstallLayout::new(dir.path().join("opt"));
        let options = InstallOptions::new(dir.path().join("stage")).with_jobs(2);
        Fixture {
            _dir: dir,
            db,
            layout,
            options,
        }
    }

    fn installer(fx: &Fixture, callback: Arc<dyn BuildCallback>) -> Installer {
        Installer::new(fx.db.clone(), fx.layout.clone(), callback, fx.options.clone())
    }

    fn chain() -> ConcreteGraph {
        graph(
            vec![node("app", &["hdf5"]), node("hdf5", &["zlib"]), node("zlib", &[])],
            &["app"],
        )
    }

    #[test]
    fn test_install_records_every_node() {
        let fx = fixture();
        let recorder = Recorder::new(&[]);
        let graph = chain();

        let report = installer(&fx, recorder.clone()).install(&graph).unwrap();
        assert_eq!(recorder.built(), vec!["zlib", "hdf5", "app"]);
        assert_eq!(report.built(), vec!["zlib", "hdf5", "app"]);

        let hashes = graph.dag_hashes();
        let app = fx.db.lookup(&hashes["app"]).unwrap().unwrap();
        assert!(app.explicit);
        assert!(app.prefix.join("built").exists());
        let zlib = fx.db.lookup(&hashes["zlib"]).unwrap().unwrap();
        assert!(!zlib.explicit);
        assert_eq!(zlib.ref_count, 1);
    }

    #[test]
    fn test_second_install_reuses() {
        let fx = fixture();
        let graph = chain();
        installer(&fx, Recorder::new(&[])).install(&graph).unwrap();

        let recorder = Recorder::new(&[]);
        let report = installer(&fx, recorder.clone()).install(&graph).unwrap();
        assert!(recorder.built().is_empty());
        assert!(
            report
                .nodes
                .iter()
                .all(|n| matches!(n.outcome, NodeOutcome::Reused { .. }))
        );
    }

    #[test]
    fn test_failure_blocks_dependents_only() {
        let fx = fixture();
        let graph = graph(
            vec![
                node("app", &["hdf5", "zlib"]),
                node("hdf5", &["mpich"]),
                node("mpich", &[]),
                node("zlib", &[]),
            ],
            &["app"],
        );
        let recorder = Recorder::new(&["mpich"]);
        let report = installer(&fx, recorder.clone()).execute(&graph).unwrap();

        assert!(!recorder.built().contains(&"hdf5".to_string()));
        assert!(!recorder.built().contains(&"app".to_string()));
        assert!(matches!(report.outcome("zlib"), Some(NodeOutcome::Installed { .. })));
        assert_eq!(
            report.outcome("hdf5"),
            Some(&NodeOutcome::Blocked {
                by: "mpich".to_string()
            })
        );

        let hashes = graph.dag_hashes();
        assert!(fx.db.lookup(&hashes["zlib"]).unwrap().is_some());
        assert!(fx.db.lookup(&hashes["mpich"]).unwrap().is_none());
        let mpich_prefix = fx.layout.prefix_for(&graph.spec("mpich").unwrap());
        assert!(!mpich_prefix.exists());

        match report.into_result() {
            Err(Error::BuildFailed(failure)) => {
                assert_eq!(failure.failures[0].name, "mpich");
                assert_eq!(failure.failures[0].blocked, vec!["hdf5", "app"]);
            }
            other => panic!("expected build failure, got {:?}", other),
        }
    }

    #[test]
    fn test_external_is_recorded_not_built() {
        let fx = fixture();
        let mut zlib = node("zlib", &[]);
        zlib.external = Some(PathBuf::from("/usr"));
        let graph = graph(vec![node("app", &["zlib"]), zlib], &["app"]);
        let recorder = Recorder::new(&[]);

        let report = installer(&fx, recorder.clone()).install(&graph).unwrap();
        assert_eq!(recorder.built(), vec!["app"]);
        assert_eq!(
            report.outcome("zlib"),
            Some(&NodeOutcome::External {
                prefix: PathBuf::from("/usr")
            })
        );
        let record = fx.db.lookup(&graph.dag_hashes()["zlib"]).unwrap().unwrap();
        assert!(record.external);
    }

    #[test]
    fn test_cancelled_before_start() {
        let fx = fixture();
        let recorder = Recorder::new(&[]);
        let installer = installer(&fx, recorder.clone());
        installer.cancel_handle().store(true, Ordering::SeqCst);

        let graph = chain();
        let err = installer.install(&graph).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(recorder.built().is_empty());
        assert!(fx.db.list(false).unwrap().is_empty());
    }

    #[test]
    fn test_cancel_during_build_discards_prefix() {
        let fx = fixture();
        let installer_cell: Arc<Mutex<Option<Arc<AtomicBool>>>> = Arc::new(Mutex::new(None));
        let handle = Arc::clone(&installer_cell);
        let callback = Arc::new(move |request: &BuildRequest<'_>| -> std::result::Result<(), BuildError> {
            fs::write(request.prefix.join("partial"), "x")
                .map_err(|e| BuildError::new(e.to_string()))?;
            if let Some(cancel) = handle.lock().unwrap().as_ref() {
                cancel.store(true, Ordering::SeqCst);
            }
            Ok(())
        });
        let installer = installer(&fx, callback);
        *installer_cell.lock().unwrap() = Some(installer.cancel_handle());

        let graph = chain();
        let report = installer.execute(&graph).unwrap();
        assert!(report.nodes.iter().all(|n| n.outcome == NodeOutcome::Cancelled));
        assert!(fx.db.list(false).unwrap().is_empty());
        let zlib_prefix = fx.layout.prefix_for(&graph.spec("zlib").unwrap());
        assert!(!zlib_prefix.exists());
    }

    #[test]
    fn test_losing_record_race_reuses_winner() {
        let fx = fixture();
        let graph = graph(vec![node("zlib", &[])], &["zlib"]);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let db = fx.db.clone();
        let recorded = graph.clone();
        // Another builder records the same hash while ours is still running
        let callback = Arc::new(move |request: &BuildRequest<'_>| -> std::result::Result<(), BuildError> {
            *counter.lock().unwrap() += 1;
            fs::write(request.prefix.join("built"), "winner").map_err(|e| BuildError::new(e.to_string()))?;
            db.record(&recorded, "zlib", request.prefix, true)
                .map(|_| ())
                .map_err(|e| BuildError::new(e.to_string()))
        });

        let report = installer(&fx, callback).install(&graph).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        let Some(NodeOutcome::Reused { prefix }) = report.outcome("zlib") else {
            panic!("expected zlib to be reused, got {:?}", report.outcome("zlib"));
        };
        assert_eq!(fs::read_to_string(prefix.join("built")).unwrap(), "winner");
        let record = fx.db.lookup(&graph.dag_hashes()["zlib"]).unwrap().unwrap();
        assert_eq!(&record.prefix, prefix);
    }

    #[test]
    fn test_plan_reports_status() {
        let fx = fixture();
        let graph = chain();
        let sub = graph.subgraph("zlib").unwrap();
        installer(&fx, Recorder::new(&[])).install(&sub).unwrap();

        let plan = installer(&fx, Recorder::new(&[])).plan(&graph).unwrap();
        let statuses: Vec<(&str, &PlanStatus)> =
            plan.iter().map(|p| (p.name.as_str(), &p.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("zlib", &PlanStatus::Installed),
                ("hdf5", &PlanStatus::Build),
                ("app", &PlanStatus::Build),
            ]
        );
    }
}
