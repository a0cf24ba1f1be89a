// src/build/callback.rs

//! Build callbacks
//!
//! The orchestrator does not know how to build anything. For each node it
//! hands a [`BuildRequest`] to a [`BuildCallback`], which fills the
//! destination prefix or returns a [`BuildError`]. Callbacks run without
//! the database lock and must tolerate being re-invoked into an empty
//! prefix.
//!
//! [`ScriptBuilder`] runs the shell steps a recipe declares in `[build]`;
//! [`CallbackSet`] picks a callback per package.

use super::environment::BuildEnvironment;
use crate::repo::Repository;
use crate::spec::ConcreteSpec;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the build log written into the stage (and kept in the prefix)
pub const BUILD_LOG: &str = "spackle-build.log";

/// How often a running step checks for cancellation
const STEP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything a callback needs to build one node
#[derive(Debug)]
pub struct BuildRequest<'a> {
    pub spec: ConcreteSpec<'a>,
    /// Destination; exists and is empty when the callback starts
    pub prefix: &'a Path,
    /// Private scratch directory
    pub stage: &'a Path,
    /// Install prefixes of the direct dependencies, by package name
    pub dependency_prefixes: &'a BTreeMap<String, PathBuf>,
    pub env: &'a BuildEnvironment,
    pub jobs: usize,
    /// Set when the install is being cancelled
    pub cancel: &'a AtomicBool,
}

impl BuildRequest<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// A failed build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    pub message: String,
    /// Build log, when one was written
    pub log: Option<PathBuf>,
}

impl BuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            log: None,
        }
    }

    pub fn with_log(mut self, log: PathBuf) -> Self {
        self.log = Some(log);
        self
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(log) = &self.log {
            write!(f, " (log: {})", log.display())?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {}

/// Capability that performs one build
pub trait BuildCallback: Send + Sync {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError>;
}

impl<F> BuildCallback for F
where
    F: Fn(&BuildRequest<'_>) -> Result<(), BuildError> + Send + Sync,
{
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError> {
        self(request)
    }
}

/// Per-package callbacks with a fallback
#[derive(Default, Clone)]
pub struct CallbackSet {
    fallback: Option<Arc<dyn BuildCallback>>,
    packages: BTreeMap<String, Arc<dyn BuildCallback>>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, callback: Arc<dyn BuildCallback>) -> Self {
        self.fallback = Some(callback);
        self
    }

    pub fn register(&mut self, package: impl Into<String>, callback: Arc<dyn BuildCallback>) {
        self.packages.insert(package.into(), callback);
    }

    fn callback_for(&self, package: &str) -> Option<&Arc<dyn BuildCallback>> {
        self.packages.get(package).or(self.fallback.as_ref())
    }
}

impl BuildCallback for CallbackSet {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError> {
        let name = request.spec.name();
        match self.callback_for(name) {
            Some(callback) => callback.build(request),
            None => Err(BuildError::new(format!("No build callback for {}", name))),
        }
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("fallback", &self.fallback.is_some())
            .field("packages", &self.packages.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Runs a recipe's `[build] steps` with `sh -c`
pub struct ScriptBuilder {
    repo: Arc<dyn Repository>,
}

impl ScriptBuilder {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }
}

impl BuildCallback for ScriptBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError> {
        let node = request.spec.node();
        let recipe = self
            .repo
            .require(&node.name)
            .map_err(|e| BuildError::new(e.to_string()))?;
        if recipe.build.steps.is_empty() {
            return Err(BuildError::new(format!(
                "Recipe {} declares no build steps",
                node.name
            )));
        }

        let mut run = ScriptRun::new(request);
        for (key, value) in &recipe.build.env {
            let value = run.substitute(value);
            run.env.push((key.clone(), value));
        }

        let log_path = request.stage.join(BUILD_LOG);
        let total = recipe.build.steps.len();
        let mut result = Ok(());
        for (index, step) in recipe.build.steps.iter().enumerate() {
            if request.is_cancelled() {
                result = Err(BuildError::new("Build cancelled"));
                break;
            }
            let phase = format!("step {}/{}", index + 1, total);
            if let Err(message) = run.step(&phase, step) {
                result = Err(BuildError::new(format!("{}: {}", node.name, message)));
                break;
            }
        }

        fs::write(&log_path, &run.log)
            .map_err(|e| BuildError::new(format!("Failed to write build log: {}", e)))?;
        match result {
            Ok(()) => {
                let kept = request.prefix.join(super::layout::METADATA_DIR);
                fs::create_dir_all(&kept)
                    .and_then(|_| fs::copy(&log_path, kept.join(BUILD_LOG)).map(|_| ()))
                    .map_err(|e| BuildError::new(format!("Failed to keep build log: {}", e)))?;
                info!("Built {} into {}", node.name, request.prefix.display());
                Ok(())
            }
            Err(e) => Err(e.with_log(log_path)),
        }
    }
}

fn read_capture(file: &mut File) -> String {
    let mut bytes = Vec::new();
    if let Err(e) = file
        .seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut bytes))
    {
        warn!("Failed to read step output: {}", e);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// One script build in progress
struct ScriptRun<'a> {
    request: &'a BuildRequest<'a>,
    env: Vec<(String, String)>,
    log: String,
}

impl<'a> ScriptRun<'a> {
    fn new(request: &'a BuildRequest<'a>) -> Self {
        let env = request
            .env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            request,
            env,
            log: String::new(),
        }
    }

    /// Replace `%(prefix)s`, `%(name)s`, `%(version)s` and `%(jobs)s`
    fn substitute(&self, s: &str) -> String {
        let node = self.request.spec.node();
        s.replace("%(prefix)s", &self.request.prefix.to_string_lossy())
            .replace("%(name)s", &node.name)
            .replace("%(version)s", &node.version.to_string())
            .replace("%(jobs)s", &self.request.jobs.to_string())
    }

    fn step(&mut self, phase: &str, command: &str) -> Result<(), String> {
        let command = self.substitute(command);
        debug!("{}: {}", phase, command);
        self.log_line(&format!("$ {}", command));

        // Output goes to files so a chatty step never blocks on a full pipe
        let capture = || tempfile::tempfile().map_err(|e| format!("Failed to capture {}: {}", phase, e));
        let mut stdout = capture()?;
        let mut stderr = capture()?;
        let redirect = |file: &File| {
            file.try_clone()
                .map(Stdio::from)
                .map_err(|e| format!("Failed to capture {}: {}", phase, e))
        };

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(self.request.stage)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(redirect(&stdout)?)
            .stderr(redirect(&stderr)?)
            .spawn()
            .map_err(|e| format!("Failed to run {}: {}", phase, e))?;

        let status = self.wait(phase, &mut child);
        let stdout = read_capture(&mut stdout);
        let stderr = read_capture(&mut stderr);
        self.log_output(phase, &stdout, &stderr);
        let status = status?;

        if !status.success() {
            return Err(format!(
                "{} failed with exit code {:?}\nstderr: {}",
                phase,
                status.code(),
                stderr.trim_end()
            ));
        }
        Ok(())
    }

    /// Wait for a step, killing it once the build is cancelled
    fn wait(&self, phase: &str, child: &mut std::process::Child) -> Result<ExitStatus, String> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => return Err(format!("Failed to wait for {}: {}", phase, e)),
            }
            if self.request.is_cancelled() {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill {}: {}", phase, e);
                }
                let _ = child.wait();
                return Err(format!("{} cancelled", phase));
            }
            std::thread::sleep(STEP_POLL_INTERVAL);
        }
    }

    fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    fn log_output(&mut self, phase: &str, stdout: &str, stderr: &str) {
        self.log_line(&format!("=== {} ===", phase));
        if !stdout.is_empty() {
            self.log.push_str(stdout);
            self.log.push('\n');
        }
        if !stderr.is_empty() {
            self.log.push_str(stderr);
            self.log.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryRepository;
    use crate::spec::{Arch, CompilerSpec, ConcreteGraph, ConcreteNode};
    use crate::version::Version;
    use tempfile::TempDir;

    const RECIPE: &str = r#"
[package]
name = "zlib"

[[versions]]
version = "1.3"

[build]
steps = [
    "echo building %(name)s-%(version)s with %(jobs)s jobs",
    "mkdir -p %(prefix)s/lib && echo $ZLIB_FLAVOR > %(prefix)s/lib/flavor",
]
env = { ZLIB_FLAVOR = "plain-%(version)s" }
"#;

    fn graph() -> ConcreteGraph {
        let node = ConcreteNode {
            name: "zlib".to_string(),
            version: Version::parse("1.3").unwrap(),
            variants: BTreeMap::new(),
            compiler: CompilerSpec::parse("gcc@11.4.0").unwrap(),
            arch: Arch::new("linux", "ubuntu22.04", "x86_64"),
            dependencies: BTreeMap::new(),
            external: None,
        };
        ConcreteGraph::new(vec!["zlib".to_string()], BTreeMap::from([("zlib".to_string(), node)]))
            .unwrap()
    }

    fn run(builder: &dyn BuildCallback, dir: &TempDir, graph: &ConcreteGraph) -> Result<(), BuildError> {
        run_until(builder, dir, graph, &AtomicBool::new(false))
    }

    fn run_until(
        builder: &dyn BuildCallback,
        dir: &TempDir,
        graph: &ConcreteGraph,
        cancel: &AtomicBool,
    ) -> Result<(), BuildError> {
        let prefix = dir.path().join("prefix");
        let stage = dir.path().join("stage");
        fs::create_dir_all(&prefix).unwrap();
        fs::create_dir_all(&stage).unwrap();
        let env = BuildEnvironment::for_node(&graph.spec("zlib").unwrap(), &BTreeMap::new(), None);
        let request = BuildRequest {
            spec: graph.spec("zlib").unwrap(),
            prefix: &prefix,
            stage: &stage,
            dependency_prefixes: &BTreeMap::new(),
            env: &env,
            jobs: 4,
            cancel,
        };
        builder.build(&request)
    }

    #[test]
    fn test_script_builder_runs_steps() {
        let mut repo = InMemoryRepository::new();
        repo.add_toml(RECIPE).unwrap();
        let builder = ScriptBuilder::new(Arc::new(repo));
        let dir = TempDir::new().unwrap();
        let graph = graph();

        run(&builder, &dir, &graph).unwrap();

        let flavor = fs::read_to_string(dir.path().join("prefix/lib/flavor")).unwrap();
        assert_eq!(flavor.trim(), "plain-1.3");
        let log = fs::read_to_string(dir.path().join("prefix/.spackle").join(BUILD_LOG)).unwrap();
        assert!(log.contains("building zlib-1.3 with 4 jobs"));
    }

    #[test]
    fn test_script_builder_reports_failure() {
        let mut repo = InMemoryRepository::new();
        repo.add_toml(&RECIPE.replace("echo building", "exit 3; echo")).unwrap();
        let builder = ScriptBuilder::new(Arc::new(repo));
        let dir = TempDir::new().unwrap();

        let err = run(&builder, &dir, &graph()).unwrap_err();
        assert!(err.message.contains("step 1/2 failed with exit code Some(3)"));
        assert_eq!(err.log, Some(dir.path().join("stage").join(BUILD_LOG)));
    }

    #[test]
    fn test_cancel_interrupts_running_step() {
        let mut repo = InMemoryRepository::new();
        repo.add_toml(
            "[package]\nname = \"zlib\"\n[[versions]]\nversion = \"1.3\"\n[build]\nsteps = [\"echo started\", \"sleep 30\", \"touch %(prefix)s/done\"]\n",
        )
        .unwrap();
        let builder = ScriptBuilder::new(Arc::new(repo));
        let dir = TempDir::new().unwrap();
        let graph = graph();
        let cancel = AtomicBool::new(false);

        let started = std::time::Instant::now();
        let err = std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(200));
                cancel.store(true, Ordering::SeqCst);
            });
            run_until(&builder, &dir, &graph, &cancel).unwrap_err()
        });

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.message.contains("step 2/3 cancelled"), "{}", err);
        assert!(!dir.path().join("prefix/done").exists());
        let log = fs::read_to_string(dir.path().join("stage").join(BUILD_LOG)).unwrap();
        assert!(log.contains("started"));
    }

    #[test]
    fn test_callback_set_dispatch() {
        let mut set = CallbackSet::new();
        let dir = TempDir::new().unwrap();
        let graph = graph();
        assert!(run(&set, &dir, &graph).unwrap_err().message.contains("No build callback"));

        set.register(
            "zlib",
            Arc::new(|request: &BuildRequest<'_>| {
                fs::write(request.prefix.join("marker"), request.spec.name())
                    .map_err(|e| BuildError::new(e.to_string()))
            }),
        );
        run(&set, &dir, &graph).unwrap();
        assert!(dir.path().join("prefix/marker").exists());
    }
}
