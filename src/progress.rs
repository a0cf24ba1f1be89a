// src/progress.rs

//! Install progress reporting
//!
//! The installer reports one step per graph node through
//! [`ProgressTracker`], so the same engine code drives a terminal bar, log
//! lines or nothing at all.
//!
//! Implementations:
//! - `CliProgress`: progress bar using indicatif
//! - `LogProgress`: one tracing line per finished node
//! - `CallbackProgress`: forwards [`ProgressEvent`]s to a closure
//! - `SilentProgress`: counts without output, for `--quiet`
//!
//! # Example
//!
//! ```ignore
//! use spackle::progress::{CliProgress, ProgressTracker};
//!
//! let progress = CliProgress::new("Installing", 5);
//! progress.set_message("Building zlib");
//! progress.increment(1);
//! progress.finish_with_message("Installed 5 package(s)");
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Receives install progress; updates may come from any thread
pub trait ProgressTracker: Send + Sync {
    fn set_message(&self, message: &str);

    /// Advance by `amount` nodes
    fn increment(&self, amount: u64);

    /// Total number of nodes
    fn set_length(&self, length: u64);

    fn position(&self) -> u64;

    fn length(&self) -> u64;

    fn finish_with_message(&self, message: &str);

    /// Finish after a failure or cancellation
    fn finish_with_error(&self, message: &str);

    fn is_finished(&self) -> bool;
}

/// Position, length and completion shared by the non-terminal trackers
#[derive(Debug, Default)]
struct Counters {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl Counters {
    fn with_length(length: u64) -> Self {
        let counters = Self::default();
        counters.length.store(length, Ordering::Relaxed);
        counters
    }

    /// Returns the position before and after the step
    fn advance(&self, amount: u64) -> (u64, u64) {
        let before = self.position.fetch_add(amount, Ordering::Relaxed);
        (before, before + amount)
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Counts progress without reporting it
#[derive(Debug, Default)]
pub struct SilentProgress {
    counters: Counters,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn increment(&self, amount: u64) {
        self.counters.advance(amount);
    }

    fn set_length(&self, length: u64) {
        self.counters.set_length(length);
    }

    fn position(&self) -> u64 {
        self.counters.position()
    }

    fn length(&self) -> u64 {
        self.counters.length()
    }

    fn finish_with_message(&self, _message: &str) {
        self.counters.finish();
    }

    fn finish_with_error(&self, _message: &str) {
        self.counters.finish();
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }
}

/// Reports progress as tracing events
///
/// Used when stderr is not a terminal, e.g. under a batch scheduler.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    counters: Counters,
    /// Log a position line every N nodes
    log_interval: u64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            counters: Counters::with_length(length),
            log_interval: 1,
        }
    }

    pub fn with_log_interval(mut self, interval: u64) -> Self {
        self.log_interval = interval;
        self
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn increment(&self, amount: u64) {
        let (before, after) = self.counters.advance(amount);
        let length = self.counters.length();
        if length == 0 || self.log_interval == 0 {
            return;
        }
        if after / self.log_interval > before / self.log_interval {
            info!("{}: {}/{} done", self.name, after, length);
        }
    }

    fn set_length(&self, length: u64) {
        self.counters.set_length(length);
    }

    fn position(&self) -> u64 {
        self.counters.position()
    }

    fn length(&self) -> u64 {
        self.counters.length()
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finish();
        info!("{}: {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finish();
        warn!("{}: {}", self.name, message);
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }
}

/// Terminal progress bar
pub struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub fn new(operation: &str, length: u64) -> Self {
        let bar = ProgressBar::new(length);
        let style = ProgressStyle::default_bar()
            .template("{prefix} ({pos}/{len}) [{bar:40.green/dim}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        bar.set_style(style);
        bar.set_prefix(operation.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressTracker for CliProgress {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn set_length(&self, length: u64) {
        self.bar.set_length(length);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn length(&self) -> u64 {
        self.bar.length().unwrap_or(0)
    }

    fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }

    fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

/// Events emitted by [`CallbackProgress`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Message(String),
    Position { current: u64, total: u64 },
    Finished(String),
    Error(String),
}

/// Forwards progress to a closure, for embedders and tests
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
    counters: Counters,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            counters: Counters::default(),
        }
    }
}

impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn set_message(&self, message: &str) {
        (self.callback)(ProgressEvent::Message(message.to_string()));
    }

    fn increment(&self, amount: u64) {
        let (_, current) = self.counters.advance(amount);
        (self.callback)(ProgressEvent::Position {
            current,
            total: self.counters.length(),
        });
    }

    fn set_length(&self, length: u64) {
        self.counters.set_length(length);
    }

    fn position(&self) -> u64 {
        self.counters.position()
    }

    fn length(&self) -> u64 {
        self.counters.length()
    }

    fn finish_with_message(&self, message: &str) {
        self.counters.finish();
        (self.callback)(ProgressEvent::Finished(message.to_string()));
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finish();
        (self.callback)(ProgressEvent::Error(message.to_string()));
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }
}
