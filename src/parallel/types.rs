//! Type definitions for the apply helper
//!
//! Contains the execution mode, ordering choice, configuration, channel
//! messages and the thread census shared by the pool and the forwarder.

use log::{info, warn};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How workers are started for a runtime, decided once when it is built
///
/// Workers are OS threads of the calling process, not child processes. A
/// thread already shares everything the caller has initialized, so it stands
/// in for a forked worker. The default probe only fails when the platform
/// cannot start a thread at all (exhausted thread limits, or targets such as
/// `wasm32-unknown-unknown`), so on ordinary hosts the mode is always
/// `ForkCapable`. Use `MpRuntimeBuilder::mode` or `probe` to exercise
/// `SpawnOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Workers share the caller's already-initialized state and run in parallel
    ForkCapable,
    /// Parallel workers are unusable on this platform; everything runs serially
    SpawnOnly,
}

impl ExecutionMode {
    /// Probe the platform by starting a worker thread
    pub fn detect() -> Self {
        Self::detect_with(probe_worker_thread)
    }

    /// Select the mode from a caller-supplied probe
    ///
    /// A failing probe downgrades to `SpawnOnly` with a warning. It is never
    /// reported as an error.
    pub fn detect_with<P>(probe: P) -> Self
    where
        P: FnOnce() -> io::Result<()>,
    {
        match probe() {
            Ok(()) => {
                info!("Worker threads available, parallel apply enabled");
                ExecutionMode::ForkCapable
            }
            Err(e) => {
                warn!(
                    "Failed to start a worker thread ({}), parallel apply will not be used",
                    e
                );
                ExecutionMode::SpawnOnly
            }
        }
    }

    pub fn is_parallel(self) -> bool {
        matches!(self, ExecutionMode::ForkCapable)
    }
}

fn probe_worker_thread() -> io::Result<()> {
    let handle = thread::Builder::new()
        .name("nbkit-probe".to_string())
        .spawn(|| ())?;
    handle
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "probe thread panicked"))
}

/// Delivery order of an apply's results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Results follow input order, whichever worker finishes first
    Preserve,
    /// Results are yielded as workers complete them
    #[default]
    Completion,
}

impl Order {
    pub fn from_preserve(preserve_order: bool) -> Self {
        if preserve_order {
            Order::Preserve
        } else {
            Order::Completion
        }
    }
}

/// Configuration for the apply pool
#[derive(Debug, Clone)]
pub struct ApplyConfig {
    /// Worker threads per apply, capped at the number of inputs
    pub workers: usize,
    /// How long shutdown waits for the print forwarder to exit
    pub forwarder_timeout: Duration,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            forwarder_timeout: Duration::from_secs(30),
        }
    }
}

/// Message on the console forwarding channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMessage {
    Line(String),
    Shutdown,
}

/// Function applied to each work item, normalised to a fallible signature
pub(crate) type Job<T, R> = Arc<dyn Fn(T) -> anyhow::Result<R> + Send + Sync>;

/// A work item tagged with its input position
#[derive(Debug)]
pub(crate) struct WorkItem<T> {
    pub index: usize,
    pub item: T,
}

/// The outcome for one work item
#[derive(Debug)]
pub(crate) struct WorkResult<R> {
    pub index: usize,
    pub outcome: Result<R, super::ApplyError>,
}

/// Counts pool and forwarder threads that are currently alive
#[derive(Debug, Clone, Default)]
pub(crate) struct ThreadCensus {
    live: Arc<AtomicUsize>,
}

impl ThreadCensus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a thread; it counts as alive until the guard drops
    pub fn enter(&self) -> CensusGuard {
        self.live.fetch_add(1, Ordering::SeqCst);
        CensusGuard {
            live: Arc::clone(&self.live),
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

pub(crate) struct CensusGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for CensusGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
