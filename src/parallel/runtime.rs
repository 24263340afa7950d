//! Apply runtime
//!
//! Contains `MpRuntime`, which fixes the execution mode once and
//! orchestrates pools, the print forwarder and the serial fallback.

use crossbeam_channel::unbounded;
use log::{debug, error, warn};
use once_cell::sync::Lazy;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::platform::ConsoleSink;

use super::apply::{Apply, PooledRun};
use super::forwarder::{ForwarderHub, Printer};
use super::sink::ResultSink;
use super::types::{ApplyConfig, ExecutionMode, Job, Order, ThreadCensus, WorkItem};
use super::worker::{invoke, worker_thread};

/// Parallel apply runtime: execution mode, output channel and pool settings
///
/// The mode is fixed at construction and read-only afterwards.
pub struct MpRuntime {
    mode: ExecutionMode,
    config: ApplyConfig,
    hub: Arc<ForwarderHub>,
    census: ThreadCensus,
}

impl MpRuntime {
    /// Runtime with a detected mode, default configuration and stdout output
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MpRuntimeBuilder {
        MpRuntimeBuilder::default()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn config(&self) -> &ApplyConfig {
        &self.config
    }

    /// Handle for printing from worker closures
    pub fn printer(&self) -> Printer {
        Printer::new(self.mode, Arc::clone(&self.hub))
    }

    pub fn print(&self, text: impl Into<String>) {
        self.printer().print(text);
    }

    /// Pool and forwarder threads currently alive
    pub fn live_threads(&self) -> usize {
        self.census.live()
    }

    /// Apply `func` to every input
    ///
    /// Returns a lazy sequence with one result per input. A panic in `func`
    /// surfaces as `Err` at that input's position.
    pub fn apply<T, R, F, I>(&self, func: F, inputs: I, order: Order) -> Apply<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        let job: Job<T, R> = Arc::new(move |item| Ok(func(item)));
        self.run(job, inputs, order)
    }

    /// Apply a fallible `func` to every input
    pub fn try_apply<T, R, F, I>(&self, func: F, inputs: I, order: Order) -> Apply<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> anyhow::Result<R> + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        self.run(Arc::new(func), inputs, order)
    }

    fn run<T, R, I>(&self, job: Job<T, R>, inputs: I, order: Order) -> Apply<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        match self.mode {
            ExecutionMode::SpawnOnly => serial_apply(job, inputs.into_iter()),
            ExecutionMode::ForkCapable => self.pooled_apply(job, inputs.into_iter().collect(), order),
        }
    }

    fn pooled_apply<T, R>(&self, job: Job<T, R>, inputs: Vec<T>, order: Order) -> Apply<R>
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        let total = inputs.len();
        if total == 0 {
            return serial_apply(job, inputs.into_iter());
        }

        let lease = self.hub.acquire(self.config.forwarder_timeout);

        let (work_sender, work_receiver) = unbounded();
        let (result_sender, result_receiver) = unbounded();

        let worker_count = self.config.workers.max(1).min(total);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let guard = self.census.enter();
            let work_receiver = work_receiver.clone();
            let result_sender = result_sender.clone();
            let job = Arc::clone(&job);

            let spawned = thread::Builder::new()
                .name(format!("nbkit-worker-{}", worker_id))
                .spawn(move || {
                    let _guard = guard;
                    worker_thread(worker_id, work_receiver, result_sender, job)
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    warn!("Failed to start worker thread {}: {}", worker_id, e);
                    break;
                }
            }
        }

        // Drop our copies so the channels close once the workers are done
        drop(work_receiver);
        drop(result_sender);

        if workers.is_empty() {
            warn!("No worker threads could be started, applying serially");
            if let Err(e) = lease.release() {
                error!("Print forwarder shutdown failed: {}", e);
            }
            return serial_apply(job, inputs.into_iter());
        }

        debug!(
            "Dispatching {} items to {} workers ({:?} order)",
            total,
            workers.len(),
            order
        );
        for (index, item) in inputs.into_iter().enumerate() {
            let _ = work_sender.send(WorkItem { index, item });
        }
        drop(work_sender);

        Apply::pooled(PooledRun::new(
            result_receiver,
            ResultSink::new(order),
            total,
            workers,
            lease,
        ))
    }
}

impl Default for MpRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MpRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpRuntime")
            .field("mode", &self.mode)
            .field("config", &self.config)
            .field("live_threads", &self.live_threads())
            .finish()
    }
}

fn serial_apply<T, R, It>(job: Job<T, R>, inputs: It) -> Apply<R>
where
    T: 'static,
    R: 'static,
    It: Iterator<Item = T> + 'static,
{
    Apply::serial(Box::new(
        inputs
            .enumerate()
            .map(move |(index, item)| invoke(&job, index, item)),
    ))
}

type Probe = Box<dyn FnOnce() -> io::Result<()>>;

/// Builder for `MpRuntime`
#[derive(Default)]
pub struct MpRuntimeBuilder {
    mode: Option<ExecutionMode>,
    probe: Option<Probe>,
    config: ApplyConfig,
    sink: Option<ConsoleSink>,
}

impl MpRuntimeBuilder {
    /// Use `mode` instead of probing the platform
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Probe the platform with `probe` instead of starting a thread
    pub fn probe<P>(mut self, probe: P) -> Self
    where
        P: FnOnce() -> io::Result<()> + 'static,
    {
        self.probe = Some(Box::new(probe));
        self
    }

    pub fn config(mut self, config: ApplyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    pub fn forwarder_timeout(mut self, timeout: Duration) -> Self {
        self.config.forwarder_timeout = timeout;
        self
    }

    /// Write console output to `sink` instead of stdout
    pub fn sink(mut self, sink: ConsoleSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> MpRuntime {
        let mode = match (self.mode, self.probe) {
            (Some(mode), _) => mode,
            (None, Some(probe)) => ExecutionMode::detect_with(probe),
            (None, None) => ExecutionMode::detect(),
        };
        let census = ThreadCensus::new();
        let sink = self.sink.unwrap_or_else(ConsoleSink::stdout);

        MpRuntime {
            mode,
            config: self.config,
            hub: Arc::new(ForwarderHub::new(sink, census.clone())),
            census,
        }
    }
}

static GLOBAL: Lazy<MpRuntime> = Lazy::new(MpRuntime::new);

/// Process-wide runtime, detected on first use
pub fn global() -> &'static MpRuntime {
    &GLOBAL
}

/// Print through the process-wide runtime
pub fn print(text: impl Into<String>) {
    global().print(text);
}

/// Apply through the process-wide runtime
pub fn apply<T, R, F, I>(func: F, inputs: I, order: Order) -> Apply<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: 'static,
{
    global().apply(func, inputs, order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::CapturedOutput;
    use std::time::Duration;

    fn captured_runtime(mode: ExecutionMode) -> (MpRuntime, CapturedOutput) {
        let (sink, captured) = ConsoleSink::capture();
        let runtime = MpRuntime::builder().mode(mode).workers(4).sink(sink).build();
        (runtime, captured)
    }

    #[test]
    fn test_double_preserves_order_in_both_modes() {
        for mode in [ExecutionMode::ForkCapable, ExecutionMode::SpawnOnly] {
            let (runtime, _captured) = captured_runtime(mode);
            let results: Vec<i32> = runtime
                .apply(|x: i32| x * 2, vec![1, 2, 3, 4], Order::Preserve)
                .collect::<Result<_, _>>()
                .unwrap();
            assert_eq!(results, vec![2, 4, 6, 8], "mode {:?}", mode);
            assert_eq!(runtime.live_threads(), 0);
        }
    }

    #[test]
    fn test_empty_input_starts_no_threads() {
        let (runtime, _captured) = captured_runtime(ExecutionMode::ForkCapable);
        let mut results = runtime.apply(|x: u8| x, Vec::new(), Order::Completion);
        assert_eq!(runtime.live_threads(), 0);
        assert!(results.next().is_none());
    }

    #[test]
    fn test_pool_threads_alive_until_exhausted() {
        let (runtime, _captured) = captured_runtime(ExecutionMode::ForkCapable);
        let mut results = runtime.apply(
            |x: u64| {
                thread::sleep(Duration::from_millis(5));
                x
            },
            0..8u64,
            Order::Preserve,
        );
        assert!(results.is_parallel());
        assert_eq!(results.next().unwrap().unwrap(), 0);
        assert!(runtime.live_threads() > 0);

        let rest: Vec<u64> = results.by_ref().map(Result::unwrap).collect();
        assert_eq!(rest, (1..8).collect::<Vec<_>>());
        assert_eq!(runtime.live_threads(), 0);
    }

    #[test]
    fn test_prints_from_workers_reach_sink() {
        let (runtime, captured) = captured_runtime(ExecutionMode::ForkCapable);
        let printer = runtime.printer();
        let count = runtime
            .apply(
                move |x: u32| printer.print(format!("item {}", x)),
                0..6u32,
                Order::Completion,
            )
            .filter(Result::is_ok)
            .count();
        assert_eq!(count, 6);

        let mut lines = captured.lines();
        lines.sort();
        let expected: Vec<String> = (0..6).map(|x| format!("item {}", x)).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_builder_probe_failure_selects_serial() {
        let runtime = MpRuntime::builder()
            .probe(|| Err(io::Error::new(io::ErrorKind::Unsupported, "forced")))
            .sink(ConsoleSink::capture().0)
            .build();
        assert_eq!(runtime.mode(), ExecutionMode::SpawnOnly);
        let results = runtime.apply(|x: i32| x + 1, vec![1, 2], Order::Completion);
        assert!(!results.is_parallel());
    }

    #[test]
    fn test_workers_override_is_at_least_one() {
        let runtime = MpRuntime::builder()
            .mode(ExecutionMode::ForkCapable)
            .workers(0)
            .sink(ConsoleSink::capture().0)
            .build();
        assert_eq!(runtime.config().workers, 1);
    }
}
