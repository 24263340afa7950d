//! Print forwarder for parallel applies
//!
//! Workers enqueue output lines on one FIFO channel; a single forwarder
//! thread drains it into the console sink. One forwarder runs per runtime
//! while at least one apply holds a lease on it.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, warn};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::platform::ConsoleSink;

use super::error::{panic_message, ApplyError};
use super::types::{ExecutionMode, OutputMessage, ThreadCensus};

struct RunningForwarder {
    handle: JoinHandle<()>,
    done: Receiver<io::Result<()>>,
}

impl RunningForwarder {
    /// Wait for the forwarder to report back, bounded by `timeout`
    fn wait(self, timeout: Duration) -> Result<(), ApplyError> {
        match self.done.recv_timeout(timeout) {
            Ok(outcome) => {
                let _ = self.handle.join();
                outcome.map_err(ApplyError::ForwarderFailed)
            }
            // The completion sender only disconnects without a message when the thread unwinds
            Err(RecvTimeoutError::Disconnected) => match self.handle.join() {
                Err(payload) => Err(ApplyError::ForwarderPanicked(panic_message(
                    payload.as_ref(),
                ))),
                Ok(()) => Ok(()),
            },
            Err(RecvTimeoutError::Timeout) => Err(ApplyError::ForwarderTimeout(timeout)),
        }
    }
}

#[derive(Default)]
struct HubState {
    users: usize,
    running: Option<RunningForwarder>,
    degraded: bool,
}

/// Owns the output channel and the forwarder lifecycle for one runtime
pub(crate) struct ForwarderHub {
    sender: Sender<OutputMessage>,
    receiver: Receiver<OutputMessage>,
    sink: Arc<ConsoleSink>,
    census: ThreadCensus,
    /// Whether lines go to the forwarder. Submitters hold the read side
    /// across check and send; `release` takes the write side before
    /// queueing `Shutdown`, so no line can land behind it.
    active: RwLock<bool>,
    state: Mutex<HubState>,
}

impl ForwarderHub {
    pub fn new(sink: ConsoleSink, census: ThreadCensus) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            sink: Arc::new(sink),
            census,
            active: RwLock::new(false),
            state: Mutex::new(HubState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, HubState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Apply thread panicked, recovering forwarder state");
                poisoned.into_inner()
            }
        }
    }

    fn read_active(&self) -> RwLockReadGuard<'_, bool> {
        match self.active.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_active(&self) -> RwLockWriteGuard<'_, bool> {
        match self.active.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_forwarding(&self) -> bool {
        *self.read_active()
    }

    /// Queue a line for the forwarder, or write it directly when none runs
    pub fn submit(&self, text: String) {
        let active = self.read_active();
        if !*active {
            drop(active);
            self.write_direct(&text);
            return;
        }
        if let Err(err) = self.sender.send(OutputMessage::Line(text)) {
            drop(active);
            if let OutputMessage::Line(text) = err.into_inner() {
                self.write_direct(&text);
            }
        }
    }

    pub fn write_direct(&self, text: &str) {
        if let Err(e) = self.sink.write_line(text) {
            warn!("Failed to write output line: {}", e);
        }
    }

    /// Start the forwarder if needed and register one more user
    pub fn acquire(self: &Arc<Self>, timeout: Duration) -> ForwarderLease {
        let mut state = self.lock_state();
        if state.running.is_none() && !state.degraded {
            match self.spawn_forwarder() {
                Ok(running) => {
                    state.running = Some(running);
                    *self.write_active() = true;
                    debug!("Print forwarder started");
                }
                Err(e) => warn!("Failed to start print forwarder ({}), printing directly", e),
            }
        }
        state.users += 1;
        ForwarderLease {
            hub: Arc::clone(self),
            timeout,
            released: false,
        }
    }

    fn spawn_forwarder(&self) -> io::Result<RunningForwarder> {
        let (done_sender, done) = bounded(1);
        let receiver = self.receiver.clone();
        let sink = Arc::clone(&self.sink);
        let guard = self.census.enter();

        let handle = thread::Builder::new()
            .name("nbkit-forwarder".to_string())
            .spawn(move || {
                let _guard = guard;
                let outcome = forward_lines(&receiver, &sink);
                let _ = done_sender.send(outcome);
            })?;

        Ok(RunningForwarder { handle, done })
    }

    /// Drop one user; the last one shuts the forwarder down
    fn release(&self, timeout: Duration) -> Result<(), ApplyError> {
        let mut state = self.lock_state();
        state.users = state.users.saturating_sub(1);
        if state.users > 0 {
            return Ok(());
        }
        let Some(running) = state.running.take() else {
            return Ok(());
        };

        {
            let mut active = self.write_active();
            *active = false;
            let _ = self.sender.send(OutputMessage::Shutdown);
        }
        let outcome = running.wait(timeout);

        match &outcome {
            Ok(()) => {
                debug!("Print forwarder stopped");
                self.drain_leftovers(true);
            }
            Err(ApplyError::ForwarderTimeout(_)) => {
                // The stuck thread still holds a receiver, so never start another one
                state.degraded = true;
                warn!("Print forwarder is unresponsive, later output is written directly");
            }
            // A panicking sink would panic again here, so only clear the queue
            Err(ApplyError::ForwarderPanicked(_)) => self.drain_leftovers(false),
            Err(_) => self.drain_leftovers(true),
        }
        outcome
    }

    /// Empty the queue of anything the forwarder did not consume
    fn drain_leftovers(&self, write_lines: bool) {
        let mut discarded = 0usize;
        while let Ok(message) = self.receiver.try_recv() {
            if let OutputMessage::Line(text) = message {
                if write_lines {
                    self.write_direct(&text);
                } else {
                    discarded += 1;
                }
            }
        }
        if discarded > 0 {
            warn!("Discarded {} queued output lines", discarded);
        }
    }
}

/// Forwarder loop: print every line until the shutdown message arrives
///
/// Write failures are logged and the loop keeps draining, so shutdown is
/// still observed; the first failure is returned.
fn forward_lines(receiver: &Receiver<OutputMessage>, sink: &ConsoleSink) -> io::Result<()> {
    let mut first_error = None;
    while let Ok(message) = receiver.recv() {
        match message {
            OutputMessage::Line(text) => {
                if let Err(e) = sink.write_line(&text) {
                    if first_error.is_none() {
                        warn!("Print forwarder failed to write output: {}", e);
                        first_error = Some(e);
                    }
                }
            }
            OutputMessage::Shutdown => break,
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// One apply's hold on the forwarder
pub(crate) struct ForwarderLease {
    hub: Arc<ForwarderHub>,
    timeout: Duration,
    released: bool,
}

impl ForwarderLease {
    pub fn release(mut self) -> Result<(), ApplyError> {
        self.released = true;
        self.hub.release(self.timeout)
    }
}

impl Drop for ForwarderLease {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.hub.release(self.timeout) {
                error!("Print forwarder shutdown failed: {}", e);
            }
        }
    }
}

/// Cloneable handle for printing from workers and the caller
///
/// In parallel mode lines go through the runtime's forwarder while an
/// apply is running; otherwise they are written immediately.
#[derive(Clone)]
pub struct Printer {
    mode: ExecutionMode,
    hub: Arc<ForwarderHub>,
}

impl Printer {
    pub(crate) fn new(mode: ExecutionMode, hub: Arc<ForwarderHub>) -> Self {
        Self { mode, hub }
    }

    /// Print one line; returns once the line is queued, not once it is written
    pub fn print(&self, text: impl Into<String>) {
        match self.mode {
            ExecutionMode::ForkCapable => self.hub.submit(text.into()),
            ExecutionMode::SpawnOnly => self.hub.write_direct(&text.into()),
        }
    }
}

impl std::fmt::Debug for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Printer")
            .field("mode", &self.mode)
            .field("forwarding", &self.hub.is_forwarding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn hub_with_capture() -> (Arc<ForwarderHub>, crate::platform::CapturedOutput, ThreadCensus) {
        let (sink, captured) = ConsoleSink::capture();
        let census = ThreadCensus::new();
        (
            Arc::new(ForwarderHub::new(sink, census.clone())),
            captured,
            census,
        )
    }

    #[test]
    fn test_forward_lines_stops_at_shutdown() {
        let (sink, captured) = ConsoleSink::capture();
        let (sender, receiver) = unbounded();
        sender.send(OutputMessage::Line("a".to_string())).unwrap();
        sender.send(OutputMessage::Line(String::new())).unwrap();
        sender.send(OutputMessage::Shutdown).unwrap();
        sender.send(OutputMessage::Line("after".to_string())).unwrap();

        forward_lines(&receiver, &sink).unwrap();

        assert_eq!(captured.lines(), vec!["a", ""]);
        assert_eq!(receiver.len(), 1);
    }

    #[test]
    fn test_lease_lifecycle_starts_and_stops_forwarder() {
        let (hub, captured, census) = hub_with_capture();
        let lease = hub.acquire(Duration::from_secs(5));
        assert!(hub.is_forwarding());
        assert_eq!(census.live(), 1);

        hub.submit("queued".to_string());
        lease.release().unwrap();

        assert!(!hub.is_forwarding());
        assert_eq!(census.live(), 0);
        assert_eq!(captured.lines(), vec!["queued"]);
    }

    #[test]
    fn test_forwarder_shared_between_leases() {
        let (hub, captured, census) = hub_with_capture();
        let first = hub.acquire(Duration::from_secs(5));
        let second = hub.acquire(Duration::from_secs(5));
        assert_eq!(census.live(), 1);

        hub.submit("one".to_string());
        first.release().unwrap();
        assert!(hub.is_forwarding());

        hub.submit("two".to_string());
        drop(second);
        assert!(!hub.is_forwarding());
        assert_eq!(census.live(), 0);
        assert_eq!(captured.lines(), vec!["one", "two"]);
    }

    #[test]
    fn test_printer_writes_directly_when_idle() {
        let (hub, captured, _census) = hub_with_capture();
        let printer = Printer::new(ExecutionMode::ForkCapable, Arc::clone(&hub));
        printer.print("immediate");
        assert_eq!(captured.lines(), vec!["immediate"]);

        let serial = Printer::new(ExecutionMode::SpawnOnly, hub);
        serial.print(String::from("also immediate"));
        assert_eq!(captured.lines(), vec!["immediate", "also immediate"]);
    }

    #[test]
    fn test_lines_racing_shutdown_are_never_stranded() {
        for _ in 0..50 {
            let (hub, captured, census) = hub_with_capture();
            let lease = hub.acquire(Duration::from_secs(5));

            let submitters: Vec<_> = (0..4)
                .map(|id| {
                    let hub = Arc::clone(&hub);
                    thread::spawn(move || {
                        for n in 0..100 {
                            hub.submit(format!("{}-{}", id, n));
                        }
                    })
                })
                .collect();
            lease.release().unwrap();
            for handle in submitters {
                handle.join().unwrap();
            }

            assert_eq!(census.live(), 0);
            assert!(hub.receiver.is_empty(), "lines left queued after shutdown");
            assert_eq!(captured.lines().len(), 400);
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device error"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_reported_on_release() {
        let hub = Arc::new(ForwarderHub::new(
            ConsoleSink::from_writer(FailingWriter),
            ThreadCensus::new(),
        ));
        let lease = hub.acquire(Duration::from_secs(5));
        hub.submit("doomed".to_string());
        let err = lease.release().unwrap_err();
        assert!(matches!(err, ApplyError::ForwarderFailed(_)));
    }
}
