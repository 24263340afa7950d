//! The lazy result sequence returned by an apply
//!
//! A pooled run owns its workers and its forwarder lease. Shutdown (join
//! workers, release the forwarder) runs once: when the last result is
//! pulled, from `finish`, or from `Drop` on every other exit path.

use crossbeam_channel::Receiver;
use log::{debug, error};
use std::thread::JoinHandle;

use super::error::ApplyError;
use super::forwarder::ForwarderLease;
use super::sink::ResultSink;
use super::types::WorkResult;

/// Results of an apply, one per input, consumable once
///
/// Items are `Err` when the function panicked or failed on that input, so
/// results can be zipped with the inputs. A failed forwarder shutdown is not
/// an item: iterate with `by_ref()` and call `finish` to receive it,
/// otherwise it is logged when the sequence is dropped.
pub struct Apply<R> {
    inner: Inner<R>,
}

enum Inner<R> {
    Serial(Box<dyn Iterator<Item = Result<R, ApplyError>>>),
    Pooled(PooledRun<R>),
}

impl<R> Apply<R> {
    pub(crate) fn serial(results: Box<dyn Iterator<Item = Result<R, ApplyError>>>) -> Self {
        Self {
            inner: Inner::Serial(results),
        }
    }

    pub(crate) fn pooled(run: PooledRun<R>) -> Self {
        Self {
            inner: Inner::Pooled(run),
        }
    }

    /// Drain unread results and complete shutdown
    ///
    /// Returns the forwarder shutdown failure, if any, including one that
    /// happened when the last result was pulled. Per-item errors that were
    /// never read are discarded.
    pub fn finish(mut self) -> Result<(), ApplyError> {
        match &mut self.inner {
            Inner::Serial(results) => {
                results.for_each(drop);
                Ok(())
            }
            Inner::Pooled(run) => {
                while run.remaining > 0 {
                    if run.next_result().is_none() {
                        break;
                    }
                }
                run.shutdown();
                run.shutdown_error.take().map_or(Ok(()), Err)
            }
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.inner, Inner::Pooled(_))
    }
}

impl<R> Iterator for Apply<R> {
    type Item = Result<R, ApplyError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Inner::Serial(results) => results.next(),
            Inner::Pooled(run) => run.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.inner {
            Inner::Serial(results) => results.size_hint(),
            Inner::Pooled(run) => (run.remaining, Some(run.remaining)),
        }
    }
}

impl<R> std::fmt::Debug for Apply<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Inner::Serial(_) => f.debug_struct("Apply").field("mode", &"serial").finish(),
            Inner::Pooled(run) => f
                .debug_struct("Apply")
                .field("mode", &"pooled")
                .field("remaining", &run.remaining)
                .field("buffered", &run.sink.buffered())
                .field("workers", &run.workers.len())
                .finish(),
        }
    }
}

pub(crate) struct PooledRun<R> {
    results: Receiver<WorkResult<R>>,
    sink: ResultSink<R>,
    remaining: usize,
    workers: Vec<JoinHandle<()>>,
    lease: Option<ForwarderLease>,
    shutdown_error: Option<ApplyError>,
    finished: bool,
}

impl<R> PooledRun<R> {
    pub fn new(
        results: Receiver<WorkResult<R>>,
        sink: ResultSink<R>,
        total: usize,
        workers: Vec<JoinHandle<()>>,
        lease: ForwarderLease,
    ) -> Self {
        Self {
            results,
            sink,
            remaining: total,
            workers,
            lease: Some(lease),
            shutdown_error: None,
            finished: false,
        }
    }

    fn next(&mut self) -> Option<Result<R, ApplyError>> {
        if self.remaining > 0 {
            if let Some(outcome) = self.next_result() {
                return Some(outcome);
            }
        }
        self.shutdown();
        None
    }

    /// Pull one result; shuts the pool down as soon as the last one is in hand
    fn next_result(&mut self) -> Option<Result<R, ApplyError>> {
        match self.sink.next(&self.results) {
            Some(outcome) => {
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.shutdown();
                }
                Some(outcome)
            }
            None => {
                error!(
                    "Result channel closed with {} results outstanding",
                    self.remaining
                );
                self.remaining = 0;
                None
            }
        }
    }

    fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let worker_count = self.workers.len();
        for (idx, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                error!("Worker thread {} panicked outside the applied function", idx);
            }
        }

        if let Some(lease) = self.lease.take() {
            if let Err(e) = lease.release() {
                self.shutdown_error = Some(e);
            }
        }
        debug!("Apply pool of {} workers shut down", worker_count);
    }
}

impl<R> Drop for PooledRun<R> {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(e) = self.shutdown_error.take() {
            error!("Apply shutdown failed: {}", e);
        }
    }
}
