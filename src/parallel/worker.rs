//! Worker thread for parallel applies
//!
//! Contains the worker loop and the single-item invocation shared with
//! the serial path, so both modes report failures the same way.

use crossbeam_channel::{Receiver, Sender};
use log::debug;
use std::panic::{self, AssertUnwindSafe};

use super::error::{panic_message, ApplyError};
use super::types::{Job, WorkItem, WorkResult};

/// Run the job on one item, turning panics and errors into `ApplyError`
pub(crate) fn invoke<T, R>(job: &Job<T, R>, index: usize, item: T) -> Result<R, ApplyError> {
    match panic::catch_unwind(AssertUnwindSafe(|| (**job)(item))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(ApplyError::WorkerFailed { index, error }),
        Err(payload) => Err(ApplyError::WorkerPanicked {
            index,
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Worker thread: processes items until the work channel is drained
pub(crate) fn worker_thread<T, R>(
    worker_id: usize,
    work_receiver: Receiver<WorkItem<T>>,
    result_sender: Sender<WorkResult<R>>,
    job: Job<T, R>,
) {
    let mut processed = 0usize;

    while let Ok(WorkItem { index, item }) = work_receiver.recv() {
        let outcome = invoke(&job, index, item);
        processed += 1;

        // Dispatched work always runs to completion, even if nobody reads the result
        let _ = result_sender.send(WorkResult { index, outcome });
    }

    debug!("Worker {} finished after {} items", worker_id, processed);
}
