//! Result sink for parallel applies
//!
//! Pulls worker results off the result channel in the order the caller
//! asked for.

use crossbeam_channel::Receiver;
use std::collections::HashMap;

use super::error::ApplyError;
use super::types::{Order, WorkResult};

pub(crate) enum ResultSink<R> {
    /// Holds results that finished early until their turn comes
    Ordered {
        pending: HashMap<usize, Result<R, ApplyError>>,
        next_expected: usize,
    },
    Unordered,
}

impl<R> ResultSink<R> {
    pub fn new(order: Order) -> Self {
        match order {
            Order::Preserve => ResultSink::Ordered {
                pending: HashMap::new(),
                next_expected: 0,
            },
            Order::Completion => ResultSink::Unordered,
        }
    }

    /// Block until the next deliverable result; `None` once the channel is closed and empty
    pub fn next(&mut self, receiver: &Receiver<WorkResult<R>>) -> Option<Result<R, ApplyError>> {
        match self {
            ResultSink::Unordered => receiver.recv().ok().map(|result| result.outcome),
            ResultSink::Ordered {
                pending,
                next_expected,
            } => loop {
                if let Some(outcome) = pending.remove(&*next_expected) {
                    *next_expected += 1;
                    return Some(outcome);
                }
                match receiver.recv() {
                    Ok(result) => {
                        pending.insert(result.index, result.outcome);
                    }
                    Err(_) => return None,
                }
            },
        }
    }

    pub fn buffered(&self) -> usize {
        match self {
            ResultSink::Ordered { pending, .. } => pending.len(),
            ResultSink::Unordered => 0,
        }
    }
}
