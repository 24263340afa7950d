//! Errors surfaced through an apply's result sequence

use std::any::Any;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("work item {index} panicked: {message}")]
    WorkerPanicked { index: usize, message: String },

    #[error("work item {index} failed: {error:#}")]
    WorkerFailed { index: usize, error: anyhow::Error },

    #[error("print forwarder did not exit within {0:?}")]
    ForwarderTimeout(Duration),

    #[error("print forwarder panicked: {0}")]
    ForwarderPanicked(String),

    #[error("print forwarder failed to write output: {0}")]
    ForwarderFailed(#[source] io::Error),
}

impl ApplyError {
    /// Input position of the failed work item, if the error belongs to one
    pub fn index(&self) -> Option<usize> {
        match self {
            ApplyError::WorkerPanicked { index, .. } | ApplyError::WorkerFailed { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }

    pub fn is_worker_error(&self) -> bool {
        self.index().is_some()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
