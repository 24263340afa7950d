//! Parallel apply helper
//!
//! Applies a function to a sequence of inputs on a pool of worker threads,
//! funnelling worker console output through one forwarder thread so lines
//! never interleave. When worker threads are unavailable the runtime falls
//! back to a serial loop with the same results.
//!
//! # Module Structure
//!
//! - `types`: Execution mode, ordering, configuration and channel messages
//! - `error`: Errors carried in the result sequence
//! - `forwarder`: Output channel, print forwarder thread and `Printer`
//! - `worker`: Worker thread and per-item invocation
//! - `sink`: Ordered and unordered result delivery
//! - `apply`: The lazy `Apply` result sequence and pool shutdown
//! - `runtime`: `MpRuntime` orchestration and the process-wide runtime

mod apply;
mod error;
mod forwarder;
mod runtime;
mod sink;
mod types;
mod worker;

pub use apply::Apply;
pub use error::ApplyError;
pub use forwarder::Printer;
pub use runtime::{apply, global, print, MpRuntime, MpRuntimeBuilder};
pub use types::{ApplyConfig, ExecutionMode, Order, OutputMessage};
