// Core library for nbkit notebook utilities

pub mod dataset;
pub mod logging;
pub mod parallel;
pub mod platform;

pub use dataset::{Dataset, DatasetError, MinMaxScaler, Split, SplitRatios};
pub use parallel::{
    Apply, ApplyConfig, ApplyError, ExecutionMode, MpRuntime, Order, Printer,
};
pub use platform::{CapturedOutput, ConsoleSink};
