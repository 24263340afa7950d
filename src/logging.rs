//! Logger setup for the binary and for tests
//!
//! The library only emits through the `log` facade; nothing is printed
//! unless a backend is installed.

use log::LevelFilter;
use std::env;

/// Initialize the logger from the debug flag or `RUST_LOG`
///
/// Diagnostics go to stderr so they never mix with forwarded output on
/// stdout. Safe to call more than once.
pub fn init_logger(debug: bool) {
    let mut builder = env_logger::Builder::new();
    if debug {
        builder.filter_level(LevelFilter::Debug);
    } else if let Ok(spec) = env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    } else {
        builder.filter_level(LevelFilter::Warn);
    }
    let _ = builder.format_timestamp(None).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_twice_is_harmless() {
        init_logger(false);
        init_logger(true);
        log::warn!("logger initialised");
    }
}
