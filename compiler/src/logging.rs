//! Logging configuration for the inliner
//!
//! Initializes the `log` facade through `env_logger`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use jit_inliner::logging;
//!
//! // Initialize with default level (Warn)
//! logging::init();
//!
//! // Or initialize from RUST_LOG environment variable
//! logging::init_from_env();
//! ```
//!
//! # Log Levels
//!
//! - `warn!` - Graph consistency violations found by validation
//! - `info!` - One line per inliner run (sites inlined, growth)
//! - `debug!` - Every accepted or rejected inlining decision
//! - `trace!` - Graph surgery detail (block splits, stub resolution)
//!
//! Filter by module to follow a single stage:
//!
//! ```bash
//! RUST_LOG=jit_inliner::inliner::heuristics=debug cargo test
//! RUST_LOG=jit_inliner::inliner::splicer=trace cargo test
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging at Warn level.
///
/// This only initializes once; subsequent calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Initialize logging with a specific level.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        let _ = Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {} - {}",
                    record.level(),
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            })
            .try_init();
    });
}

/// Initialize logging from the RUST_LOG environment variable,
/// defaulting to Warn.
pub fn init_from_env() {
    INIT.call_once(|| {
        let _ = Builder::from_env(env_logger::Env::default().default_filter_or("warn")).try_init();
    });
}

/// Initialize logging for tests; output is captured by the test harness.
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
        init();
    }
}
