// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tracing/logging bootstrap for the DICOM ingestion pipeline.
//!
//! A single entry point, [`init_tracing`], wires up `tracing-subscriber`
//! the way the daemon binary wants it: JSON-formatted output when `debug`
//! is off (the operator plane's log aggregator expects structured lines),
//! compact human-readable output when `debug` is on.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use tracing_subscriber::EnvFilter;

/// Env var consulted for the log filter directive, in addition to the
/// `debug` flag's own default.
pub const ENV_FILTER_VAR: &str = "INGEST_LOG";

/// Builds the `EnvFilter` this process should use: `RUST_LOG`-style
/// directives from [`ENV_FILTER_VAR`] if set, otherwise a default scoped
/// to this crate family at `debug` or `info` level.
pub fn build_filter(debug: bool) -> EnvFilter {
    if let Ok(directive) = std::env::var(ENV_FILTER_VAR) {
        return EnvFilter::new(directive);
    }
    let default = if debug {
        "ingest=debug,tower_http=debug,info"
    } else {
        "ingest=info,warn"
    };
    EnvFilter::new(default)
}

/// Initializes the global `tracing` subscriber for the daemon process.
///
/// Safe to call more than once within the same process — a second call
/// fails inside the underlying subscriber crate and that failure is
/// swallowed, since the test suite initializes it per-test.
pub fn init_tracing(debug: bool) {
    let filter = build_filter(debug);
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if debug {
        subscriber.pretty().try_init()
    } else {
        subscriber.json().try_init()
    };
    if let Err(err) = result {
        tracing::debug!(error = %err, "tracing subscriber already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_filter_defaults_differ_between_debug_and_release() {
        let debug = build_filter(true).to_string();
        let release = build_filter(false).to_string();
        assert_ne!(debug, release);
    }

    #[test]
    fn build_filter_honors_explicit_env_override() {
        std::env::set_var(ENV_FILTER_VAR, "ingest=trace");
        let filter = build_filter(false).to_string();
        assert_eq!(filter, "ingest=trace");
        std::env::remove_var(ENV_FILTER_VAR);
    }

    #[test]
    fn init_tracing_does_not_panic_on_repeated_calls() {
        init_tracing(true);
        init_tracing(true);
    }
}
