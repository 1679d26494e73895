//! Diagnostic logging to stderr, filtered by `QUILL_LOG`.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "QUILL_LOG";
pub const DEFAULT_LEVEL: &str = "warn";

/// Build the filter from `directives`, falling back to `default_level` when
/// they are missing or invalid.
pub fn filter_from(directives: Option<&str>, default_level: &str) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_new(default_level).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LEVEL))
}

/// Install the global subscriber. `verbose` raises the default to `debug`.
/// Safe to call more than once; later calls are no-ops.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { DEFAULT_LEVEL };
    let directives = std::env::var(LOG_ENV).ok();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter_from(directives.as_deref(), default_level));
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}
