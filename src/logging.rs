//! Tracing setup for tools built on the harvester.
//!
//! The filter is taken from `HARVEST_LOG`, then `RUST_LOG`, and otherwise
//! logs this crate at the requested level and everything else at `warn`.

use tracing_subscriber::EnvFilter;

/// Variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "HARVEST_LOG";

/// Level used when no filter is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Filter directives for `level`: this crate at `level`, dependencies at `warn`.
pub fn default_directives(level: &str) -> String {
    let level = if level.trim().is_empty() {
        DEFAULT_LOG_LEVEL
    } else {
        level.trim()
    };
    format!("warn,{}={}", env!("CARGO_CRATE_NAME"), level)
}

fn build_filter(level: &str, lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .filter_map(|key| lookup(key))
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

/// Installs the global subscriber on stderr. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let filter = build_filter(level, |key| std::env::var(key).ok());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}
