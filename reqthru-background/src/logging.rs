//! Logging setup

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `level` is an `EnvFilter` directive string (e.g. `"info"`,
/// `"reqthru_background=debug"`); an invalid directive falls back to
/// `info`. Calling this more than once is a no-op, so embedders and tests
/// can both call it freely.
pub fn init(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
