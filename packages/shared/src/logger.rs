//! Logging bootstrap.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// The filter is taken from `RUST_LOG` when set, otherwise `default_level`
/// is used (e.g. `"info"` or `"kakehashi_chat=debug"`).
///
/// Calling this twice is a no-op; the second call leaves the first
/// subscriber in place.
pub fn init_logger(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
    {
        tracing::debug!("logger initialized");
    }
}
