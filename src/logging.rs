//! Tracing subscriber setup for binaries and tests embedding this crate

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise the level falls back to
/// `info`, or `debug` when `debug` is true. Returns quietly if a subscriber
/// is already installed so embedding callers keep control.
pub fn init(debug: bool) {
    let fallback = if debug { "foldtrain=debug,info" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
