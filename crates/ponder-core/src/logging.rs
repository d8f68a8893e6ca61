//! Structured logging setup.
//!
//! All crates log through `tracing` macros with structured fields
//! (`session_id`, `reason`, `tokens`). Binaries embedding Ponder call
//! [`init_subscriber`] once at startup; libraries never install a
//! subscriber themselves.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with stderr output.
///
/// `RUST_LOG` takes precedence when set; otherwise `level` is used as the
/// filter directive (for example `"warn"` or `"ponder_sessions=debug"`).
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // set_global_default fails if already set; that is fine
    let _ = subscriber.try_init();
}
