//! Tracing/log initialization.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the tracing subscriber and bridges `log` records into it.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));

    let _ = tracing::subscriber::set_global_default(subscriber);
}
