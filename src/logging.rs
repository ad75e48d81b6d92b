//! Process-wide logging init
//!
//! One thread-safe registry for the whole process, installed once and tied
//! to the pipeline lifetime. `RUST_LOG` overrides the default filter.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the tracing subscriber with the crate's default filter.
/// Idempotent; later calls are no-ops.
pub fn init() {
    init_with_filter("framepipe=info");
}

/// Install with an explicit fallback filter (used by the demo and tests).
pub fn init_with_filter(filter: &str) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_timer(tracing_subscriber::fmt::time::uptime())
            .init();
    });
}
