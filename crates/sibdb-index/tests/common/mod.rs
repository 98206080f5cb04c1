//! Helpers shared by the integration tests.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing` subscriber once per test binary.
///
/// Honors `RUST_LOG`; defaults to `info` so split logging stays quiet.
pub fn init_tracing_for_tests() {
    INIT.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        use tracing_subscriber::fmt;
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // Another harness may already own the global subscriber.
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}
