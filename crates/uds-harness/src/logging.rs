//! Test logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn,uds_harness=info,example_ecu=info";

/// Install a `tracing` subscriber that writes through the test harness
///
/// Honors `RUST_LOG`. Safe to call from every test; only the first call in
/// a process installs anything.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
