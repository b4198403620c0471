//! Logging for tests.

use tracing_subscriber::EnvFilter;

const CRATE_NAMES: &[&str] = &["loadtest", "loadtest_test"];

/// Initialize the logger for testing.
///
/// This logs to the stdout registered by the Rust test runner. Unless `RUST_LOG` is set, it only
/// captures logs from the load test crates.
///
/// # Example
///
/// ```
/// loadtest_test::tracing::init();
/// ```
pub fn init() {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        install(env_filter);
        return;
    }

    let mut env_filter = EnvFilter::new("ERROR");

    // Add all internal modules with maximum log-level.
    for name in CRATE_NAMES {
        if let Ok(directive) = format!("{name}=TRACE").parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    install(env_filter);
}

fn install(env_filter: EnvFilter) {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
