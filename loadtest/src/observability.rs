//! Logging setup for the load test binary.

use std::env;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Default directives when `RUST_LOG` is unset or a plain level.
///
/// The HTTP client stack logs every connection and stream at debug level, which drowns out the
/// per-request warnings of a run with many concurrent requests.
const DEFAULT_DIRECTIVES: &str = "INFO,\
    h2=WARN,\
    hyper=WARN,\
    hyper_util=WARN,\
    reqwest=WARN,\
    loadtest=TRACE";

/// Installs a global subscriber that logs to stderr.
pub fn init_tracing() {
    let rust_log = env::var(EnvFilter::DEFAULT_ENV).ok();
    let (level, env_filter) = parse_rust_log(rust_log.as_deref());
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(LevelFilter::from(level)))
        .with(env_filter)
        .init();
}

/// Returns the maximum level to print and the filter for the given `RUST_LOG` value.
///
/// A plain level such as `debug` caps the output while keeping the default directives. Anything
/// else is used literally as the filter.
fn parse_rust_log(rust_log: Option<&str>) -> (Level, EnvFilter) {
    let level = match rust_log {
        Some(value) => match value.parse::<Level>() {
            Ok(level) => level,
            Err(_) => return (Level::TRACE, EnvFilter::new(value)),
        },
        None => Level::INFO,
    };

    (level, EnvFilter::new(DEFAULT_DIRECTIVES))
}
