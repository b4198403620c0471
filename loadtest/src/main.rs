//! Runs a load test against a remote clustering endpoint and prints a summary.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::path::PathBuf;

use anyhow::Context;
use argh::FromArgs;

use loadtest::config::Config;
use loadtest::{HttpRemote, observability};

/// Load generator for the image clustering endpoint
#[derive(Debug, FromArgs)]
pub struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// target URL, overrides the configured one
    #[argh(option)]
    pub url: Option<String>,

    /// RNG seed for a reproducible request plan
    #[argh(option)]
    pub seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let mut config = Config::load(args.config.as_deref()).context("failed to load config")?;
    if args.url.is_some() {
        config.url = args.url;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    // Requests of a batch are interleaved on a single thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing();
    tracing::debug!(?config);

    let load_test = config.into_load_test().context("invalid load test configuration")?;
    let remote = HttpRemote::new(load_test.config()).context("failed to create HTTP client")?;

    let results = runtime.block_on(loadtest::run(remote, load_test));

    let summary = results.summary();
    summary.log();
    summary.print();

    Ok(())
}
