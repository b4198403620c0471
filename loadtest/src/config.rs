//! Configuration for the load test binary.
//!
//! Configuration is merged from the following sources, highest precedence first:
//!
//! 1. Environment variables (prefixed with `LT__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Nested fields are separated by double underscores in environment variables, e.g.
//! `LT__COUNTS__SMALL=10` or `LT__K_RANGE__MAX=8`. The equivalent YAML file looks like this:
//!
//! ```yaml
//! url: https://example.com/process
//! counts:
//!   small: 10
//!   medium: 5
//!   large: 1
//! k_range:
//!   min: 2
//!   max: 8
//! concurrency: 4
//! pacing: 250ms
//! request_timeout: 5m
//! ```
//!
//! Values are validated when the configuration is turned into a [`LoadTest`].

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::workload::{DEFAULT_EXTENSION, DEFAULT_PACING, DEFAULT_REQUEST_TIMEOUT, LoadTest};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "LT__";

/// Number of requests per category.
///
/// Counts are signed so that negative values surface as validation errors.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Counts {
    /// Requests for the `small` category.
    pub small: i64,
    /// Requests for the `medium` category.
    pub medium: i64,
    /// Requests for the `large` category.
    pub large: i64,
}

/// Inclusive range of the `k_clusters` parameter.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct KRange {
    /// Lower bound, inclusive.
    pub min: i64,
    /// Upper bound, inclusive.
    pub max: i64,
}

impl Default for KRange {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

/// Load test configuration as read from YAML and the environment.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The endpoint receiving all requests. Required.
    pub url: Option<String>,
    /// Number of requests per category.
    pub counts: Counts,
    /// Range of the `k_clusters` parameter.
    pub k_range: KRange,
    /// Maximum number of requests per batch.
    pub concurrency: i64,

    /// Pause between two batches.
    #[serde(with = "humantime_serde")]
    pub pacing: Duration,
    /// Upper bound on the lifetime of a single request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Extension of the generated item identifiers.
    pub extension: String,
    /// Fixed RNG seed for reproducible request plans.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: None,
            counts: Counts::default(),
            k_range: KRange::default(),
            concurrency: 1,
            pacing: DEFAULT_PACING,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            extension: DEFAULT_EXTENSION.to_owned(),
            seed: None,
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, the optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Validates the configuration and creates the load test it describes.
    pub fn into_load_test(self) -> Result<LoadTest, ConfigError> {
        let mut builder = LoadTest::builder()
            .counts(self.counts.small, self.counts.medium, self.counts.large)?
            .k_range(self.k_range.min, self.k_range.max)?
            .concurrency(self.concurrency)?
            .extension(&self.extension)?
            .request_timeout(self.request_timeout)?
            .pacing(self.pacing);

        if let Some(url) = &self.url {
            builder = builder.url(url)?;
        }
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }

        builder.build()
    }
}
