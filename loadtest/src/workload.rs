//! Defines a [`LoadTest`]: the validated run parameters, the remaining request quota per
//! category, and the planning of request batches.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use reqwest::Url;

use crate::error::ConfigError;

/// Pause between two consecutive batches unless configured otherwise.
pub const DEFAULT_PACING: Duration = Duration::from_millis(100);

/// Upper bound on the lifetime of a single request unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default extension appended to generated item identifiers.
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Range of the numeral embedded in generated item identifiers.
const ITEM_NUMBERS: RangeInclusive<u32> = 1..=200;

/// A builder for creating a [`LoadTest`].
///
/// Every setter validates its own input immediately and returns a [`ConfigError`] on invalid
/// values, so that a misconfiguration is reported at the point where it was made.
#[derive(Debug)]
pub struct LoadTestBuilder {
    categories: Vec<Category>,
    k_min: u32,
    k_max: u32,
    concurrency: usize,
    url: Option<Url>,
    pacing: Duration,
    request_timeout: Duration,
    extension: String,
    seed: u64,
}

impl LoadTestBuilder {
    /// Sets the initial counts for the `small`, `medium` and `large` categories.
    ///
    /// This replaces all previously configured categories.
    pub fn counts(mut self, small: i64, medium: i64, large: i64) -> Result<Self, ConfigError> {
        let categories: Vec<Category> = [("small", small), ("medium", medium), ("large", large)]
            .into_iter()
            .map(|(name, count)| Category::new(name, count))
            .collect::<Result<_, _>>()?;

        self.categories = categories;
        Ok(self)
    }

    /// Adds a category with the given initial count.
    ///
    /// Categories are scanned in the order they were added. Setting the count of an existing
    /// category replaces it in place.
    pub fn category(mut self, name: impl Into<String>, count: i64) -> Result<Self, ConfigError> {
        let category = Category::new(name, count)?;
        match self.categories.iter_mut().find(|c| c.name == category.name) {
            Some(existing) => existing.count = category.count,
            None => self.categories.push(category),
        }
        Ok(self)
    }

    /// Sets the inclusive range from which the `k_clusters` of every request is drawn.
    pub fn k_range(mut self, k_min: i64, k_max: i64) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidKRange {
            min: k_min,
            max: k_max,
        };

        if k_min <= 0 || k_min > k_max {
            return Err(invalid());
        }

        self.k_min = u32::try_from(k_min).map_err(|_| invalid())?;
        self.k_max = u32::try_from(k_max).map_err(|_| invalid())?;
        Ok(self)
    }

    /// The maximum number of requests in flight at the same time.
    pub fn concurrency(mut self, concurrency: i64) -> Result<Self, ConfigError> {
        self.concurrency = usize::try_from(concurrency)
            .ok()
            .filter(|c| *c > 0)
            .ok_or(ConfigError::InvalidConcurrency(concurrency))?;
        Ok(self)
    }

    /// The endpoint that receives all requests. Must be an `http` or `https` URL.
    pub fn url(mut self, url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: url.to_owned(),
            reason: reason.to_owned(),
        };

        if url.trim().is_empty() {
            return Err(invalid("url must not be empty"));
        }

        let parsed = Url::parse(url).map_err(|err| invalid(&err.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }

        self.url = Some(parsed);
        Ok(self)
    }

    /// Pause between two consecutive batches.
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Upper bound on the lifetime of a single request, after which it counts as timed out.
    pub fn request_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }

        self.request_timeout = timeout;
        Ok(self)
    }

    /// Extension appended to generated item identifiers, with or without a leading dot.
    pub fn extension(mut self, extension: &str) -> Result<Self, ConfigError> {
        let extension = extension.trim_start_matches('.');
        if extension.is_empty() || extension.contains('/') {
            return Err(ConfigError::InvalidExtension);
        }

        self.extension = extension.to_owned();
        Ok(self)
    }

    /// Seeds the RNG that picks categories, cluster counts and item identifiers.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Creates the load test instance.
    ///
    /// If every category has a count of zero, the first category is bumped to a single request
    /// and a warning is logged.
    pub fn build(self) -> Result<LoadTest, ConfigError> {
        let url = self.url.ok_or(ConfigError::MissingUrl)?;

        let mut categories = self.categories;
        let total = categories
            .iter()
            .try_fold(0u64, |total, c| total.checked_add(c.count))
            .ok_or(ConfigError::TooManyRequests)?;

        if let Some(first) = categories.first_mut().filter(|_| total == 0) {
            tracing::warn!(
                category = %first.name,
                "no request counts set, defaulting to a single request"
            );
            first.count = 1;
        }

        let config = RunConfig {
            categories,
            k_range: self.k_min..=self.k_max,
            concurrency: self.concurrency,
            url,
            pacing: self.pacing,
            request_timeout: self.request_timeout,
            extension: self.extension,
            seed: self.seed,
        };

        Ok(LoadTest {
            quota: QuotaPool::new(&config),
            rng: SmallRng::seed_from_u64(config.seed),
            config,
        })
    }
}

/// A named class of workload items together with its initial request count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Category {
    /// Name of the category, used as prefix of generated item identifiers.
    pub name: String,
    /// Number of requests to issue for this category.
    pub count: u64,
}

impl Category {
    fn new(name: impl Into<String>, count: i64) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyCategoryName);
        }

        match u64::try_from(count) {
            Ok(count) => Ok(Self { name, count }),
            Err(_) => Err(ConfigError::InvalidCount {
                category: name,
                count,
            }),
        }
    }
}

/// The immutable, validated parameters of a single run.
#[derive(Debug)]
pub struct RunConfig {
    categories: Vec<Category>,
    k_range: RangeInclusive<u32>,
    concurrency: usize,
    url: Url,
    pacing: Duration,
    request_timeout: Duration,
    extension: String,
    seed: u64,
}

impl RunConfig {
    /// All categories in scan order, with their initial counts.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Total number of requests this run issues.
    pub fn total_requests(&self) -> u64 {
        self.categories
            .iter()
            .fold(0, |total: u64, c| total.saturating_add(c.count))
    }

    /// Inclusive range of `k_clusters` values.
    pub fn k_range(&self) -> RangeInclusive<u32> {
        self.k_range.clone()
    }

    /// The maximum number of requests in a single batch.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The endpoint that receives all requests.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Pause between two consecutive batches.
    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Upper bound on the lifetime of a single request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Extension of generated item identifiers, without the leading dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// The seed of the RNG driving this run.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Remaining number of requests per category.
///
/// Counts only ever decrease. The run is over exactly when [`total`](Self::total) reaches zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaPool {
    remaining: Vec<u64>,
}

impl QuotaPool {
    /// Creates a pool holding the initial counts of every category in `config`.
    pub fn new(config: &RunConfig) -> Self {
        Self::from_counts(config.categories.iter().map(|c| c.count))
    }

    pub(crate) fn from_counts(counts: impl IntoIterator<Item = u64>) -> Self {
        Self {
            remaining: counts.into_iter().collect(),
        }
    }

    /// Number of categories in this pool.
    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    /// Returns `true` if the pool tracks no categories at all.
    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Remaining requests for the category at `index`.
    pub fn remaining(&self, index: usize) -> u64 {
        self.remaining.get(index).copied().unwrap_or(0)
    }

    /// Remaining requests across all categories.
    pub fn total(&self) -> u64 {
        self.remaining
            .iter()
            .fold(0, |total: u64, r| total.saturating_add(*r))
    }

    /// Returns `true` once no category has any requests left.
    pub fn is_exhausted(&self) -> bool {
        self.remaining.iter().all(|r| *r == 0)
    }

    /// Scans categories circularly from `start` and returns the first one with quota left.
    ///
    /// Randomizing `start` spreads requests across categories roughly in proportion to their
    /// remaining share, without drawing from a weighted distribution. Returns `None` if the pool
    /// is exhausted.
    pub fn select(&self, start: usize) -> Option<usize> {
        let len = self.remaining.len();
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&index| self.remaining[index] > 0)
    }

    /// Selects a category like [`select`](Self::select) and consumes one request from it.
    pub fn take(&mut self, start: usize) -> Option<usize> {
        let index = self.select(start)?;
        self.remaining[index] -= 1;
        Some(index)
    }
}

/// A single request, fully determined before its batch is launched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedRequest {
    /// Name of the category this request was drawn from.
    pub category: String,
    /// Generated identifier of the item to process, e.g. `small_42.jpg`.
    pub image_key: String,
    /// Number of clusters requested from the endpoint.
    pub k_clusters: u32,
    /// Zero-based index of the batch this request belongs to.
    pub batch: usize,
}

/// A load test that can be run against a remote endpoint.
#[derive(Debug)]
pub struct LoadTest {
    config: RunConfig,
    quota: QuotaPool,
    rng: SmallRng,
}

impl LoadTest {
    /// Constructs a new load test builder with default settings.
    ///
    /// All category counts start at zero, `k` ranges over `1..=10`, and one request is issued at
    /// a time. A URL must be set before calling [`build`](LoadTestBuilder::build).
    pub fn builder() -> LoadTestBuilder {
        LoadTestBuilder {
            categories: ["small", "medium", "large"]
                .into_iter()
                .map(|name| Category {
                    name: name.to_owned(),
                    count: 0,
                })
                .collect(),
            k_min: 1,
            k_max: 10,
            concurrency: 1,
            url: None,
            pacing: DEFAULT_PACING,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            extension: DEFAULT_EXTENSION.to_owned(),
            seed: rand::random(),
        }
    }

    /// The validated parameters of this run.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The remaining quota of this run.
    pub fn quota(&self) -> &QuotaPool {
        &self.quota
    }

    /// Consumes quota for the next batch and returns the planned requests.
    ///
    /// The batch holds `min(concurrency, remaining quota)` requests. An empty batch is returned
    /// once the quota is exhausted.
    pub(crate) fn plan_batch(&mut self, batch: usize) -> Vec<PlannedRequest> {
        let remaining = usize::try_from(self.quota.total()).unwrap_or(usize::MAX);
        let size = self.config.concurrency.min(remaining);

        let mut requests = Vec::with_capacity(size);
        for _ in 0..size {
            // The quota total was checked above, so a category is always found.
            let start = self.rng.random_range(0..self.quota.len());
            let Some(index) = self.quota.take(start) else {
                break;
            };

            let name = &self.config.categories[index].name;
            let k_clusters = self.rng.random_range(self.config.k_range.clone());
            let number = self.rng.random_range(ITEM_NUMBERS);

            requests.push(PlannedRequest {
                category: name.clone(),
                image_key: format!("{name}_{number}.{}", self.config.extension),
                k_clusters,
                batch,
            });
        }

        requests
    }
}
