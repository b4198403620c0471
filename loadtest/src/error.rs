//! Errors raised while configuring a load test.

use thiserror::Error;

/// Errors raised while assembling a [`LoadTest`](crate::LoadTest).
///
/// These are the only errors that prevent a run from starting. Once a run has started, request
/// failures are recorded in the [`ResultSet`](crate::results::ResultSet) instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A category was given a negative request count.
    #[error("count for category `{category}` must be non-negative, got {count}")]
    InvalidCount {
        /// Name of the offending category.
        category: String,
        /// The rejected count.
        count: i64,
    },

    /// A category was added without a name.
    #[error("category names must not be empty")]
    EmptyCategoryName,

    /// The counts of all categories add up to more than a run can track.
    #[error("total request count exceeds {}", u64::MAX)]
    TooManyRequests,

    /// The cluster-count range is empty or not strictly positive.
    #[error("k_min and k_max must be positive and k_min <= k_max, got {min}..={max}")]
    InvalidKRange {
        /// The lower bound of the range.
        min: i64,
        /// The upper bound of the range.
        max: i64,
    },

    /// The concurrency limit is not a positive integer.
    #[error("concurrency must be a positive integer, got {0}")]
    InvalidConcurrency(i64),

    /// The target URL could not be parsed or uses an unsupported scheme.
    #[error("invalid target url `{url}`: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why the URL was rejected.
        reason: String,
    },

    /// The per-request timeout is zero.
    #[error("request timeout must be greater than zero")]
    InvalidTimeout,

    /// No target URL was configured before building.
    #[error("a target url must be set before building the load test")]
    MissingUrl,

    /// The item extension is empty or contains a path separator.
    #[error("item extension must be non-empty and must not contain `/`")]
    InvalidExtension,
}
