//! A load generator that drives a remote clustering endpoint with batches of concurrent
//! requests.
//!
//! A [`LoadTest`] holds a finite quota of requests per workload category (`small`, `medium`,
//! `large` by default). [`run`] repeatedly forms a batch of up to `concurrency` requests,
//! sends all of them at once, waits for every one of them to resolve, pauses briefly and moves
//! on to the next batch until the quota is exhausted.
//!
//! Every request posts `{"image_key": ..., "k_clusters": ...}` to the endpoint. The item
//! identifier is derived from the category, and `k_clusters` is drawn uniformly from the
//! configured range. The outcome of each request is collected into a [`ResultSet`], from which
//! a [`Summary`](results::Summary) with success rate and latency statistics is derived.
//!
//! ```no_run
//! use loadtest::{HttpRemote, LoadTest};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let load_test = LoadTest::builder()
//!     .counts(2, 1, 0)?
//!     .k_range(2, 5)?
//!     .concurrency(2)?
//!     .url("https://example.com/process")?
//!     .build()?;
//!
//! let remote = HttpRemote::new(load_test.config())?;
//! let results = loadtest::run(remote, load_test).await;
//! results.summary().print();
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod results;
pub mod runner;
pub mod workload;

pub use crate::error::ConfigError;
pub use crate::http::HttpRemote;
pub use crate::results::ResultSet;
pub use crate::runner::run;
pub use crate::workload::{LoadTest, LoadTestBuilder};
