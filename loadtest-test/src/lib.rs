//! Test utilities for the load test harness.
//!
//! This crate provides an in-process mock of the endpoint under test and a logger for tests. See
//! the modules for all available utilities.

pub mod server;
pub mod tracing;
