//! Collects the outcome of every request and derives summary statistics from them.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use reqwest::StatusCode;
use sketches_ddsketch::DDSketch;
use tokio::task::JoinError;
use yansi::Paint;

use crate::workload::PlannedRequest;

/// How a single request resolved.
///
/// Every request ends up in exactly one of these states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestStatus {
    /// The endpoint replied `200 OK` with a JSON body.
    Success,
    /// The endpoint replied with a status other than `200 OK`.
    HttpError,
    /// The request did not complete within the request timeout.
    Timeout,
    /// The endpoint replied `200 OK`, but the body is not valid JSON.
    MalformedResponse,
    /// The request failed for any other reason, including a failed request task.
    TransportException,
}

impl RequestStatus {
    /// Returns `true` for [`RequestStatus::Success`].
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// The kebab-case name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::HttpError => "http-error",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed-response",
            Self::TransportException => "transport-exception",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classified result of sending one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// The classification of the result.
    pub status: RequestStatus,
    /// The HTTP status code, if a response was received.
    pub http_status: Option<u16>,
    /// Time from sending the request until it resolved.
    pub latency: Duration,
    /// Description of the failure, `None` on success.
    pub error: Option<String>,
}

impl Outcome {
    /// Classifies a transport error as timeout or transport exception.
    pub(crate) fn from_error(err: &reqwest::Error, latency: Duration) -> Self {
        let status = if err.is_timeout() {
            RequestStatus::Timeout
        } else {
            RequestStatus::TransportException
        };

        Self {
            status,
            http_status: None,
            latency,
            error: Some(error_chain(err)),
        }
    }

    /// A request task that panicked or was cancelled before producing a result.
    pub(crate) fn from_join_error(err: &JoinError, latency: Duration) -> Self {
        Self {
            status: RequestStatus::TransportException,
            http_status: None,
            latency,
            error: Some(format!("request task failed: {err}")),
        }
    }

    pub(crate) fn with_http_status(mut self, status: StatusCode) -> Self {
        self.http_status = Some(status.as_u16());
        self
    }
}

fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}

/// The record of a single issued request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRecord {
    /// Name of the category this request was drawn from.
    pub category: String,
    /// Identifier of the item sent to the endpoint.
    pub image_key: String,
    /// Number of clusters requested from the endpoint.
    pub k_clusters: u32,
    /// Zero-based index of the batch this request was issued in.
    pub batch: usize,
    /// Wall-clock time at which the request was issued.
    pub issued_at: SystemTime,
    /// The classification of the result.
    pub status: RequestStatus,
    /// The HTTP status code, if a response was received.
    pub http_status: Option<u16>,
    /// Time from sending the request until it resolved.
    pub latency: Duration,
    /// Description of the failure, `None` on success.
    pub error: Option<String>,
}

impl RequestRecord {
    /// Finalizes the record of `request` with the observed outcome.
    pub fn new(request: PlannedRequest, issued_at: SystemTime, outcome: Outcome) -> Self {
        Self {
            category: request.category,
            image_key: request.image_key,
            k_clusters: request.k_clusters,
            batch: request.batch,
            issued_at,
            status: outcome.status,
            http_status: outcome.http_status,
            latency: outcome.latency,
            error: outcome.error,
        }
    }
}

/// All records of a run, split into successes and failures in the order they were collected.
#[derive(Debug)]
pub struct ResultSet {
    successes: Vec<RequestRecord>,
    failures: Vec<RequestRecord>,
    started_at: SystemTime,
    started: Instant,
    finished: Option<(SystemTime, Duration)>,
}

impl ResultSet {
    /// Creates an empty result set, marking the start of the run.
    pub fn new() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            started_at: SystemTime::now(),
            started: Instant::now(),
            finished: None,
        }
    }

    /// Adds a finalized record.
    pub fn record(&mut self, record: RequestRecord) {
        if record.status.is_success() {
            self.successes.push(record);
        } else {
            self.failures.push(record);
        }
    }

    /// Marks the end of the run. Subsequent calls keep the first end time.
    pub fn finish(&mut self) {
        if self.finished.is_none() {
            self.finished = Some((SystemTime::now(), self.started.elapsed()));
        }
    }

    /// All successful requests.
    pub fn successes(&self) -> &[RequestRecord] {
        &self.successes
    }

    /// All failed requests.
    pub fn failures(&self) -> &[RequestRecord] {
        &self.failures
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// Returns `true` if no request has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all records, successes first.
    pub fn records(&self) -> impl Iterator<Item = &RequestRecord> {
        self.successes.iter().chain(&self.failures)
    }

    /// Wall-clock time at which the run started.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Wall-clock time at which the run finished, if it has.
    pub fn finished_at(&self) -> Option<SystemTime> {
        self.finished.map(|(at, _)| at)
    }

    /// Duration of the run, or the time elapsed so far if it is still running.
    pub fn duration(&self) -> Duration {
        match self.finished {
            Some((_, duration)) => duration,
            None => self.started.elapsed(),
        }
    }

    /// Computes summary statistics over the current records.
    pub fn summary(&self) -> Summary {
        let successful = self.successes.len();
        let failed = self.failures.len();
        let total = successful + failed;

        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        };

        let mut sketch = DDSketch::default();
        let mut latency_sum = Duration::ZERO;
        let mut min_latency = None;
        let mut max_latency = Duration::ZERO;
        for record in &self.successes {
            sketch.add(record.latency.as_secs_f64());
            latency_sum += record.latency;
            max_latency = max_latency.max(record.latency);
            min_latency = Some(min_latency.map_or(record.latency, |min: Duration| {
                min.min(record.latency)
            }));
        }

        let avg_latency = if successful == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(latency_sum.as_secs_f64() / successful as f64)
        };

        let quantile = |q: f64| -> Option<Duration> {
            let value = sketch.quantile(q).ok().flatten()?;
            Some(Duration::from_secs_f64(value.max(0.0)))
        };

        let mut failures_by_status: BTreeMap<RequestStatus, usize> = BTreeMap::new();
        for record in &self.failures {
            *failures_by_status.entry(record.status).or_default() += 1;
        }

        let mut requests_by_category: BTreeMap<String, usize> = BTreeMap::new();
        for record in self.records() {
            *requests_by_category
                .entry(record.category.clone())
                .or_default() += 1;
        }

        Summary {
            total,
            successful,
            failed,
            success_rate,
            avg_latency,
            min_latency: min_latency.unwrap_or_default(),
            max_latency,
            p50_latency: quantile(0.5),
            p90_latency: quantile(0.9),
            p99_latency: quantile(0.99),
            duration: self.duration(),
            failures_by_status,
            requests_by_category,
        }
    }
}

impl Default for ResultSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate statistics of a run.
///
/// Latency figures cover successful requests only and are zero if there were none.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    /// Number of issued requests.
    pub total: usize,
    /// Number of successful requests.
    pub successful: usize,
    /// Number of failed requests.
    pub failed: usize,
    /// Percentage of successful requests, in `0.0..=100.0`.
    pub success_rate: f64,
    /// Mean latency of successful requests.
    pub avg_latency: Duration,
    /// Lowest latency of successful requests.
    pub min_latency: Duration,
    /// Highest latency of successful requests.
    pub max_latency: Duration,
    /// Approximate median latency of successful requests.
    pub p50_latency: Option<Duration>,
    /// Approximate 90th percentile latency of successful requests.
    pub p90_latency: Option<Duration>,
    /// Approximate 99th percentile latency of successful requests.
    pub p99_latency: Option<Duration>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Number of failed requests per failure kind.
    pub failures_by_status: BTreeMap<RequestStatus, usize>,
    /// Number of issued requests per category.
    pub requests_by_category: BTreeMap<String, usize>,
}

impl Summary {
    /// Issued requests per second of wall-clock time.
    pub fn requests_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 { self.total as f64 / secs } else { 0.0 }
    }

    /// Emits the summary as a structured log event.
    pub fn log(&self) {
        tracing::info!(
            total = self.total,
            successful = self.successful,
            failed = self.failed,
            success_rate = self.success_rate,
            avg_latency = ?self.avg_latency,
            min_latency = ?self.min_latency,
            max_latency = ?self.max_latency,
            duration = ?self.duration,
            "load test finished"
        );
    }

    /// Prints a human-readable report to stdout.
    pub fn print(&self) {
        println!();
        println!("{}", "## SUMMARY".bold());

        print!(
            "{} ({} total, {} successful",
            "REQUESTS:".bold().green(),
            self.total.bold(),
            self.successful.bold()
        );
        if self.failed > 0 {
            print!(", {}", format!("{} FAILED", self.failed).bold().red());
        }
        println!(")");
        println!("  success rate: {:.2}%", self.success_rate.bold());
        println!(
            "  duration: {:.2?}; {:.2} requests/s",
            self.duration.bold(),
            self.requests_per_second()
        );

        if self.successful > 0 {
            println!(
                "  latency avg: {:.2?}; min: {:.2?}; max: {:.2?}",
                self.avg_latency.bold(),
                self.min_latency,
                self.max_latency
            );
            if let (Some(p50), Some(p90), Some(p99)) =
                (self.p50_latency, self.p90_latency, self.p99_latency)
            {
                println!("  p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
            }
        }

        if !self.failures_by_status.is_empty() {
            println!("{}", "FAILURES:".bold().red());
            for (status, count) in &self.failures_by_status {
                println!("  {status}: {}", count.bold());
            }
        }

        if !self.requests_by_category.is_empty() {
            println!("{}", "CATEGORIES:".bold().blue());
            for (category, count) in &self.requests_by_category {
                println!("  {category}: {count}");
            }
        }
    }
}
