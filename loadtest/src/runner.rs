//! Runs a [`LoadTest`] against a remote endpoint in paced batches of concurrent requests.

use std::time::{Duration, Instant, SystemTime};

use indicatif::{ProgressBar, ProgressStyle};

use crate::http::HttpRemote;
use crate::results::{Outcome, RequestRecord, ResultSet};
use crate::workload::{LoadTest, PlannedRequest};

/// Phases of a run.
#[derive(Debug)]
enum State {
    Idle,
    FormingBatch,
    AwaitingBatch(Vec<PlannedRequest>),
    Paced,
    Done,
}

/// Runs the load test against the remote until its quota is exhausted.
///
/// Requests are issued in batches of at most `concurrency` requests. All requests of a batch run
/// concurrently and the next batch is only formed once every request of the current one has
/// resolved. Failed requests are recorded and never abort the run.
pub async fn run(remote: HttpRemote, mut load_test: LoadTest) -> ResultSet {
    let config = load_test.config();
    let pacing = config.pacing();
    tracing::info!(
        url = %remote.url(),
        requests = config.total_requests(),
        concurrency = config.concurrency(),
        seed = config.seed(),
        "starting load test"
    );

    let bar = ProgressBar::new(config.total_requests())
        .with_style(
            ProgressStyle::with_template("{spinner} {msg} {wide_bar} {pos}/{len} {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        )
        .with_message("Running load test:");
    bar.enable_steady_tick(Duration::from_millis(100));

    let mut results = ResultSet::new();
    let mut batch = 0;
    let mut state = State::Idle;

    loop {
        state = match state {
            State::Idle if load_test.quota().is_exhausted() => State::Done,
            State::Idle => State::FormingBatch,
            State::FormingBatch => State::AwaitingBatch(load_test.plan_batch(batch)),
            State::AwaitingBatch(requests) => {
                let count = requests.len();
                bar.suspend(|| {
                    tracing::debug!(batch, "initiating {count} concurrent requests");
                });

                let send = |request: PlannedRequest| {
                    let remote = remote.clone();
                    async move { remote.send(&request).await }
                };

                for record in execute_batch(requests, send).await {
                    if let Some(error) = &record.error {
                        bar.suspend(|| {
                            tracing::warn!(
                                image_key = %record.image_key,
                                k_clusters = record.k_clusters,
                                status = %record.status,
                                "request failed: {error}"
                            );
                        });
                    }
                    results.record(record);
                    bar.inc(1);
                }

                batch += 1;
                if load_test.quota().is_exhausted() {
                    State::Done
                } else {
                    State::Paced
                }
            }
            State::Paced => {
                tokio::time::sleep(pacing).await;
                State::FormingBatch
            }
            State::Done => break,
        };
    }

    bar.finish_and_clear();
    results.finish();
    tracing::debug!(batches = batch, "load test quota exhausted");

    results
}

/// Launches all requests at once and waits until every one of them has resolved.
///
/// Each request is sent by its own task. A task that fails to complete yields a
/// transport-exception record in place of its outcome.
async fn execute_batch<F, Fut>(requests: Vec<PlannedRequest>, send: F) -> Vec<RequestRecord>
where
    F: Fn(PlannedRequest) -> Fut,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let issued_at = SystemTime::now();
    let launched = Instant::now();

    let tasks: Vec<_> = requests
        .iter()
        .map(|request| tokio::spawn(send(request.clone())))
        .collect();

    let finished = futures::future::join_all(tasks).await;

    requests
        .into_iter()
        .zip(finished)
        .map(|(request, result)| {
            let outcome =
                result.unwrap_or_else(|err| Outcome::from_join_error(&err, launched.elapsed()));
            RequestRecord::new(request, issued_at, outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::results::RequestStatus;

    fn request(image_key: &str) -> PlannedRequest {
        PlannedRequest {
            category: "small".into(),
            image_key: image_key.into(),
            k_clusters: 3,
            batch: 0,
        }
    }

    fn success() -> Outcome {
        Outcome {
            status: RequestStatus::Success,
            http_status: Some(200),
            latency: Duration::from_millis(1),
            error: None,
        }
    }

    #[tokio::test]
    async fn panicking_task_becomes_transport_exception() {
        let requests = vec![
            request("small_1.jpg"),
            request("small_2.jpg"),
            request("small_3.jpg"),
        ];

        let records = execute_batch(requests, |request| async move {
            if request.image_key == "small_2.jpg" {
                panic!("request task blew up");
            }
            success()
        })
        .await;

        assert_eq!(records.len(), 3);

        let keys: Vec<_> = records.iter().map(|r| r.image_key.as_str()).collect();
        assert_eq!(keys, ["small_1.jpg", "small_2.jpg", "small_3.jpg"]);

        assert_eq!(records[0].status, RequestStatus::Success);
        assert_eq!(records[0].http_status, Some(200));
        assert_eq!(records[2].status, RequestStatus::Success);

        let failed = &records[1];
        assert_eq!(failed.status, RequestStatus::TransportException);
        assert_eq!(failed.http_status, None);
        assert_eq!(failed.category, "small");
        assert_eq!(failed.batch, 0);
        assert_eq!(failed.k_clusters, 3);
        assert!(failed.error.as_deref().unwrap().contains("request task failed"));
    }

    #[tokio::test]
    async fn batch_waits_for_every_task() {
        let requests = vec![request("small_1.jpg"), request("small_2.jpg")];

        let records = execute_batch(requests, |request| async move {
            if request.image_key == "small_1.jpg" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            success()
        })
        .await;

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status.is_success()));
    }
}
