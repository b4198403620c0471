//! Contains a remote implementation using HTTP to talk to the endpoint under test.

use std::time::Instant;

use reqwest::{StatusCode, Url};
use serde::Serialize;

use crate::results::{Outcome, RequestStatus};
use crate::workload::{PlannedRequest, RunConfig};

/// JSON body of every request sent to the endpoint.
#[derive(Debug, Serialize)]
struct RequestBody<'a> {
    image_key: &'a str,
    k_clusters: u32,
}

/// A remote implementation using HTTP to talk to the endpoint under test.
///
/// The underlying client is a connection pool and is cheap to clone, so a single remote can be
/// shared by all concurrently running requests.
#[derive(Clone, Debug)]
pub struct HttpRemote {
    url: Url,
    client: reqwest::Client,
}

impl HttpRemote {
    /// Creates a remote for the URL in `config`, applying its per-request timeout.
    pub fn new(config: &RunConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self::with_client(config.url().clone(), client))
    }

    /// Creates a remote for `url` that sends its requests through `client`.
    pub fn with_client(url: Url, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    /// The endpoint this remote sends requests to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends the request and classifies its result.
    ///
    /// This never fails: every error is turned into a failed [`Outcome`].
    pub(crate) async fn send(&self, request: &PlannedRequest) -> Outcome {
        let start = Instant::now();
        let body = RequestBody {
            image_key: &request.image_key,
            k_clusters: request.k_clusters,
        };

        // `json` also sets `Content-Type: application/json`.
        let result = self.client.post(self.url.clone()).json(&body).send().await;

        let response = match result {
            Ok(response) => response,
            Err(err) => return Outcome::from_error(&err, start.elapsed()),
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            // The status alone decides an http-error, even if the body is cut short.
            Err(err) if status != StatusCode::OK => {
                return Outcome {
                    status: RequestStatus::HttpError,
                    http_status: Some(status.as_u16()),
                    latency: start.elapsed(),
                    error: Some(format!("{status}: failed to read body: {err}")),
                };
            }
            Err(err) => return Outcome::from_error(&err, start.elapsed()).with_http_status(status),
        };
        let latency = start.elapsed();

        if status != StatusCode::OK {
            return Outcome {
                status: RequestStatus::HttpError,
                http_status: Some(status.as_u16()),
                latency,
                error: Some(format!("{status}: {}", String::from_utf8_lossy(&bytes))),
            };
        }

        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(_) => Outcome {
                status: RequestStatus::Success,
                http_status: Some(status.as_u16()),
                latency,
                error: None,
            },
            Err(err) => Outcome {
                status: RequestStatus::MalformedResponse,
                http_status: Some(status.as_u16()),
                latency,
                error: Some(format!("invalid JSON body: {err}")),
            },
        }
    }
}
