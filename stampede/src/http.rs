use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use url::Url;

/// Why a request produced no status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    Other,
}

/// A fully-formed request, ready to be issued.
///
/// The URL is an already-parsed [`Url`], so a malformed URL can never reach
/// [`HttpExecutor::execute`]: parsing happens at configuration time and
/// fails the run before it starts.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Overrides the client-wide timeout when set.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            timeout: None,
        }
    }
}

/// The outcome of one HTTP call. Network failures are data here, not faults:
/// `status` is absent and `error` says why.
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub url: Url,
    pub method: Method,
    pub status: Option<u16>,
    pub latency: Duration,
    pub error: Option<ErrorKind>,
}

impl RequestResult {
    /// A request counts as failed when it never got a status code or the
    /// status is outside 200..=399.
    pub fn failed(&self) -> bool {
        self.error.is_some() || !matches!(self.status, Some(200..=399))
    }
}

/// Issues single HTTP requests on behalf of scenario invocations.
///
/// Wraps one shared [`reqwest::Client`] (and so one shared connection pool)
/// for all virtual users; a semaphore bounds concurrent in-flight requests so
/// client-side resource pressure stays realistic at high VU counts.
pub struct HttpExecutor {
    client: Client,
    in_flight: Arc<Semaphore>,
}

impl HttpExecutor {
    pub fn new(client: Client, max_connections: usize) -> Self {
        Self {
            client,
            in_flight: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Issue one request. Never returns an error for ordinary network
    /// conditions; those come back as a [`RequestResult`] with an
    /// [`ErrorKind`].
    pub async fn execute(&self, req: HttpRequest) -> RequestResult {
        // The semaphore is never closed, so acquisition only ever waits.
        let _permit = self.in_flight.acquire().await.ok();

        let mut builder = self.client.request(req.method.clone(), req.url.clone());
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }

        let start = Instant::now();
        let outcome = builder.send().await;
        let latency = start.elapsed();

        match outcome {
            Ok(response) => RequestResult {
                url: req.url,
                method: req.method,
                status: Some(response.status().as_u16()),
                latency,
                error: None,
            },
            Err(err) => {
                tracing::debug!(url = %req.url, error = %err, "request failed");
                RequestResult {
                    url: req.url,
                    method: req.method,
                    status: None,
                    latency,
                    error: Some(classify(&err)),
                }
            }
        }
    }
}

fn classify(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() {
        ErrorKind::ConnectionRefused
    } else {
        ErrorKind::Other
    }
}
