//! Request transports: HTTP for real devices, recorded responses for replay

use async_trait::async_trait;
use eta_core::RecordedResponses;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

use crate::client::ClientError;

/// Executes raw requests against one controller.
///
/// Implementations return the response body; decoding happens in the client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str) -> Result<String, ClientError>;

    async fn post(&self, path: &str, form: &[(&'static str, String)]) -> Result<String, ClientError>;
}

/// HTTP transport backed by reqwest
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("eta-rest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("http://{}:{}", host, port),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_error(&self, path: &str, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout {
                path: path.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            ClientError::Transport(err.to_string())
        }
    }

    async fn read(&self, path: &str, response: reqwest::Response) -> Result<String, ClientError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Http {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|e| self.map_error(path, e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> Result<String, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        trace!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_error(path, e))?;
        self.read(path, response).await
    }

    async fn post(&self, path: &str, form: &[(&'static str, String)]) -> Result<String, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        trace!(url = %url, fields = form.len(), "POST");
        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| self.map_error(path, e))?;
        self.read(path, response).await
    }
}

const DEFAULT_WRITE_RESPONSE: &str = r#"<eta version="1.0" xmlns="http://www.eta.co.at/rest/v1"><success/></eta>"#;

/// Replays recorded responses, keyed by request path.
///
/// Writes are recorded and answered with `POST <path>` entries when present,
/// `<success/>` otherwise. Optional latency and in-flight accounting make it
/// usable for concurrency tests.
pub struct FixtureTransport {
    responses: RecordedResponses,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: AtomicUsize,
    writes: Mutex<Vec<(String, Vec<(&'static str, String)>)>>,
}

impl FixtureTransport {
    pub fn new(responses: RecordedResponses) -> Self {
        Self {
            responses,
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Delay every response by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Highest number of simultaneously outstanding requests seen
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Writes received so far, as (path, form fields)
    pub fn writes(&self) -> Vec<(String, Vec<(&'static str, String)>)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    async fn respond(&self, key: &str, fallback: Option<&str>) -> Result<String, ClientError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = match self.responses.get(key).or(fallback) {
            Some(body) => Ok(body.to_string()),
            None => {
                debug!(path = %key, "No recorded response");
                Err(ClientError::Http {
                    path: key.to_string(),
                    status: 404,
                })
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn get(&self, path: &str) -> Result<String, ClientError> {
        self.respond(path, None).await
    }

    async fn post(&self, path: &str, form: &[(&'static str, String)]) -> Result<String, ClientError> {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((path.to_string(), form.to_vec()));
        }
        self.respond(&format!("POST {}", path), Some(DEFAULT_WRITE_RESPONSE))
            .await
    }
}
