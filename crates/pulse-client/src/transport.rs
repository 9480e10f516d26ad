//! Transport abstraction and implementations
//!
//! The SDK needs exactly one capability from the network: fetch a URL via
//! HTTP GET and, when the caller cares, hand back the response body.
//! Beacons are fire-and-forget; only configuration fetches read the body.

use async_trait::async_trait;
use pulse_core::{PulseError, PulseResult};
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// The abstract "GET a URL" capability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a URL, returning the response body.
    ///
    /// Callers that do not need the body simply discard it.
    async fn fetch(&self, url: &str, user_agent: Option<&str>) -> PulseResult<String>;
}

/// Production transport backed by a shared reqwest client.
#[derive(Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, user_agent: Option<&str>) -> PulseResult<String> {
        let mut request = self.client.get(url);
        if let Some(ua) = user_agent {
            request = request.header(reqwest::header::USER_AGENT, ua);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PulseError::Transport(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| PulseError::Transport(e.to_string()))
    }
}

/// One recorded fetch made through a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct FetchRecord {
    /// The URL that was requested.
    pub url: String,
    /// The User-Agent header, when one was set.
    pub user_agent: Option<String>,
}

/// In-memory transport for tests and local harnesses.
///
/// Records every request and answers each fetch with the next queued
/// response body, or an empty body once the queue is exhausted (which is
/// what fire-and-forget beacon sends expect anyway).
#[derive(Debug, Default)]
pub struct MemoryTransport {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<FetchRecord>>,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response body for a future fetch.
    pub async fn push_response(&self, body: impl Into<String>) {
        self.responses.lock().await.push_back(body.into());
    }

    /// All requests made so far, in order.
    pub async fn requests(&self) -> Vec<FetchRecord> {
        self.requests.lock().await.clone()
    }

    /// Number of requests made so far.
    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, url: &str, user_agent: Option<&str>) -> PulseResult<String> {
        self.requests.lock().await.push(FetchRecord {
            url: url.to_owned(),
            user_agent: user_agent.map(str::to_owned),
        });

        Ok(self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_transport_records_requests_in_order() {
        let transport = MemoryTransport::new();
        transport.push_response("first").await;

        let body = transport.fetch("http://a/", Some("pulse-test")).await.unwrap();
        assert_eq!(body, "first");

        let body = transport.fetch("http://b/", None).await.unwrap();
        assert_eq!(body, "");

        let requests = transport.requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "http://a/");
        assert_eq!(requests[0].user_agent.as_deref(), Some("pulse-test"));
        assert_eq!(requests[1].url, "http://b/");
    }
}
