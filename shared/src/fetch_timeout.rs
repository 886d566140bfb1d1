use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;

/// Timeout the config request before the 30s origin-request limit so that a
/// fallback response can still be produced.
pub const FETCH_TIMEOUT: Duration = Duration::from_millis(29_500);

/// Response of a single GET, with header names lowercased
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal outbound HTTP capability used for config and origin fetches
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<HttpResponse, FetchError>;
}

/// `HttpClient` backed by reqwest
#[derive(Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<HttpResponse, FetchError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request.send().await.map_err(|e| FetchError::Network {
            url: url.to_string(),
            source: Box::new(e),
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                source: Box::new(e),
            })?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Single GET with a hard deadline and an optional etag validator
#[derive(Clone)]
pub struct TimeoutFetcher {
    client: Arc<dyn HttpClient>,
}

impl TimeoutFetcher {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// Fetch `url`, giving up after `timeout`.
    ///
    /// When the deadline passes first the in-flight request future is dropped,
    /// which cancels it. A validator is sent as `If-None-Match` so the remote
    /// can answer `304`.
    pub async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        validator: Option<&str>,
    ) -> Result<HttpResponse, FetchError> {
        let mut headers = Vec::new();
        if let Some(etag) = validator {
            headers.push(("If-None-Match", format!("\"{}\"", etag)));
        }

        match tokio::time::timeout(timeout, self.client.get(url, &headers)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Timeout after {:?} while fetching {}", timeout, url);
                Err(FetchError::Timeout {
                    url: url.to_string(),
                })
            }
        }
    }
}
