use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::debug;

use crate::{
    error::{HealthSyncError, Result},
    types::SyncConfig,
};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: Bytes,
}

impl HttpResponse {
    /// Check for a 2xx status
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client bound to one backend
///
/// Every request carries a bearer credential and is bounded by the connect
/// and request timeouts of the [`SyncConfig`] it was built from. A request
/// that produces no response is reported as [`HealthSyncError::Network`] or
/// [`HealthSyncError::Timeout`]; any response, whatever its status, is
/// returned as an [`HttpResponse`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    request_timeout_ms: u64,
}

impl HttpTransport {
    /// Build a transport from the client configuration
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Network`] if the TLS backend cannot be initialized.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| HealthSyncError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout_ms: config.request_timeout_ms,
        })
    }

    /// Full URL of an endpoint path
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Network`] or [`HealthSyncError::Timeout`] if
    /// no response was received.
    pub async fn post_json(
        &self,
        path: &str,
        bearer: &SecretString,
        headers: &[(&str, String)],
        body: Bytes,
    ) -> Result<HttpResponse> {
        let url = self.endpoint(path);
        debug!("POST {} ({} bytes)", url, body.len());

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(bearer.expose_secret())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        self.execute(request.body(body)).await
    }

    /// GET with query parameters
    ///
    /// # Errors
    ///
    /// Returns [`HealthSyncError::Network`] or [`HealthSyncError::Timeout`] if
    /// no response was received.
    pub async fn get(
        &self,
        path: &str,
        bearer: &SecretString,
        query: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        let url = self.endpoint(path);
        debug!("GET {}", url);

        let request = self
            .client
            .get(&url)
            .bearer_auth(bearer.expose_secret())
            .query(query);

        self.execute(request).await
    }

    async fn execute(&self, request: RequestBuilder) -> Result<HttpResponse> {
        let response = request.send().await.map_err(|e| self.map_error(&e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.map_error(&e))?;

        debug!("Response status {} ({} bytes)", status, body.len());
        Ok(HttpResponse { status, body })
    }

    fn map_error(&self, error: &reqwest::Error) -> HealthSyncError {
        if error.is_timeout() {
            HealthSyncError::Timeout {
                timeout_ms: self.request_timeout_ms,
            }
        } else {
            HealthSyncError::Network(error.to_string())
        }
    }
}
