//! Backend that hands each dispatch to a launcher service over HTTP.
//!
//! The launcher receives a JSON [`LaunchRequest`] and answers once the worker
//! has finished. A 2xx answer is success; 408, 429 and 5xx are retryable;
//! any other status is a final failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument, warn};

use dispatch::{BackendError, BackendId, ComputeBackend, DispatchRequest};

use crate::launch::LaunchRequest;

/// Longest response body kept in a failure message.
const MAX_BODY_EXCERPT: usize = 512;

/// A [`ComputeBackend`] that POSTs to a launcher endpoint.
pub struct HttpBackend {
    id: BackendId,
    http: reqwest::Client,
    url: String,
    token: Option<SecretString>,
    timeout: Duration,
    server_url: String,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// Creates the backend.
    pub fn new(
        id: BackendId,
        http: reqwest::Client,
        url: impl Into<String>,
        timeout: Duration,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            http,
            url: url.into(),
            token: None,
            timeout,
            server_url: server_url.into(),
        }
    }

    /// Sends `token` as a bearer credential on every call.
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }
}

/// Whether a launcher answering `status` may succeed on a later attempt.
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl ComputeBackend for HttpBackend {
    #[instrument(skip(self, request), fields(backend = %self.id, execution = %request.execution_name))]
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), BackendError> {
        let body = LaunchRequest::new(request, &self.server_url);
        let mut call = self.http.post(&self.url).timeout(self.timeout).json(&body);
        if let Some(token) = &self.token {
            call = call.bearer_auth(token.expose_secret());
        }

        let response = match call.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                warn!(timeout_secs = self.timeout.as_secs(), "Launcher call timed out");
                return Err(BackendError::TimedOut {
                    backend: self.id.clone(),
                    after: self.timeout,
                });
            }
            Err(err) => {
                return Err(BackendError::Failed {
                    backend: self.id.clone(),
                    message: format!("launcher unreachable: {err}"),
                    retryable: true,
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(status = status.as_u16(), "Launcher reported worker finished");
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        let excerpt: String = text.chars().take(MAX_BODY_EXCERPT).collect();
        warn!(status = status.as_u16(), body = %excerpt, "Launcher reported failure");
        Err(BackendError::Failed {
            backend: self.id.clone(),
            message: format!("launcher returned {status}: {excerpt}"),
            retryable: is_retryable_status(status),
        })
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
