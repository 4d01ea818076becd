//! [`SelectorHook`] over HTTP.
//!
//! The hook endpoint receives [`HookInput`] as a JSON POST. An empty body or
//! `null` accepts the default selection; otherwise the body is a
//! [`HookOverride`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use dispatch::{HookError, HookInput, HookOverride, SelectorHook};

/// Selector hook settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    /// Hook endpoint.
    pub url: String,
    /// Time allowed for one call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

/// Calls an HTTP endpoint to override backend selection.
#[derive(Debug, Clone)]
pub struct HttpSelectorHook {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpSelectorHook {
    /// Creates the hook client.
    pub fn new(http: reqwest::Client, config: &HookConfig) -> Self {
        Self {
            http,
            url: config.url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Reads a hook answer body.
pub(crate) fn parse_answer(body: &str) -> Result<Option<HookOverride>, HookError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Option<HookOverride>>(body).map_err(|e| HookError::Invocation {
        message: format!("unreadable hook answer: {e}"),
    })
}

#[async_trait]
impl SelectorHook for HttpSelectorHook {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn decide(&self, input: &HookInput) -> Result<Option<HookOverride>, HookError> {
        let invocation = |e: reqwest::Error| HookError::Invocation {
            message: e.to_string(),
        };
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(input)
            .send()
            .await
            .map_err(invocation)?;

        let status = response.status();
        if !status.is_success() {
            return Err(HookError::Invocation {
                message: format!("hook returned {status}"),
            });
        }
        let body = response.text().await.map_err(invocation)?;
        let answer = parse_answer(&body)?;
        debug!(answer = ?answer, "Selector hook answered");
        Ok(answer)
    }
}

#[cfg(test)]
#[path = "hook_tests.rs"]
mod tests;
