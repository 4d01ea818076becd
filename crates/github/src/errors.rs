//! GitHub adapter errors and their mapping onto [`ProviderError`].

use std::time::Duration;

use thiserror::Error;

use dispatch::{ProviderError, RetryPolicy};

/// Errors raised while talking to the GitHub REST API.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GithubError {
    /// The request never produced a response.
    #[error("GitHub request failed: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// GitHub answered with a non-success status.
    #[error("GitHub returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
        /// Delay requested through `Retry-After` or the rate-limit reset header.
        retry_after: Option<Duration>,
    },

    /// A response body did not have the expected shape.
    #[error("Cannot decode GitHub response: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
    },

    /// The GitHub App JWT could not be signed.
    #[error("Cannot sign GitHub App token: {message}")]
    Jwt {
        /// Description of the failure.
        message: String,
    },

    /// The adapter cannot perform the operation with its configuration.
    #[error("GitHub adapter misconfigured: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },
}

impl GithubError {
    /// Returns the HTTP status, if GitHub answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            GithubError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for a rejected credential.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Classifies the error for retry purposes.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            GithubError::Transport { .. } => RetryPolicy::Retryable { after: None },
            GithubError::Status {
                status,
                retry_after,
                ..
            } => match status {
                403 | 429 if retry_after.is_some() || *status == 429 => RetryPolicy::Retryable {
                    after: *retry_after,
                },
                500..=599 => RetryPolicy::Retryable { after: None },
                _ => RetryPolicy::NonRetryable,
            },
            GithubError::Decode { .. }
            | GithubError::Jwt { .. }
            | GithubError::Configuration { .. } => RetryPolicy::NonRetryable,
        }
    }

    /// Converts into the port-level error for calls made as `identity`.
    pub fn into_provider_error(self, identity: impl std::fmt::Display) -> ProviderError {
        match self {
            GithubError::Status {
                status: 401,
                message,
                ..
            } => ProviderError::Unauthorized {
                identity: identity.to_string(),
                message,
            },
            GithubError::Status {
                status,
                message,
                retry_after,
            } => match (status, retry_after) {
                (429, _) | (403, Some(_)) => ProviderError::RateLimited { retry_after },
                (500..=599, _) => ProviderError::Unavailable {
                    message: format!("{status}: {message}"),
                },
                _ => ProviderError::Rejected { status, message },
            },
            GithubError::Transport { message } | GithubError::Decode { message } => {
                ProviderError::Unavailable { message }
            }
            GithubError::Jwt { message } | GithubError::Configuration { message } => {
                ProviderError::Misconfigured { message }
            }
        }
    }
}

impl From<reqwest::Error> for GithubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GithubError::Decode {
                message: err.to_string(),
            }
        } else {
            GithubError::Transport {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
