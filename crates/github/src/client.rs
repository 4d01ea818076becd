//! Authenticated GitHub REST client with a per-installation session cache.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, LINK, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use dispatch::{InstallationId, Session, Timestamp};

use crate::auth::{sign_app_jwt, GithubAuth, TokenResponse};
use crate::errors::GithubError;

/// Public GitHub API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const MEDIA_TYPE: &str = "application/vnd.github+json";

/// Sessions expiring within this margin are minted again before use.
const SESSION_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for the GitHub API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// REST API base URL; set for GitHub Enterprise Server.
    pub api_base: String,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            user_agent: concat!("ephemera/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------

/// GitHub REST client.
///
/// Implements [`dispatch::CredentialBroker`], [`dispatch::DeploymentGate`] and
/// [`dispatch::DeliveryLog`].
pub struct GithubClient {
    http: reqwest::Client,
    config: GithubConfig,
    auth: GithubAuth,
    sessions: RwLock<HashMap<InstallationId, Session>>,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("config", &self.config)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    /// Creates a client.
    pub fn new(config: GithubConfig, auth: GithubAuth) -> Result<Self, GithubError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GithubError::Configuration {
                message: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            config,
            auth,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Connection settings in use.
    pub fn config(&self) -> &GithubConfig {
        &self.config
    }

    /// Returns a session for `identity`, minting one if none is cached or the
    /// cached one is about to expire.
    #[instrument(skip(self), fields(installation = %identity))]
    pub async fn session(&self, identity: InstallationId) -> Result<Session, GithubError> {
        let now = Timestamp::now();
        if let Some(session) = self.sessions.read().await.get(&identity) {
            if !session.expires_within(now, SESSION_REFRESH_MARGIN) {
                return Ok(session.clone());
            }
        }

        let session = match &self.auth {
            GithubAuth::Token { token } => Session::new(identity, token.clone(), None),
            GithubAuth::App {
                app_id,
                private_key,
            } => {
                let jwt = sign_app_jwt(app_id, private_key, now)?;
                let path = format!("/app/installations/{identity}/access_tokens");
                let minted: TokenResponse = self
                    .send_json(self.request(Method::POST, &path, &jwt))
                    .await?;
                debug!(expires_at = ?minted.expires_at, "Installation token minted");
                let expiry = minted.expiry();
                Session::new(identity, minted.token.into(), expiry)
            }
        };

        self.sessions.write().await.insert(identity, session.clone());
        Ok(session)
    }

    /// Drops the cached session for `identity`.
    pub async fn evict(&self, identity: InstallationId) {
        if self.sessions.write().await.remove(&identity).is_some() {
            debug!(installation = %identity, "Cached session evicted");
        }
    }

    /// Converts an error from a call made as `identity`, evicting its session
    /// when GitHub rejected the credential.
    pub(crate) async fn provider_error(
        &self,
        identity: InstallationId,
        err: GithubError,
    ) -> dispatch::ProviderError {
        if err.is_unauthorized() {
            self.evict(identity).await;
        }
        err.into_provider_error(identity)
    }

    /// Returns a bearer token identifying the App itself.
    pub(crate) fn app_token(&self) -> Result<String, GithubError> {
        match &self.auth {
            GithubAuth::App {
                app_id,
                private_key,
            } => sign_app_jwt(app_id, private_key, Timestamp::now()),
            GithubAuth::Token { .. } => Err(GithubError::Configuration {
                message: "App webhook deliveries require GitHub App credentials".to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    /// Joins `path` (absolute, or a full URL from a `Link` header) onto the
    /// API base.
    pub(crate) fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
        }
    }

    pub(crate) fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header(ACCEPT, MEDIA_TYPE)
            .header(USER_AGENT, &self.config.user_agent)
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(bearer)
    }

    /// Sends a request, turning non-success statuses into errors.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response, GithubError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = retry_after(response.headers(), Timestamp::now());
        let body = response.text().await.unwrap_or_default();
        Err(GithubError::Status {
            status: status.as_u16(),
            message: truncate(&body, MAX_ERROR_BODY),
            retry_after,
        })
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, GithubError> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(|e| GithubError::Decode {
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Header helpers
// ---------------------------------------------------------------------------

/// Reads the delay GitHub asks for, from `Retry-After` or, when the primary
/// rate limit is exhausted, from `x-ratelimit-reset`.
pub(crate) fn retry_after(headers: &HeaderMap, now: Timestamp) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(secs) = header(RETRY_AFTER.as_str()).and_then(|v| v.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    if header("x-ratelimit-remaining").map(str::trim) == Some("0") {
        let reset = header("x-ratelimit-reset")?.trim().parse::<i64>().ok()?;
        let wait = reset.saturating_sub(now.unix_seconds()).max(0);
        return Some(Duration::from_secs(wait.unsigned_abs()));
    }
    None
}

/// Returns the `rel="next"` target of a `Link` header.
pub(crate) fn next_link(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LINK)?.to_str().ok()?;
    value.split(',').find_map(|part| {
        let mut pieces = part.split(';').map(str::trim);
        let target = pieces.next()?;
        let is_next = pieces.any(|p| p == r#"rel="next""#);
        is_next.then(|| {
            target
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
