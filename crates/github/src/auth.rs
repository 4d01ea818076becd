//! GitHub credentials: App JWTs and installation access tokens.
//!
//! A GitHub App authenticates in two hops. A short-lived RS256 JWT signed with
//! the App's private key identifies the App itself; exchanging it at
//! `/app/installations/{id}/access_tokens` yields a token that acts as one
//! installation. A personal access token skips both hops.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use dispatch::Timestamp;

use crate::errors::GithubError;

/// Seconds the JWT issue time is back-dated to tolerate clock drift.
const JWT_BACKDATE_SECS: i64 = 60;

/// JWT lifetime. GitHub rejects anything above ten minutes.
const JWT_LIFETIME_SECS: i64 = 600;

/// How the adapter proves its identity to GitHub.
#[derive(Clone)]
pub enum GithubAuth {
    /// GitHub App credentials; sessions are minted per installation.
    App {
        /// Numeric App id, used as the JWT issuer.
        app_id: String,
        /// PEM-encoded RSA private key.
        private_key: SecretString,
    },
    /// A fixed token used for every installation.
    Token {
        /// The token.
        token: SecretString,
    },
}

impl std::fmt::Debug for GithubAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GithubAuth::App { app_id, .. } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .field("private_key", &"[REDACTED]")
                .finish(),
            GithubAuth::Token { .. } => f
                .debug_struct("Token")
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Registered claims of a GitHub App JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl AppClaims {
    pub(crate) fn new(app_id: &str, now: Timestamp) -> Self {
        let now = now.unix_seconds();
        Self {
            iat: now - JWT_BACKDATE_SECS,
            exp: now + JWT_LIFETIME_SECS,
            iss: app_id.to_string(),
        }
    }
}

/// Signs an App JWT valid from `now`.
pub(crate) fn sign_app_jwt(
    app_id: &str,
    private_key: &SecretString,
    now: Timestamp,
) -> Result<String, GithubError> {
    let key = EncodingKey::from_rsa_pem(private_key.expose_secret().as_bytes()).map_err(|e| {
        GithubError::Jwt {
            message: format!("invalid private key: {e}"),
        }
    })?;
    jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &AppClaims::new(app_id, now),
        &key,
    )
    .map_err(|e| GithubError::Jwt {
        message: e.to_string(),
    })
}

/// Body of a token-minting response (installation or registration token).
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenResponse {
    pub(crate) fn expiry(&self) -> Option<Timestamp> {
        self.expires_at.map(Timestamp::from_utc)
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
