//! Webhook signature verification.
//!
//! The sender signs the exact request body with HMAC-SHA256 under the shared
//! secret and sends `sha256=<hex>` in `X-Hub-Signature-256`. The comparison
//! runs in constant time through [`Mac::verify_slice`].

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Why a request failed verification. All variants are final.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// No signature header.
    #[error("signature header missing")]
    Missing,
    /// The header is not `sha256=<hex>`.
    #[error("signature header malformed")]
    Malformed,
    /// The signature does not match the body.
    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies `claimed` (the raw header value) against `body`.
pub fn verify(secret: &[u8], body: &[u8], claimed: Option<&str>) -> Result<(), SignatureError> {
    let claimed = claimed.ok_or(SignatureError::Missing)?;
    let digest = claimed
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(digest).map_err(|_| SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Computes the `sha256=<hex>` header value for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    )
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
