//! Session credential verification.
//!
//! Session credentials are issued by the surrounding platform. The server
//! only verifies them through [`SessionVerifier`]; [`HmacSessionVerifier`]
//! is the shared-secret implementation used in deployment and tests.
//!
//! Token format: `base64url(user_id|expires_unix_secs|hex(hmac_sha256))`.

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a credential was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing session credential")]
    Missing,
    #[error("malformed session credential")]
    Malformed,
    #[error("session credential signature mismatch")]
    BadSignature,
    #[error("session credential expired")]
    Expired,
}

/// Resolves a session credential to the user it was issued for.
pub trait SessionVerifier: Send + Sync {
    /// Returns the authenticated user id, or why the credential is refused.
    fn verify(&self, credential: &str) -> Result<String, AuthError>;
}

/// HMAC-SHA256 verifier over a 32-byte shared secret.
#[derive(Clone)]
pub struct HmacSessionVerifier {
    secret: [u8; 32],
}

impl std::fmt::Debug for HmacSessionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSessionVerifier").finish_non_exhaustive()
    }
}

impl HmacSessionVerifier {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Parses a hex-encoded 32-byte secret.
    pub fn from_hex(secret_hex: &str) -> Option<Self> {
        let bytes = hex::decode(secret_hex.trim()).ok()?;
        let secret: [u8; 32] = bytes.try_into().ok()?;
        Some(Self::new(secret))
    }

    /// A verifier over a freshly generated secret. Credentials issued by
    /// anyone else will not verify against it.
    pub fn random() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(secret)
    }

    /// Issues a credential for `user_id` valid for `ttl_secs` from now.
    pub fn issue(&self, user_id: &str, ttl_secs: u64) -> String {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        self.issue_until(user_id, chrono::Utc::now().timestamp().saturating_add(ttl))
    }

    /// Issues a credential for `user_id` expiring at `expires_unix`.
    pub fn issue_until(&self, user_id: &str, expires_unix: i64) -> String {
        let payload = format!("{}|{}", user_id, expires_unix);
        let signature = self.sign(&payload).finalize().into_bytes();
        let token = format!("{}|{}", payload, hex::encode(signature));
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token.as_bytes())
    }

    /// Verifies `token` as of `now_unix`.
    pub fn verify_at(&self, token: &str, now_unix: i64) -> Result<String, AuthError> {
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token.trim().as_bytes())
            .map_err(|_| AuthError::Malformed)?;
        let token_str = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;

        // Split from the right: user ids may themselves contain '|'.
        let mut parts = token_str.rsplitn(3, '|');
        let (Some(sig_hex), Some(expires_str), Some(user_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };
        if user_id.is_empty() {
            return Err(AuthError::Malformed);
        }

        let provided = hex::decode(sig_hex).map_err(|_| AuthError::Malformed)?;
        self.sign(&format!("{}|{}", user_id, expires_str))
            .verify_slice(&provided)
            .map_err(|_| AuthError::BadSignature)?;

        let expires: i64 = expires_str.parse().map_err(|_| AuthError::Malformed)?;
        if now_unix > expires {
            return Err(AuthError::Expired);
        }

        Ok(user_id.to_string())
    }

    fn sign(&self, payload: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        mac
    }
}

impl SessionVerifier for HmacSessionVerifier {
    fn verify(&self, credential: &str) -> Result<String, AuthError> {
        self.verify_at(credential, chrono::Utc::now().timestamp())
    }
}
