use base64::{engine::general_purpose, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

// token = base64(user_id + ":" + issued_at_ms + ":" + hex(HMAC-SHA256(secret, user_id:issued_at_ms)))

type HmacSha256 = Hmac<Sha256>;

/// CSRF tokens are valid for 24 hours from issuance.
pub const CSRF_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Stateless CSRF token pair: HMAC binds a user id to an issuance time.
///
/// Verification is independent of access-token verification; both must pass
/// on mutating routes.
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    secret: Vec<u8>,
}

impl CsrfGuard {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue a token bound to `user_id` and the current wall clock.
    pub fn generate(&self, user_id: &str) -> String {
        self.generate_at(user_id, Utc::now().timestamp_millis())
    }

    pub(crate) fn generate_at(&self, user_id: &str, issued_at_ms: i64) -> String {
        let data = format!("{user_id}:{issued_at_ms}");
        let sig = hex::encode(self.sign(data.as_bytes()));
        general_purpose::STANDARD.encode(format!("{data}:{sig}"))
    }

    /// Verify a token against the expected user id.
    ///
    /// False on decode failure, user-id mismatch, age over 24h, or signature
    /// mismatch; each condition alone is sufficient to reject. The signature
    /// comparison is constant-time.
    pub fn verify(&self, token: &str, expected_user_id: &str) -> bool {
        self.verify_at(token, expected_user_id, Utc::now().timestamp_millis())
    }

    pub(crate) fn verify_at(&self, token: &str, expected_user_id: &str, now_ms: i64) -> bool {
        let decoded = match general_purpose::STANDARD.decode(token) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let decoded = match String::from_utf8(decoded) {
            Ok(s) => s,
            Err(_) => return false,
        };

        // Peel from the right so an exotic user id containing ':' still parses.
        let Some((data, sig_hex)) = decoded.rsplit_once(':') else {
            return false;
        };
        let Some((user_id, issued_ms)) = data.rsplit_once(':') else {
            return false;
        };

        if user_id != expected_user_id {
            debug!("csrf token user mismatch");
            return false;
        }

        let Ok(issued_ms) = issued_ms.parse::<i64>() else {
            return false;
        };
        // Clamp negative ages (minor clock skew) to zero rather than rejecting.
        let age_ms = (now_ms - issued_ms).max(0);
        if age_ms > CSRF_MAX_AGE_MS {
            debug!("csrf token expired");
            return false;
        }

        let Ok(provided) = hex::decode(sig_hex) else {
            return false;
        };
        let expected = self.sign(data.as_bytes());
        provided.ct_eq(expected.as_slice()).unwrap_u8() == 1
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}
