use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::users::UserProfile;

/// Claims carried by a stateless access token. Verified purely by signature
/// and expiry; never persisted server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Opaque user id.
    pub sub: String,
    pub email: String,
    pub username: String,
    pub is_host: bool,
    pub role: String,
    pub email_verified: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256-signed access tokens.
#[derive(Clone)]
pub struct AccessTokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl AccessTokenSigner {
    /// The signing secret is validated at config load; by the time a signer
    /// exists it is guaranteed non-empty.
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn issue(&self, profile: &UserProfile) -> Result<String> {
        let now = Utc::now().timestamp();
        self.issue_at(profile, now, now + self.ttl_secs)
    }

    pub(crate) fn issue_at(&self, profile: &UserProfile, iat: i64, exp: i64) -> Result<String> {
        let claims = AccessClaims {
            sub: profile.id.clone(),
            email: profile.email.clone(),
            username: profile.username.clone(),
            is_host: profile.is_host,
            role: profile.role.clone(),
            email_verified: profile.email_verified,
            iat,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("signing access token")
    }

    /// Verify a token and return its claims.
    ///
    /// None on malformed input, signature mismatch, or expiry. The caller
    /// must fail closed; which sub-case occurred is never surfaced to the
    /// client, only logged here.
    pub fn verify(&self, token: &str) -> Option<AccessClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        match decode::<AccessClaims>(token, &self.decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(err) => {
                debug!("access token rejected: {err}");
                None
            }
        }
    }
}
