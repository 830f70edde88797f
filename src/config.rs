use anyhow::{Context, Result};
use rand::RngCore;
use tracing::warn;

/// Key material for the PII field cipher, resolved from environment.
#[derive(Debug, Clone)]
pub enum PiiKeySource {
    /// 32-byte key supplied directly (hex).
    Key([u8; 32]),
    /// Arbitrary-length passphrase, stretched with PBKDF2 at startup.
    Passphrase(String),
    /// No key configured: PII is stored in cleartext (degraded mode).
    Disabled,
}

/// Server-side security configuration.
///
/// Environment variables:
/// - `AUTH_TOKEN_SECRET`: access-token signing secret (required)
/// - `CSRF_SECRET`: CSRF HMAC secret (random fallback, see `from_env`)
/// - `PII_ENCRYPTION_KEY`: 64-char hex AES-256 key
/// - `PII_ENCRYPTION_PASSPHRASE`: passphrase alternative to the raw key
/// - `ACCESS_TOKEN_TTL_SECS`: access token lifetime (default 900)
/// - `REFRESH_TTL_DAYS` / `REFRESH_TTL_REMEMBER_DAYS`: refresh lifetimes (7 / 30)
/// - `COOKIE_SECURE`: set `false` to drop the Secure flag (local dev only)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub token_secret: String,
    pub csrf_secret: Vec<u8>,
    pub pii_key: PiiKeySource,
    pub access_ttl_secs: i64,
    pub refresh_ttl_days: i64,
    pub refresh_ttl_remember_days: i64,
    pub cookie_secure: bool,
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// A missing `AUTH_TOKEN_SECRET` is fatal: issuing unsigned or
    /// guessably-signed tokens is worse than refusing to start. A missing
    /// `CSRF_SECRET` falls back to a random value, which means CSRF tokens
    /// stop verifying after a restart; acceptable for single-instance dev,
    /// logged so operators notice.
    pub fn from_env() -> Result<Self> {
        let token_secret = std::env::var("AUTH_TOKEN_SECRET")
            .context("AUTH_TOKEN_SECRET is not set; refusing to issue tokens")?;

        let csrf_secret = match std::env::var("CSRF_SECRET") {
            Ok(s) if !s.is_empty() => s.into_bytes(),
            _ => {
                warn!("CSRF_SECRET not set; using a random secret (CSRF tokens invalidate on restart)");
                let mut buf = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut buf);
                buf
            }
        };

        let pii_key = Self::pii_key_from_env()?;
        if matches!(pii_key, PiiKeySource::Disabled) {
            warn!("PII encryption key not configured; PII fields will be stored in cleartext");
        }

        Ok(Self {
            token_secret,
            csrf_secret,
            pii_key,
            access_ttl_secs: env_i64("ACCESS_TOKEN_TTL_SECS", 900),
            refresh_ttl_days: env_i64("REFRESH_TTL_DAYS", 7),
            refresh_ttl_remember_days: env_i64("REFRESH_TTL_REMEMBER_DAYS", 30),
            cookie_secure: std::env::var("COOKIE_SECURE").as_deref() != Ok("false"),
        })
    }

    fn pii_key_from_env() -> Result<PiiKeySource> {
        if let Ok(hex_key) = std::env::var("PII_ENCRYPTION_KEY") {
            let bytes = hex::decode(&hex_key).context("PII_ENCRYPTION_KEY is not valid hex")?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("PII_ENCRYPTION_KEY must decode to 32 bytes"))?;
            return Ok(PiiKeySource::Key(arr));
        }
        if let Ok(pass) = std::env::var("PII_ENCRYPTION_PASSPHRASE") {
            if !pass.is_empty() {
                return Ok(PiiKeySource::Passphrase(pass));
            }
        }
        Ok(PiiKeySource::Disabled)
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Config tests mutate process env; keep them in one test to avoid races.
    #[test]
    fn test_from_env_requires_token_secret() {
        std::env::remove_var("AUTH_TOKEN_SECRET");
        assert!(ServerConfig::from_env().is_err());

        std::env::set_var("AUTH_TOKEN_SECRET", "test-signing-secret");
        std::env::set_var("CSRF_SECRET", "test-csrf-secret");
        std::env::remove_var("PII_ENCRYPTION_KEY");
        std::env::remove_var("PII_ENCRYPTION_PASSPHRASE");

        let cfg = ServerConfig::from_env().unwrap();
        assert_eq!(cfg.access_ttl_secs, 900);
        assert_eq!(cfg.refresh_ttl_days, 7);
        assert_eq!(cfg.refresh_ttl_remember_days, 30);
        assert!(matches!(cfg.pii_key, PiiKeySource::Disabled));

        std::env::set_var("PII_ENCRYPTION_KEY", "not-hex");
        assert!(ServerConfig::from_env().is_err());

        std::env::set_var("PII_ENCRYPTION_KEY", "ab".repeat(32));
        let cfg = ServerConfig::from_env().unwrap();
        assert!(matches!(cfg.pii_key, PiiKeySource::Key(_)));

        std::env::remove_var("PII_ENCRYPTION_KEY");
        std::env::remove_var("AUTH_TOKEN_SECRET");
        std::env::remove_var("CSRF_SECRET");
    }
}
