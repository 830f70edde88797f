use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::RotationError;
use crate::security::audit_log::AuditLogger;

/// A freshly issued refresh secret. The raw value goes to the client cookie;
/// only the hash is ever persisted.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub raw: String,
    pub hash: String,
}

/// Generate a 256-bit random refresh secret.
pub fn issue_refresh_secret() -> IssuedRefreshToken {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_refresh_secret(&raw);
    IssuedRefreshToken { raw, hash }
}

pub fn hash_refresh_secret(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Persisted refresh-token metadata, keyed by secret hash in the store.
#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub token_id: Uuid,
    pub user_id: String,
    /// One chain per login session; rotation stays within the chain.
    pub session_id: Uuid,
    /// Lifetime chosen at login (remember-me or not). Successor records
    /// inherit it so rotation never shortens the session.
    pub ttl: Duration,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

/// Result of a successful rotation.
#[derive(Debug, Clone)]
pub struct RotatedSession {
    pub token: IssuedRefreshToken,
    pub user_id: String,
    pub session_id: Uuid,
    /// The chain's lifetime, for the successor cookie's max-age.
    pub ttl: Duration,
}

/// Refresh-token bookkeeping: issuance, single-use rotation, revocation,
/// and retention-window garbage collection.
///
/// Rotation happens under one write lock, so revoking the old record and
/// activating the new one is atomic; there is no interleaving where both or
/// neither are valid.
#[derive(Debug, Clone)]
pub struct RefreshStore {
    inner: Arc<RwLock<HashMap<String, RefreshRecord>>>,
    /// Revoked/expired records are kept this long past expiry so replayed
    /// hashes still trip compromise detection.
    retention: Duration,
    audit: AuditLogger,
}

impl RefreshStore {
    pub fn new(retention: Duration, audit: AuditLogger) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            retention,
            audit,
        }
    }

    /// Start a new session chain for `user_id` and issue its first token.
    pub async fn begin_session(&self, user_id: &str, ttl: Duration) -> IssuedRefreshToken {
        let token = issue_refresh_secret();
        let now = Utc::now();
        let record = RefreshRecord {
            token_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            session_id: Uuid::new_v4(),
            ttl,
            issued_at: now,
            expires_at: now + ttl,
            revoked: false,
        };
        self.inner.write().await.insert(token.hash.clone(), record);
        token
    }

    /// Atomically revoke the token behind `old_hash` and issue its successor
    /// in the same chain, with the same lifetime the chain started with.
    ///
    /// A hash that is unknown or already revoked means the secret was
    /// replayed (the legitimate client has already rotated past it); the
    /// whole session chain is invalidated before the error is returned.
    pub async fn rotate(&self, old_hash: &str) -> Result<RotatedSession, RotationError> {
        let mut map = self.inner.write().await;
        let now = Utc::now();

        let old = match map.get(old_hash) {
            Some(rec) => rec.clone(),
            None => {
                self.audit.refresh_replay(None);
                return Err(RotationError::Unknown);
            }
        };

        if old.revoked {
            let revoked = invalidate_chain(&mut map, old.session_id);
            self.audit.refresh_replay(Some(&old.user_id));
            self.audit.session_chain_invalidated(&old.user_id, revoked);
            return Err(RotationError::ChainCompromised);
        }

        if old.expires_at <= now {
            return Err(RotationError::Expired);
        }

        let token = issue_refresh_secret();
        let record = RefreshRecord {
            token_id: Uuid::new_v4(),
            user_id: old.user_id.clone(),
            session_id: old.session_id,
            ttl: old.ttl,
            issued_at: now,
            expires_at: now + old.ttl,
            revoked: false,
        };
        if let Some(rec) = map.get_mut(old_hash) {
            rec.revoked = true;
        }
        map.insert(token.hash.clone(), record);

        Ok(RotatedSession {
            token,
            user_id: old.user_id,
            session_id: old.session_id,
            ttl: old.ttl,
        })
    }

    /// Revoke the token behind `hash`. Idempotent: revoking an unknown or
    /// already-revoked token is a no-op. Returns the owning user id when the
    /// record exists.
    pub async fn revoke(&self, hash: &str) -> Option<String> {
        let mut map = self.inner.write().await;
        let rec = map.get_mut(hash)?;
        rec.revoked = true;
        Some(rec.user_id.clone())
    }

    /// Revoke every token in the chain that `hash` belongs to.
    pub async fn revoke_session(&self, hash: &str) -> usize {
        let mut map = self.inner.write().await;
        let Some(session_id) = map.get(hash).map(|r| r.session_id) else {
            return 0;
        };
        invalidate_chain(&mut map, session_id)
    }

    /// Drop records whose retention window has lapsed.
    pub async fn purge_expired(&self) {
        let cutoff = Utc::now() - self.retention;
        let mut map = self.inner.write().await;
        map.retain(|_, rec| rec.expires_at > cutoff);
    }

    pub async fn is_active(&self, hash: &str) -> bool {
        let map = self.inner.read().await;
        map.get(hash)
            .map(|rec| !rec.revoked && rec.expires_at > Utc::now())
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Background sweep dropping refresh records past their retention window.
pub fn spawn_gc(store: RefreshStore, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            store.purge_expired().await;
            tracing::debug!("refresh store swept");
        }
    })
}

fn invalidate_chain(map: &mut HashMap<String, RefreshRecord>, session_id: Uuid) -> usize {
    let mut revoked = 0;
    for rec in map.values_mut() {
        if rec.session_id == session_id && !rec.revoked {
            rec.revoked = true;
            revoked += 1;
        }
    }
    revoked
}
