//! Client-side session machinery: one `SessionHandle` per open UI surface
//! (the browser-tab analogue), sharing an identity cache, an activity
//! channel, a single-flight refresh coordinator, and an idle monitor.

pub mod channel;
pub mod idle;
pub mod refresh;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::users::UserProfile;

/// Errors surfaced by client-side API calls.
///
/// Clone is required so a single refresh outcome can fan out to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiCallError {
    /// Generic 401; the server never says which sub-case occurred.
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Refresh itself failed: the session is over, redirect to login.
    #[error("logged out")]
    LoggedOut,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Fresh session material returned by a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedSession {
    pub profile: UserProfile,
    pub csrf_token: String,
}

/// The auth endpoints the client machinery depends on. Implemented over
/// HTTP in production; tests substitute an in-process double.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange the refresh cookie for a new token set.
    async fn refresh(&self) -> Result<RefreshedSession, ApiCallError>;
    /// Revoke the current refresh token. Idempotent; errors are swallowed
    /// by callers since local logout proceeds regardless.
    async fn logout(&self);
}

/// Cached identity for one browser session: the public profile plus the
/// script-readable CSRF token attached to mutating requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub profile: UserProfile,
    pub csrf_token: String,
}

/// Shared identity slot. Scoped to one logical session, not process-global,
/// so multiple sessions in one process cannot leak into each other.
#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    inner: Arc<RwLock<Option<ClientIdentity>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, identity: ClientIdentity) {
        *self.inner.write().await = Some(identity);
    }

    pub async fn get(&self) -> Option<ClientIdentity> {
        self.inner.read().await.clone()
    }

    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }
}
