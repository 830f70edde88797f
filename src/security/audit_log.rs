use tracing::{info, warn};

/// Structured audit trail for session-security events.
///
/// Everything logs under the `audit` target so operators can route these
/// events separately from application logs.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn login(&self, user_id: &str, remember_me: bool) {
        info!(target: "audit", event = "login", user_id, remember_me);
    }

    pub fn token_refreshed(&self, user_id: &str) {
        info!(target: "audit", event = "token_refreshed", user_id);
    }

    /// Rotation attempted on an unknown or revoked refresh hash.
    pub fn refresh_replay(&self, user_id: Option<&str>) {
        warn!(target: "audit", event = "refresh_replay", user_id = user_id.unwrap_or(""));
    }

    pub fn refresh_rejected(&self, reason: &str) {
        warn!(target: "audit", event = "refresh_rejected", reason);
    }

    pub fn csrf_rejected(&self, user_id: &str) {
        warn!(target: "audit", event = "csrf_rejected", user_id);
    }

    pub fn access_token_invalid(&self) {
        // No user id available: the token did not verify.
        warn!(target: "audit", event = "access_token_invalid");
    }

    pub fn logout(&self, user_id: &str) {
        info!(target: "audit", event = "logout", user_id);
    }

    pub fn session_chain_invalidated(&self, user_id: &str, revoked: usize) {
        warn!(target: "audit", event = "session_chain_invalidated", user_id, revoked);
    }
}
