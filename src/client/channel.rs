use tokio::sync::watch;
use tokio::time::Instant;

/// Last-activity timestamp plus the logout sentinel, observable by every
/// session handle. All handles derive the same logical deadline from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityState {
    pub last_activity: Instant,
    pub logged_out: bool,
}

/// Process-local stand-in for the browser's cross-tab storage channel:
/// activity writes and the logout sentinel propagate to every subscriber.
/// Consistency is eventual; a briefly stale handle is harmless because the
/// server has already revoked the refresh token by the time the sentinel is
/// set.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    tx: watch::Sender<ActivityState>,
}

impl SessionChannel {
    pub fn new() -> Self {
        Self::with_last_activity(Instant::now())
    }

    /// Open a channel whose persisted last-activity predates this process,
    /// e.g. a tab resumed from the background.
    pub fn with_last_activity(last_activity: Instant) -> Self {
        let (tx, _rx) = watch::channel(ActivityState {
            last_activity,
            logged_out: false,
        });
        Self { tx }
    }

    /// Record a tracked interaction. No-op once logged out.
    pub fn touch(&self) {
        self.tx.send_modify(|state| {
            if !state.logged_out {
                state.last_activity = Instant::now();
            }
        });
    }

    /// Set the logout sentinel. Every subscribed handle mirrors logout.
    pub fn broadcast_logout(&self) {
        self.tx.send_modify(|state| state.logged_out = true);
    }

    pub fn subscribe(&self) -> watch::Receiver<ActivityState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ActivityState {
        *self.tx.borrow()
    }
}

impl Default for SessionChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn test_touch_moves_last_activity() {
        let channel = SessionChannel::new();
        let before = channel.snapshot().last_activity;
        advance(Duration::from_secs(5)).await;
        channel.touch();
        assert!(channel.snapshot().last_activity > before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_sentinel_freezes_activity() {
        let channel = SessionChannel::new();
        channel.broadcast_logout();
        let frozen = channel.snapshot().last_activity;
        advance(Duration::from_secs(5)).await;
        channel.touch();
        assert!(channel.snapshot().logged_out);
        assert_eq!(channel.snapshot().last_activity, frozen);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let a = SessionChannel::new();
        let b = a.clone();
        b.broadcast_logout();
        assert!(a.snapshot().logged_out);
    }
}
