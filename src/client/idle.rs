use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};

use super::channel::SessionChannel;
use super::{AuthApi, IdentityCache};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// This handle's own idle timer expired.
    Idle,
    /// A sibling handle logged out; this one mirrored it.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// Within `warning` of the timeout; prompt the user.
    Warning,
    Expired(LogoutReason),
}

#[derive(Debug, Clone, Copy)]
pub struct IdleMonitorConfig {
    /// Total inactivity allowed before forced logout.
    pub timeout: Duration,
    /// How long before `timeout` the warning fires. Must be strictly less
    /// than `timeout`; otherwise the warning is skipped entirely rather
    /// than fired after expiry.
    pub warning: Duration,
}

impl Default for IdleMonitorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            warning: Duration::from_secs(5 * 60),
        }
    }
}

/// Watches the shared activity channel and walks Active → Warning → Expired.
///
/// On expiry it performs the full logout: revoke the refresh token server
/// side, clear the cached identity, and set the logout sentinel so sibling
/// handles mirror immediately. A handle that observes the sentinel mirrors
/// locally without a second server call.
pub struct IdleMonitor {
    events: broadcast::Sender<IdleEvent>,
    handle: JoinHandle<()>,
}

impl IdleMonitor {
    pub fn spawn(
        config: IdleMonitorConfig,
        channel: &SessionChannel,
        api: Arc<dyn AuthApi>,
        identity: IdentityCache,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        let events_tx = events.clone();
        let mut rx = channel.subscribe();
        let channel = channel.clone();

        let warning_gap = if config.warning < config.timeout {
            Some(config.timeout - config.warning)
        } else {
            warn!(
                "idle warning ({:?}) >= timeout ({:?}); warning disabled",
                config.warning, config.timeout
            );
            None
        };

        let handle = tokio::spawn(async move {
            // Last-activity value the warning already fired for, if any.
            let mut warned_for: Option<Instant> = None;

            loop {
                let state = *rx.borrow_and_update();

                if state.logged_out {
                    debug!("logout sentinel observed; mirroring logout");
                    identity.clear().await;
                    let _ = events_tx.send(IdleEvent::Expired(LogoutReason::Remote));
                    return;
                }

                let deadline = state.last_activity + config.timeout;
                // Covers both idling out and mounting with stale persisted
                // activity (suspended tab): expired is expired.
                if Instant::now() >= deadline {
                    api.logout().await;
                    identity.clear().await;
                    channel.broadcast_logout();
                    let _ = events_tx.send(IdleEvent::Expired(LogoutReason::Idle));
                    return;
                }

                let warn_at = warning_gap
                    .map(|gap| state.last_activity + gap)
                    .filter(|_| warned_for != Some(state.last_activity));
                let next = match warn_at {
                    Some(at) if at < deadline => at,
                    _ => deadline,
                };

                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            // Channel torn down; stop the timers.
                            return;
                        }
                    }
                    _ = sleep_until(next) => {
                        if Some(next) == warn_at {
                            warned_for = Some(state.last_activity);
                            let _ = events_tx.send(IdleEvent::Warning);
                        }
                        // Deadline case is handled at the top of the loop.
                    }
                }
            }
        });

        Self { events, handle }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdleEvent> {
        self.events.subscribe()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for IdleMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
