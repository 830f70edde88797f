use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::{ApiCallError, AuthApi, ClientIdentity, IdentityCache};

/// Per-attempt request material. Rebuilt before every send so a replay after
/// refresh carries the fresh CSRF token, never a stale one.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub csrf_token: Option<String>,
}

/// Outcome of a shared refresh, fanned out to every waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    LoggedOut,
}

/// Detects expired access tokens (401), de-duplicates concurrent refresh
/// attempts, and replays the original request once.
///
/// The single-flight slot is scoped to this coordinator (one per logical
/// session), not process-global. Without the dedup, concurrent 401s would
/// race on refresh-token rotation and each invalidate the other's chain.
pub struct RefreshCoordinator {
    api: Arc<dyn AuthApi>,
    identity: IdentityCache,
    inflight: Arc<Mutex<Option<broadcast::Sender<RefreshOutcome>>>>,
}

impl Clone for RefreshCoordinator {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            identity: self.identity.clone(),
            inflight: self.inflight.clone(),
        }
    }
}

impl RefreshCoordinator {
    pub fn new(api: Arc<dyn AuthApi>, identity: IdentityCache) -> Self {
        Self {
            api,
            identity,
            inflight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn identity(&self) -> &IdentityCache {
        &self.identity
    }

    /// Run `call`, transparently refreshing on a 401 and replaying once.
    ///
    /// A second 401 after the replay is terminal and surfaces unchanged.
    /// When the refresh itself fails the cached identity is cleared and the
    /// caller gets `LoggedOut` (redirect to login).
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, ApiCallError>
    where
        F: Fn(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, ApiCallError>>,
    {
        self.execute_with_options(call, true).await
    }

    /// `execute` with refresh-on-401 made explicit; pass false for the
    /// endpoints where a 401 already is the answer (e.g. the refresh call
    /// itself).
    pub async fn execute_with_options<T, F, Fut>(
        &self,
        call: F,
        refresh_on_unauthorized: bool,
    ) -> Result<T, ApiCallError>
    where
        F: Fn(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, ApiCallError>>,
    {
        match call(self.request_context().await).await {
            Err(ApiCallError::Unauthorized) if refresh_on_unauthorized => {}
            other => return other,
        }

        match self.refresh_shared().await {
            RefreshOutcome::Refreshed => call(self.request_context().await).await,
            RefreshOutcome::LoggedOut => Err(ApiCallError::LoggedOut),
        }
    }

    /// Join the in-flight refresh, or start one if none is running.
    ///
    /// The actual refresh runs on a spawned task, so a caller that loses
    /// interest merely drops its receiver; the refresh completes and the
    /// other waiters still get the outcome.
    pub async fn refresh_shared(&self) -> RefreshOutcome {
        let mut rx = {
            let mut slot = self.inflight.lock().await;
            match slot.as_ref() {
                Some(tx) => {
                    debug!("joining in-flight refresh");
                    tx.subscribe()
                }
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    *slot = Some(tx.clone());
                    let this = self.clone();
                    tokio::spawn(async move {
                        let outcome = this.do_refresh().await;
                        // Clear the slot before notifying so a caller that
                        // arrives after the outcome starts a fresh refresh.
                        *this.inflight.lock().await = None;
                        let _ = tx.send(outcome);
                    });
                    rx
                }
            }
        };

        rx.recv().await.unwrap_or(RefreshOutcome::LoggedOut)
    }

    async fn do_refresh(&self) -> RefreshOutcome {
        match self.api.refresh().await {
            Ok(session) => {
                self.identity
                    .set(ClientIdentity {
                        profile: session.profile,
                        csrf_token: session.csrf_token,
                    })
                    .await;
                RefreshOutcome::Refreshed
            }
            Err(err) => {
                debug!("refresh failed: {err}");
                self.identity.clear().await;
                RefreshOutcome::LoggedOut
            }
        }
    }

    async fn request_context(&self) -> RequestContext {
        RequestContext {
            csrf_token: self.identity.get().await.map(|i| i.csrf_token),
        }
    }
}
