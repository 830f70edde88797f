//! End-to-end client/server flows: the refresh coordinator and idle monitor
//! driving the real router through an in-process `AuthApi` implementation.

use arena_auth::api::{create_router, AppState, SharedState};
use arena_auth::client::channel::SessionChannel;
use arena_auth::client::idle::{IdleEvent, IdleMonitor, IdleMonitorConfig, LogoutReason};
use arena_auth::client::refresh::RefreshCoordinator;
use arena_auth::client::{ApiCallError, AuthApi, IdentityCache, RefreshedSession};
use arena_auth::config::{PiiKeySource, ServerConfig};
use arena_auth::users::{UserProfile, UserRecord};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tower::ServiceExt; // for Router::oneshot

fn test_config() -> ServerConfig {
    ServerConfig {
        token_secret: "client-flow-signing-secret".into(),
        csrf_secret: b"client-flow-csrf-secret".to_vec(),
        pii_key: PiiKeySource::Disabled,
        access_ttl_secs: 900,
        refresh_ttl_days: 7,
        refresh_ttl_remember_days: 30,
        cookie_secure: false,
    }
}

async fn seeded_state() -> SharedState {
    let state = Arc::new(AppState::new(test_config()));
    state
        .users
        .upsert(UserRecord {
            id: "user-1".into(),
            email: "pro@example.com".into(),
            username: "pro_gamer".into(),
            is_host: false,
            role: "player".into(),
            email_verified: true,
            discord_id: None,
            phone: None,
            game_handles: HashMap::new(),
        })
        .await
        .unwrap();
    state
}

#[derive(Debug, Default, Clone)]
struct SessionCookies {
    auth: Option<String>,
    refresh: Option<String>,
    csrf: Option<String>,
}

/// `AuthApi` over the in-process router: what the browser-side HTTP client
/// does in production, minus the network.
struct RouterApi {
    app: Router,
    cookies: Mutex<SessionCookies>,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl RouterApi {
    fn new(app: Router) -> Arc<Self> {
        Arc::new(Self {
            app,
            cookies: Mutex::new(SessionCookies::default()),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        })
    }

    async fn login(&self, user_id: &str) {
        let response = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/login")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"user_id": user_id}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        self.absorb_cookies(response.headers()).await;
    }

    /// Stand-in for the access token reaching its 15-minute expiry: the
    /// server treats expired and invalid identically, so a corrupted token
    /// exercises the same path without wall-clock waits.
    async fn expire_access_token(&self) {
        self.cookies.lock().await.auth = Some("expired.access.token".into());
    }

    async fn absorb_cookies(&self, headers: &axum::http::HeaderMap) {
        let mut cookies = self.cookies.lock().await;
        for line in headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
        {
            let Some(pair) = line.split(';').next() else { continue };
            let Some((name, value)) = pair.split_once('=') else { continue };
            let slot = match name {
                "auth_token" => &mut cookies.auth,
                "refresh_token" => &mut cookies.refresh,
                "csrf_token" => &mut cookies.csrf,
                _ => continue,
            };
            *slot = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        }
    }

    async fn get_me(&self) -> Result<String, ApiCallError> {
        let auth = self.cookies.lock().await.auth.clone();
        let mut builder = Request::builder().uri("/auth/me");
        if let Some(auth) = auth {
            builder = builder.header(header::COOKIE, format!("auth_token={auth}"));
        }
        let response = self
            .app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .map_err(|e| ApiCallError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body = response.into_body().collect().await.unwrap().to_bytes();
                let profile: UserProfile = serde_json::from_slice(&body).unwrap();
                Ok(profile.username)
            }
            StatusCode::UNAUTHORIZED => Err(ApiCallError::Unauthorized),
            other => Err(ApiCallError::Transport(format!("unexpected {other}"))),
        }
    }
}

#[async_trait]
impl AuthApi for RouterApi {
    async fn refresh(&self) -> Result<RefreshedSession, ApiCallError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let refresh = self.cookies.lock().await.refresh.clone();
        let Some(refresh) = refresh else {
            return Err(ApiCallError::Unauthorized);
        };

        let response = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/refresh")
                    .header(header::COOKIE, format!("refresh_token={refresh}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .map_err(|e| ApiCallError::Transport(e.to_string()))?;

        if response.status() != StatusCode::OK {
            self.absorb_cookies(response.headers()).await;
            return Err(ApiCallError::Unauthorized);
        }

        self.absorb_cookies(response.headers()).await;
        let csrf = self.cookies.lock().await.csrf.clone().unwrap_or_default();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let profile: UserProfile = serde_json::from_slice(&body).unwrap();
        Ok(RefreshedSession {
            profile,
            csrf_token: csrf,
        })
    }

    async fn logout(&self) {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        let refresh = self.cookies.lock().await.refresh.clone().unwrap_or_default();
        let _ = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/logout")
                    .header(header::COOKIE, format!("refresh_token={refresh}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        self.cookies.lock().await.auth = None;
    }
}

// User authenticates, idles past the access token's lifetime (but under the
// idle timeout), then calls an API: one transparent refresh, no visible
// error.
#[tokio::test]
async fn expired_access_token_refreshes_transparently() {
    let state = seeded_state().await;
    let api = RouterApi::new(create_router(state));
    api.login("user-1").await;
    api.expire_access_token().await;

    let coordinator = RefreshCoordinator::new(api.clone(), IdentityCache::new());
    let username = coordinator
        .execute(|_ctx| api.get_me())
        .await
        .expect("call succeeds after transparent refresh");

    assert_eq!(username, "pro_gamer");
    assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
    // The coordinator cached the rotated CSRF token for future mutations.
    let identity = coordinator.identity().get().await.unwrap();
    assert!(!identity.csrf_token.is_empty());
}

// A 401 storm against the real rotation logic: without single-flight the
// concurrent refreshes would rotate against each other and kill the chain.
#[tokio::test]
async fn concurrent_401_storm_causes_one_rotation() {
    let state = seeded_state().await;
    let api = RouterApi::new(create_router(state));
    api.login("user-1").await;
    api.expire_access_token().await;

    let coordinator = RefreshCoordinator::new(api.clone(), IdentityCache::new());
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let coordinator = coordinator.clone();
        let api = api.clone();
        tasks.push(tokio::spawn(async move {
            coordinator.execute(|_ctx| api.get_me()).await
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "pro_gamer");
    }
    assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
}

// Two tabs share the session. Tab A idles out and revokes the refresh token
// server-side; tab B mirrors the logout and its next call fails once,
// without retry-looping.
#[tokio::test(start_paused = true)]
async fn sibling_tab_mirrors_logout_and_fails_without_looping() {
    let state = seeded_state().await;
    let api = RouterApi::new(create_router(state));
    api.login("user-1").await;

    let channel = SessionChannel::new();
    let tab_a = IdleMonitor::spawn(
        IdleMonitorConfig {
            timeout: Duration::from_secs(30),
            warning: Duration::from_secs(5),
        },
        &channel,
        api.clone(),
        IdentityCache::new(),
    );
    let tab_b_identity = IdentityCache::new();
    let tab_b = IdleMonitor::spawn(
        IdleMonitorConfig {
            timeout: Duration::from_secs(600),
            warning: Duration::from_secs(60),
        },
        &channel,
        api.clone(),
        tab_b_identity.clone(),
    );
    let mut events_a = tab_a.subscribe();
    let mut events_b = tab_b.subscribe();

    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(events_a.try_recv().unwrap(), IdleEvent::Warning);
    assert_eq!(
        events_a.try_recv().unwrap(),
        IdleEvent::Expired(LogoutReason::Idle)
    );
    assert_eq!(
        events_b.try_recv().unwrap(),
        IdleEvent::Expired(LogoutReason::Remote)
    );
    // Only tab A talked to the server.
    assert_eq!(api.logout_calls.load(Ordering::SeqCst), 1);

    // Tab B tries one more call. Access cookie is gone, the refresh token
    // is revoked: exactly one refresh attempt, then a terminal logged-out.
    let coordinator = RefreshCoordinator::new(api.clone(), tab_b_identity);
    let result = coordinator.execute(|_ctx| api.get_me()).await;
    assert_eq!(result.unwrap_err(), ApiCallError::LoggedOut);
    assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
}
