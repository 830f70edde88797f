//! HTTP surface of the session core: login/refresh/logout/me plus a
//! CSRF-guarded profile route, with cookie lifecycle handled here and the
//! actual security decisions delegated to the token service and guards.

mod cookies;

pub use cookies::{AUTH_COOKIE, CSRF_COOKIE, REFRESH_COOKIE};

use anyhow::Result;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{ApiError, RotationError};
use crate::security::audit_log::AuditLogger;
use crate::security::csrf::CsrfGuard;
use crate::security::field_cipher::FieldCipher;
use crate::tokens::access::{AccessClaims, AccessTokenSigner};
use crate::tokens::refresh::RefreshStore;
use crate::users::{ContactUpdate, UserProfile, UserStore};

pub type SharedState = Arc<AppState>;

/// Refresh records are kept 30 days past expiry so replayed hashes keep
/// tripping compromise detection.
const REFRESH_RETENTION_DAYS: i64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub signer: AccessTokenSigner,
    pub csrf: CsrfGuard,
    pub refresh_store: RefreshStore,
    pub users: UserStore,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let audit = AuditLogger::new();
        let cipher = FieldCipher::new(&config.pii_key);
        Self {
            signer: AccessTokenSigner::new(&config.token_secret, config.access_ttl_secs),
            csrf: CsrfGuard::new(config.csrf_secret.clone()),
            refresh_store: RefreshStore::new(
                Duration::days(REFRESH_RETENTION_DAYS),
                audit.clone(),
            ),
            users: UserStore::new(cipher),
            audit,
            config: Arc::new(config),
        }
    }
}

/// Authenticated identity, from the `auth_token` cookie or a bearer header.
/// Rejection is always the generic 401.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AccessClaims);

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        match claims_from_parts(&parts.headers, state) {
            Some(claims) => Ok(AuthUser(claims)),
            None => {
                state.audit.access_token_invalid();
                Err(ApiError::Unauthorized)
            }
        }
    }
}

fn claims_from_parts(
    headers: &axum::http::HeaderMap,
    state: &AppState,
) -> Option<AccessClaims> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let token = bearer.or_else(|| {
        let jar = CookieJar::from_headers(headers);
        jar.get(AUTH_COOKIE).map(|c| c.value().to_string())
    })?;

    state.signer.verify(&token)
}

/// CSRF check for state-mutating routes; read-only methods are exempt.
///
/// Valid CSRF is necessary but not sufficient: the access token is verified
/// independently here (and again by the handler's extractor), and both must
/// pass.
async fn csrf_guard(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if matches!(
        *req.method(),
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    ) {
        return Ok(next.run(req).await);
    }

    let Some(claims) = claims_from_parts(req.headers(), &state) else {
        state.audit.access_token_invalid();
        return Err(ApiError::Unauthorized);
    };

    let token = req
        .headers()
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !state.csrf.verify(token, &claims.sub) {
        state.audit.csrf_rejected(&claims.sub);
        return Err(ApiError::CsrfRejected);
    }

    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Issue the full cookie set for `profile` onto `jar`.
async fn issue_session_cookies(
    state: &AppState,
    jar: CookieJar,
    profile: &UserProfile,
    refresh_raw: &str,
    refresh_ttl_days: i64,
) -> Result<CookieJar, ApiError> {
    let access = state
        .signer
        .issue(profile)
        .map_err(ApiError::Internal)?;
    let csrf = state.csrf.generate(&profile.id);
    let secure = state.config.cookie_secure;

    Ok(jar
        .add(cookies::auth_cookie(&access, state.config.access_ttl_secs, secure))
        .add(cookies::refresh_cookie(refresh_raw, refresh_ttl_days, secure))
        .add(cookies::csrf_cookie(&csrf, secure)))
}

fn clear_cookies(jar: CookieJar) -> CookieJar {
    cookies::clear_session_cookies()
        .into_iter()
        .fold(jar, |jar, cookie| jar.add(cookie))
}

// Credential verification is the identity provider's job (external to this
// core); login takes an already-vetted opaque user id and starts a session.
async fn login_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<UserProfile>), ApiError> {
    let Some(profile) = state.users.profile(&req.user_id).await else {
        return Err(ApiError::Unauthorized);
    };

    let ttl_days = if req.remember_me {
        state.config.refresh_ttl_remember_days
    } else {
        state.config.refresh_ttl_days
    };
    let refresh = state
        .refresh_store
        .begin_session(&profile.id, Duration::days(ttl_days))
        .await;

    let jar = issue_session_cookies(&state, jar, &profile, &refresh.raw, ttl_days).await?;
    state.audit.login(&profile.id, req.remember_me);
    Ok((jar, Json(profile)))
}

// POST, no body: the refresh cookie is the credential. Success rotates the
// whole cookie set; any failure is the generic 401 meaning "logged out".
async fn refresh_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<UserProfile>), (CookieJar, ApiError)> {
    let Some(cookie) = jar.get(REFRESH_COOKIE) else {
        state.audit.refresh_rejected("missing refresh cookie");
        return Err((clear_cookies(jar), ApiError::Unauthorized));
    };
    let old_hash = crate::tokens::refresh::hash_refresh_secret(cookie.value());

    let rotated = match state.refresh_store.rotate(&old_hash).await {
        Ok(rotated) => rotated,
        Err(err) => {
            // Replay auditing happens inside the store, where the chain is
            // known; here only the non-replay reasons need a line.
            if !matches!(err, RotationError::ChainCompromised | RotationError::Unknown) {
                state.audit.refresh_rejected("expired refresh token");
            }
            return Err((clear_cookies(jar), ApiError::Unauthorized));
        }
    };

    let Some(profile) = state.users.profile(&rotated.user_id).await else {
        state.audit.refresh_rejected("user record gone");
        return Err((clear_cookies(jar), ApiError::Unauthorized));
    };

    // The cookie keeps the lifetime the session chain started with
    // (remember-me or not); rotation never shortens it.
    let jar = issue_session_cookies(&state, jar, &profile, &rotated.token.raw, rotated.ttl.num_days())
        .await
        .map_err(|e| (clear_cookies(CookieJar::new()), e))?;
    state.audit.token_refreshed(&profile.id);
    Ok((jar, Json(profile)))
}

// Idempotent: revoking an unknown or already-revoked token still clears the
// cookies and reports success.
async fn logout_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    if let Some(cookie) = jar.get(REFRESH_COOKIE) {
        let hash = crate::tokens::refresh::hash_refresh_secret(cookie.value());
        if let Some(user_id) = state.refresh_store.revoke(&hash).await {
            state.audit.logout(&user_id);
        }
    }
    (clear_cookies(jar), Json(json!({"status": "logged out"})))
}

async fn me_handler(AuthUser(claims): AuthUser) -> Json<UserProfile> {
    Json(UserProfile {
        id: claims.sub,
        email: claims.email,
        username: claims.username,
        is_host: claims.is_host,
        role: claims.role,
        email_verified: claims.email_verified,
    })
}

async fn update_contact_handler(
    State(state): State<SharedState>,
    AuthUser(claims): AuthUser,
    Json(update): Json<ContactUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let applied = state
        .users
        .update_contact(&claims.sub, update)
        .await
        .map_err(ApiError::Internal)?;
    if !applied {
        return Err(ApiError::Forbidden("unknown user record".into()));
    }
    Ok(Json(json!({"status": "updated"})))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub fn create_router(state: SharedState) -> Router {
    // Mutating business routes sit behind the CSRF guard. The auth routes
    // are exempt by design: login predates any CSRF token, refresh is the
    // producer of the next one, and logout must stay reachable for a client
    // whose access token already expired (it only revokes, idempotently).
    // All three rely on SameSite cookies instead.
    let guarded = Router::new()
        .route("/api/v1/profile/contact", put(update_contact_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), csrf_guard));

    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/me", get(me_handler))
        .merge(guarded)
        .with_state(state)
}

pub async fn serve(config: ServerConfig, port: u16) -> Result<()> {
    let state = Arc::new(AppState::new(config));

    crate::tokens::refresh::spawn_gc(
        state.refresh_store.clone(),
        std::time::Duration::from_secs(3600),
    );

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("session API listening on {}", addr);
    axum::serve(listener, app).into_future().await?;
    Ok(())
}
