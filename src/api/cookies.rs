use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

pub const AUTH_COOKIE: &str = "auth_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const CSRF_COOKIE: &str = "csrf_token";

/// Short-lived access-token cookie; httpOnly, dies with the token.
pub(super) fn auth_cookie(token: &str, ttl_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::seconds(ttl_secs))
        .build()
}

/// Long-lived refresh-token cookie; httpOnly. Lifetime depends on
/// remember-me at login.
pub(super) fn refresh_cookie(raw_token: &str, ttl_days: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, raw_token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::days(ttl_days))
        .build()
}

/// CSRF cookie is deliberately NOT httpOnly: scripts must read it to attach
/// the value as a request header.
pub(super) fn csrf_cookie(token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token.to_string()))
        .http_only(false)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::hours(24))
        .build()
}

/// Removal cookies for the whole session set.
pub(super) fn clear_session_cookies() -> [Cookie<'static>; 3] {
    [AUTH_COOKIE, REFRESH_COOKIE, CSRF_COOKIE].map(|name| {
        Cookie::build((name, ""))
            .path("/")
            .max_age(Duration::ZERO)
            .build()
    })
}
