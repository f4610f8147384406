use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::anyhow;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::IntoResponse;
use axum::Form;
use serde::Deserialize;
use tracing::info;

use copypasta_notify::ChangeNotifier;
use copypasta_store::Database;
use copypasta_types::api::{LoginForm, RegisterForm};

use crate::error::{ApiError, ApiQuery};
use crate::middleware::{self, CurrentUser};
use crate::sessions::{SessionStore, SESSION_COOKIE, SESSION_COOKIE_MAX_AGE_SECS};

/// Password byte cap: Argon2 cost scales with input length, so absurdly
/// long passwords are refused up front.
const MAX_PASSWORD_LEN: usize = 128;
const MIN_PASSWORD_LEN: usize = 4;

/// Auth attempts allowed per IP inside one sliding window.
const RATE_LIMIT_MAX_ATTEMPTS: u32 = 20;
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub notifier: ChangeNotifier,
    pub sessions: SessionStore,
    pub auth_rate_limiter: AuthRateLimiter,
    /// Verified against when a login names an unknown user, so response
    /// timing does not reveal whether the account exists.
    pub dummy_hash: String,
    /// Upper clamp for the poll `timeout` query parameter, in seconds.
    pub poll_max_timeout: u64,
}

/// Sliding-window limiter over auth attempts, keyed by client IP.
#[derive(Clone)]
pub struct AuthRateLimiter {
    state: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
    /// Counter driving a periodic full sweep so IPs that never return
    /// don't accumulate forever.
    call_count: Arc<AtomicU64>,
}

impl AuthRateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            call_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record an attempt; `false` means the window for this IP is full.
    pub fn check(&self, ip: IpAddr) -> bool {
        let mut map = self.state.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let window = std::time::Duration::from_secs(RATE_LIMIT_WINDOW_SECS);

        // Every 100th call, sweep all IPs to drop stale entries.
        let count = self.call_count.fetch_add(1, Ordering::Relaxed);
        if count % 100 == 0 {
            map.retain(|_, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < window);
                !timestamps.is_empty()
            });
        }

        let timestamps = map.entry(ip).or_default();
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() as u32 >= RATE_LIMIT_MAX_ATTEMPTS {
            return false;
        }

        timestamps.push(now);
        true
    }
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// `?next=/path` on login/register: where to send the browser afterwards.
#[derive(Debug, Deserialize)]
pub struct NextParam {
    next: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ApiQuery(query): ApiQuery<NextParam>,
    Form(form): Form<RegisterForm>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.auth_rate_limiter.check(addr.ip()) {
        return Err(ApiError::RateLimited);
    }

    let username = form.username.trim().to_string();
    if username.is_empty() {
        return Err(ApiError::BadRequest("username must not be empty".into()));
    }
    if form.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if form.password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::BadRequest("password too long".into()));
    }

    // Argon2 hashing is deliberately slow; keep it off the async runtime.
    let state_clone = state.clone();
    let name = username.clone();
    let password = form.password;
    let user_id = tokio::task::spawn_blocking(move || -> Result<i64, ApiError> {
        let password_hash = hash_password(&password)?;
        Ok(state_clone.db.create_user(&name, &password_hash)?)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!("join error: {e}")))??;

    info!("registered user {} ({})", username, user_id);

    let value = state.sessions.issue(user_id, &username);
    Ok(found(
        redirect_target(query.next.as_deref()),
        session_cookie(&value),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ApiQuery(query): ApiQuery<NextParam>,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.auth_rate_limiter.check(addr.ip()) {
        return Err(ApiError::RateLimited);
    }

    if form.password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::AuthFailed);
    }

    let state_clone = state.clone();
    let username = form.username.trim().to_string();
    let password = form.password;
    let user = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        match state_clone.db.get_user_by_username(&username)? {
            Some(user) => {
                verify_password(&user.password_hash, &password)?;
                Ok(user)
            }
            None => {
                // Burn a verification against the dummy hash so a miss
                // costs the same as a mismatch.
                let _ = verify_password(&state_clone.dummy_hash, &password);
                Err(ApiError::AuthFailed)
            }
        }
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!("join error: {e}")))??;

    info!("{} ({}) logged in", user.username, user.id);

    let value = state.sessions.issue(user.id, &user.username);
    Ok(found(
        redirect_target(query.next.as_deref()),
        session_cookie(&value),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    if let Some(value) = middleware::session_value(&headers) {
        state.sessions.revoke(&value);
    }
    info!("{} ({}) logged out", user.username, user.id);
    found("/login", clear_session_cookie())
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow!("hash password: {e}")))?
        .to_string())
}

fn verify_password(stored_hash: &str, password: &str) -> Result<(), ApiError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| ApiError::Internal(anyhow!("stored hash unparseable: {e}")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ApiError::AuthFailed)
}

fn session_cookie(value: &str) -> String {
    format!(
        "{SESSION_COOKIE}={value}; HttpOnly; Path=/; Max-Age={SESSION_COOKIE_MAX_AGE_SECS}; SameSite=Lax"
    )
}

fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; HttpOnly; Path=/; Max-Age=0")
}

/// Honor `?next=` only for same-site absolute paths; everything else goes
/// to `/`. Protocol-relative `//host` would be an open redirect.
fn redirect_target(next: Option<&str>) -> &str {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") => n,
        _ => "/",
    }
}

fn found(location: &str, cookie: String) -> (StatusCode, [(HeaderName, String); 2]) {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.to_string()),
            (header::SET_COOKIE, cookie),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_target_rejects_foreign_urls() {
        assert_eq!(redirect_target(None), "/");
        assert_eq!(redirect_target(Some("/history")), "/history");
        assert_eq!(redirect_target(Some("https://evil.example")), "/");
        assert_eq!(redirect_target(Some("//evil.example")), "/");
        assert_eq!(redirect_target(Some("relative")), "/");
    }

    #[test]
    fn password_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "hunter2").is_ok());
        assert!(matches!(
            verify_password(&hash, "hunter3"),
            Err(ApiError::AuthFailed)
        ));
    }

    #[test]
    fn rate_limiter_trips_after_burst() {
        let limiter = AuthRateLimiter::new();
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        for _ in 0..RATE_LIMIT_MAX_ATTEMPTS {
            assert!(limiter.check(ip));
        }
        assert!(!limiter.check(ip));

        // Other addresses are unaffected.
        assert!(limiter.check("203.0.113.8".parse().unwrap()));
    }
}
