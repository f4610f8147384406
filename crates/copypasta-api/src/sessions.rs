//! Opaque session tokens bound to user ids.
//!
//! A token is 32 random bytes, base64-url encoded. The cookie value is
//! `<token>.<signature>` where the signature is HMAC-SHA256 over the
//! token keyed by `SECRET_KEY`, so forged cookies are rejected by a
//! constant-time MAC check before the table is consulted. The table
//! itself lives in process memory; a restart logs every client out and
//! they simply re-authenticate.

use std::collections::HashMap;
use std::sync::RwLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "session";

/// Cookie lifetime. Sessions are long-lived by design and die only on
/// logout or server restart; the cookie just has to outlive both.
pub const SESSION_COOKIE_MAX_AGE_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
}

pub struct SessionStore {
    secret: Vec<u8>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a session for the user and return the signed cookie value.
    pub fn issue(&self, user_id: i64, username: &str) -> String {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let token = URL_SAFE_NO_PAD.encode(raw);
        let value = format!("{token}.{}", self.sign(&token));

        self.sessions
            .write()
            .expect("session lock poisoned")
            .insert(
                token,
                Session {
                    user_id,
                    username: username.to_string(),
                },
            );
        value
    }

    /// Resolve a cookie value to a session. The signature is verified in
    /// constant time before any lookup; tampered or unknown values
    /// resolve to `None`.
    pub fn validate(&self, value: &str) -> Option<Session> {
        let (token, signature) = value.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).ok()?;

        self.sessions
            .read()
            .expect("session lock poisoned")
            .get(token)
            .cloned()
    }

    /// Invalidate the session for a cookie value, if any.
    pub fn revoke(&self, value: &str) {
        if let Some((token, _)) = value.split_once('.') {
            self.sessions
                .write()
                .expect("session lock poisoned")
                .remove(token);
        }
    }

    fn sign(&self, token: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(token.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_validate() {
        let store = SessionStore::new("test-secret");
        let value = store.issue(42, "alice");

        let session = store.validate(&value).unwrap();
        assert_eq!(session.user_id, 42);
        assert_eq!(session.username, "alice");
    }

    #[test]
    fn tokens_are_unique_per_issue() {
        let store = SessionStore::new("test-secret");
        assert_ne!(store.issue(1, "alice"), store.issue(1, "alice"));
    }

    #[test]
    fn tampered_value_is_rejected() {
        let store = SessionStore::new("test-secret");
        let value = store.issue(42, "alice");

        let (token, sig) = value.split_once('.').unwrap();
        assert!(store.validate(&format!("{token}x.{sig}")).is_none());
        assert!(store.validate(&format!("{token}.{sig}x")).is_none());
        assert!(store.validate(token).is_none());
        assert!(store.validate("").is_none());
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let issuing = SessionStore::new("secret-a");
        let verifying = SessionStore::new("secret-b");
        let value = issuing.issue(42, "alice");
        assert!(verifying.validate(&value).is_none());
    }

    #[test]
    fn revoked_session_stops_validating() {
        let store = SessionStore::new("test-secret");
        let value = store.issue(42, "alice");
        store.revoke(&value);
        assert!(store.validate(&value).is_none());
    }
}
