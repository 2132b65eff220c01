// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication state: the cookie jar, its freshness, and the process-wide
//! login exclusivity gate.

pub mod login;
pub mod persist;
pub mod refresh;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock};

/// Session cookies for the upstream domain, cookie name -> value.
pub type CookieJar = BTreeMap<String, String>;

/// A jar counts as authenticated only when it carries a cookie whose name
/// contains this marker. Anything else is a partial jar and treated as absent.
pub const AUTH_COOKIE_MARKER: &str = "auth-token";

/// Snapshot of the authentication state.
///
/// `version` increments on every successful login so concurrent 401 handlers
/// can tell whether another task already refreshed the jar.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub jar: Option<CookieJar>,
    /// Epoch seconds of the last successful login.
    pub last_refreshed: Option<u64>,
    pub valid: bool,
    pub version: u64,
}

/// Shared store for [`AuthState`].
///
/// Reads are cheap snapshots; only the login handshake writes, and only while
/// holding the exclusivity gate.
pub struct AuthStore {
    state: RwLock<AuthState>,
    login_gate: Mutex<()>,
    path: PathBuf,
}

impl AuthStore {
    pub fn new(path: PathBuf) -> Self {
        Self { state: RwLock::new(AuthState::default()), login_gate: Mutex::new(()), path }
    }

    pub async fn snapshot(&self) -> AuthState {
        self.state.read().await.clone()
    }

    /// The process-wide login gate. Exactly one login handshake may run at a
    /// time; everything that triggers a re-login must hold this.
    pub fn login_gate(&self) -> &Mutex<()> {
        &self.login_gate
    }

    /// Publish a freshly authenticated jar: wholesale replace, bump the
    /// version, persist. Called by the authenticator only.
    pub async fn publish(&self, jar: CookieJar) {
        let persisted = persist::PersistedAuth { cookies: jar.clone(), last_refresh: epoch_secs() };
        {
            let mut state = self.state.write().await;
            state.jar = Some(jar);
            state.last_refreshed = Some(persisted.last_refresh);
            state.valid = true;
            state.version += 1;
        }
        if let Err(e) = persist::save(&self.path, &persisted) {
            tracing::warn!(err = %e, "failed to persist cookie jar");
        }
    }

    /// Seed state from the persisted cookie file, if any. Jars without the
    /// auth-token cookie are discarded.
    pub async fn restore_persisted(&self) {
        let Some(persisted) = persist::load(&self.path) else {
            return;
        };
        if !has_auth_cookie(&persisted.cookies) {
            tracing::warn!("persisted cookie jar is incomplete, ignoring");
            return;
        }
        let mut state = self.state.write().await;
        state.jar = Some(persisted.cookies);
        state.last_refreshed = Some(persisted.last_refresh);
        state.valid = true;
        state.version += 1;
        tracing::info!("restored cookie jar from disk");
    }

    /// Whether the jar is absent or older than the freshness window.
    pub async fn is_stale(&self, window: Duration) -> bool {
        let state = self.state.read().await;
        match state.last_refreshed {
            Some(at) => epoch_secs().saturating_sub(at) > window.as_secs(),
            None => true,
        }
    }
}

/// Whether the jar carries the upstream's session-authentication cookie.
pub fn has_auth_cookie(jar: &CookieJar) -> bool {
    jar.keys().any(|name| name.contains(AUTH_COOKIE_MARKER))
}

/// Render the jar as a `Cookie` header value.
pub fn cookie_header(jar: &CookieJar) -> String {
    let mut out = String::new();
    for (name, value) in jar {
        if !out.is_empty() {
            out.push_str("; ");
        }
        out.push_str(name);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Merge `Set-Cookie` response headers into the working jar.
pub fn merge_set_cookies(jar: &mut CookieJar, headers: &reqwest::header::HeaderMap) {
    for header in headers.get_all(reqwest::header::SET_COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        let pair = raw.split(';').next().unwrap_or_default();
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                jar.insert(name.to_owned(), value.trim().to_owned());
            }
        }
    }
}

/// Current epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_joins_pairs() {
        let mut jar = CookieJar::new();
        jar.insert("a".into(), "1".into());
        jar.insert("b".into(), "2".into());
        assert_eq!(cookie_header(&jar), "a=1; b=2");
    }

    #[test]
    fn merge_set_cookies_strips_attributes() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append(
            reqwest::header::SET_COOKIE,
            "sb-auth-token=abc; Path=/; HttpOnly".parse().unwrap(),
        );
        headers.append(reqwest::header::SET_COOKIE, "session=xyz".parse().unwrap());
        let mut jar = CookieJar::new();
        merge_set_cookies(&mut jar, &headers);
        assert_eq!(jar.get("sb-auth-token").map(String::as_str), Some("abc"));
        assert_eq!(jar.get("session").map(String::as_str), Some("xyz"));
        assert!(has_auth_cookie(&jar));
    }

    #[test]
    fn partial_jar_is_not_authenticated() {
        let mut jar = CookieJar::new();
        jar.insert("session".into(), "xyz".into());
        assert!(!has_auth_cookie(&jar));
    }

    #[tokio::test]
    async fn publish_bumps_version_and_marks_valid() {
        let dir = std::env::temp_dir().join(format!("relay-auth-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let store = AuthStore::new(dir.join("cookies.json"));

        assert!(!store.snapshot().await.valid);
        let mut jar = CookieJar::new();
        jar.insert("sb-auth-token".into(), "tok".into());
        store.publish(jar).await;

        let snap = store.snapshot().await;
        assert!(snap.valid);
        assert_eq!(snap.version, 1);
        assert!(snap.last_refreshed.is_some());
        assert!(!store.is_stale(Duration::from_secs(60)).await);
    }
}
