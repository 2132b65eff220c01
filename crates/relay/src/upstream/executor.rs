// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request executor for upstream calls.
//!
//! Every call runs through an explicit per-call state machine: 401/403 takes
//! the login gate and re-authenticates (coalescing with concurrent logins),
//! 5xx and transport errors retry with a linearly scaled backoff, any other
//! non-2xx is terminal. A successful re-login retries the same call without
//! consuming an attempt; a failed re-login aborts immediately rather than
//! hammering a dead credential.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};

use crate::auth::{cookie_header, login, AuthStore, CookieJar};
use crate::config::RelayConfig;

/// A single upstream call, rebuilt for every attempt.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub referer: Option<String>,
    pub body: RequestBody,
    pub timeout: Duration,
    /// Serve the raw 3xx instead of following it (conversation-id extraction
    /// reads the `Location` header).
    pub no_redirect: bool,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            referer: None,
            body: RequestBody::Empty,
            timeout,
            no_redirect: false,
        }
    }

    pub fn post_form(
        url: impl Into<String>,
        fields: Vec<(String, String)>,
        timeout: Duration,
    ) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            referer: None,
            body: RequestBody::Form(fields),
            timeout,
            no_redirect: false,
        }
    }

    pub fn post_json(
        url: impl Into<String>,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            referer: None,
            body: RequestBody::Json(body),
            timeout,
            no_redirect: false,
        }
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn no_redirect(mut self) -> Self {
        self.no_redirect = true;
        self
    }
}

/// Why an upstream call gave up.
#[derive(Debug)]
pub enum ExecuteError {
    /// Re-authentication failed; the credential is dead until the scheduler
    /// recovers it.
    AuthFailed,
    /// Non-retryable upstream status.
    Terminal { status: StatusCode, body: String },
    /// Retry budget exhausted on transient failures.
    Exhausted,
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthFailed => write!(f, "upstream re-authentication failed"),
            Self::Terminal { status, body } => write!(f, "upstream returned {status}: {body}"),
            Self::Exhausted => write!(f, "upstream retries exhausted"),
        }
    }
}

impl std::error::Error for ExecuteError {}

/// Per-call state machine.
#[derive(Debug, Clone, Copy)]
enum Attempt {
    Attempting { attempt: u32, reauthed: bool },
    AwaitingReauth { attempt: u32, seen_version: u64 },
    Retrying { attempt: u32, reauthed: bool },
}

/// How to react to an upstream status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Success,
    Reauth,
    Transient,
    Terminal,
}

fn classify(status: StatusCode) -> Disposition {
    // 3xx counts as success: the redirect-following client never surfaces
    // one, and the no-redirect caller wants the raw response.
    if status.is_success() || status.is_redirection() {
        Disposition::Success
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Disposition::Reauth
    } else if status.is_server_error() {
        Disposition::Transient
    } else {
        Disposition::Terminal
    }
}

/// Issues upstream HTTP calls with the current cookie jar attached.
pub struct Executor {
    config: Arc<RelayConfig>,
    auth: Arc<AuthStore>,
    http: Client,
    http_no_redirect: Client,
}

impl Executor {
    pub fn new(config: Arc<RelayConfig>, auth: Arc<AuthStore>) -> anyhow::Result<Self> {
        let headers = base_headers(&config.base_url);
        let http = Client::builder().default_headers(headers.clone()).build()?;
        let http_no_redirect = Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { config, auth, http, http_no_redirect })
    }

    pub fn auth(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    /// Run the login handshake under the exclusivity gate, unconditionally.
    /// Used at startup and by the background refresher.
    pub async fn refresh_credentials(&self) -> anyhow::Result<()> {
        let _gate = self.auth.login_gate().lock().await;
        login::login(&self.http_no_redirect, &self.config, &self.auth).await
    }

    /// Execute a call with the retry/reauth state machine.
    pub async fn execute(&self, req: &UpstreamRequest) -> Result<Response, ExecuteError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut state = Attempt::Attempting { attempt: 1, reauthed: false };

        loop {
            state = match state {
                Attempt::Attempting { attempt, reauthed } => {
                    let snap = self.auth.snapshot().await;
                    match self.send(req, snap.jar.as_ref()).await {
                        Ok(resp) => match classify(resp.status()) {
                            Disposition::Success => return Ok(resp),
                            Disposition::Reauth if reauthed => {
                                tracing::warn!(url = %req.url, "still unauthorized after re-login");
                                return Err(ExecuteError::AuthFailed);
                            }
                            Disposition::Reauth => {
                                tracing::warn!(
                                    url = %req.url,
                                    status = %resp.status(),
                                    "unauthorized, re-authenticating"
                                );
                                Attempt::AwaitingReauth { attempt, seen_version: snap.version }
                            }
                            Disposition::Transient => {
                                tracing::warn!(
                                    url = %req.url,
                                    status = %resp.status(),
                                    attempt,
                                    "transient upstream error"
                                );
                                Attempt::Retrying { attempt, reauthed }
                            }
                            Disposition::Terminal => {
                                let status = resp.status();
                                let body: String =
                                    resp.text().await.unwrap_or_default().chars().take(200).collect();
                                tracing::warn!(url = %req.url, %status, body = %body, "terminal upstream status");
                                return Err(ExecuteError::Terminal { status, body });
                            }
                        },
                        Err(e) => {
                            tracing::warn!(url = %req.url, err = %e, attempt, "upstream request error");
                            Attempt::Retrying { attempt, reauthed }
                        }
                    }
                }
                Attempt::AwaitingReauth { attempt, seen_version } => {
                    match self.reauthenticate(seen_version).await {
                        // The refreshed jar is shared, so the retry (and every
                        // other in-flight call) sees it. Does not consume an
                        // attempt.
                        Ok(()) => Attempt::Attempting { attempt, reauthed: true },
                        Err(e) => {
                            tracing::error!(err = format!("{e:#}"), "re-login failed");
                            return Err(ExecuteError::AuthFailed);
                        }
                    }
                }
                Attempt::Retrying { attempt, reauthed } => {
                    if attempt >= max_attempts {
                        tracing::error!(url = %req.url, attempts = max_attempts, "all retries failed");
                        return Err(ExecuteError::Exhausted);
                    }
                    tokio::time::sleep(self.config.retry_delay() * attempt).await;
                    Attempt::Attempting { attempt: attempt + 1, reauthed }
                }
            };
        }
    }

    async fn send(
        &self,
        req: &UpstreamRequest,
        jar: Option<&CookieJar>,
    ) -> reqwest::Result<Response> {
        let client = if req.no_redirect { &self.http_no_redirect } else { &self.http };
        let mut builder = client.request(req.method.clone(), &req.url).timeout(req.timeout);
        if let Some(jar) = jar {
            if !jar.is_empty() {
                builder = builder.header(reqwest::header::COOKIE, cookie_header(jar));
            }
        }
        if let Some(referer) = &req.referer {
            builder = builder.header(reqwest::header::REFERER, referer);
        }
        builder = match &req.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Json(value) => builder.json(value),
        };
        builder.send().await
    }

    /// Re-login under the gate, coalescing with a login another task already
    /// completed while we were waiting.
    async fn reauthenticate(&self, seen_version: u64) -> anyhow::Result<()> {
        let _gate = self.auth.login_gate().lock().await;
        let snap = self.auth.snapshot().await;
        if snap.valid && snap.version > seen_version {
            tracing::debug!("jar already refreshed by a concurrent login, retrying with it");
            return Ok(());
        }
        login::login(&self.http_no_redirect, &self.config, &self.auth).await
    }
}

/// Browser-shaped baseline headers the upstream expects.
fn base_headers(base_url: &str) -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, ORIGIN, USER_AGENT};

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
        ),
    );
    if let Ok(origin) = HeaderValue::from_str(base_url.trim_end_matches('/')) {
        headers.insert(ORIGIN, origin);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_is_exhaustive_over_the_interesting_statuses() {
        assert_eq!(classify(StatusCode::OK), Disposition::Success);
        assert_eq!(classify(StatusCode::ACCEPTED), Disposition::Success);
        assert_eq!(classify(StatusCode::FOUND), Disposition::Success);
        assert_eq!(classify(StatusCode::TEMPORARY_REDIRECT), Disposition::Success);
        assert_eq!(classify(StatusCode::UNAUTHORIZED), Disposition::Reauth);
        assert_eq!(classify(StatusCode::FORBIDDEN), Disposition::Reauth);
        assert_eq!(classify(StatusCode::INTERNAL_SERVER_ERROR), Disposition::Transient);
        assert_eq!(classify(StatusCode::BAD_GATEWAY), Disposition::Transient);
        assert_eq!(classify(StatusCode::NOT_FOUND), Disposition::Terminal);
        assert_eq!(classify(StatusCode::UNPROCESSABLE_ENTITY), Disposition::Terminal);
    }
}
