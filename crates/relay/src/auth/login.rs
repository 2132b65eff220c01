// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The three-step login handshake against the upstream studio service.
//!
//! Redirects are followed manually so `Set-Cookie` headers on intermediate
//! responses end up in the jar; reqwest's automatic redirects only surface
//! the final response's headers.

use std::time::Duration;

use reqwest::{Client, Method, Response, Url};

use crate::auth::{cookie_header, has_auth_cookie, merge_set_cookies, AuthStore, CookieJar};
use crate::config::RelayConfig;

/// Statuses the upstream returns on an accepted credential submission.
const ACCEPTED_STATUS: &[u16] = &[200, 202, 302];

const MAX_REDIRECT_HOPS: usize = 5;

/// Run the login handshake and, on success, publish the new jar wholesale.
///
/// On failure the store is left untouched and an error is returned; callers
/// decide whether that is fatal (startup) or recoverable (background refresh,
/// mid-request 401 recovery). The caller must hold the store's login gate.
pub async fn login(client: &Client, config: &RelayConfig, store: &AuthStore) -> anyhow::Result<()> {
    let timeout = config.request_timeout();
    let base = config.base_url.trim_end_matches('/');
    let mut jar = CookieJar::new();

    tracing::info!("running upstream login handshake");

    // Step 1: the login page establishes baseline cookies.
    let login_url = Url::parse(&format!("{base}/login"))?;
    send_capturing(client, &mut jar, Method::GET, login_url, None, timeout).await?;

    // Step 2: the per-email login-data resource.
    let mut data_url = Url::parse(&format!("{base}/login-password.data"))?;
    data_url.query_pairs_mut().append_pair("email", &config.email);
    send_capturing(client, &mut jar, Method::GET, data_url.clone(), None, timeout).await?;

    // Step 3: submit the credentials as form data to the same resource.
    let form = [("email", config.email.as_str()), ("password", config.password.as_str())];
    let resp =
        send_capturing(client, &mut jar, Method::POST, data_url, Some(&form), timeout).await?;

    let status = resp.status().as_u16();
    if ACCEPTED_STATUS.contains(&status) && has_auth_cookie(&jar) {
        store.publish(jar).await;
        tracing::info!("login succeeded, cookie jar refreshed");
        Ok(())
    } else {
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        anyhow::bail!("login rejected (status {status}): {snippet}")
    }
}

/// Issue a request with the working jar attached, merge `Set-Cookie` headers
/// from every hop, and follow redirects (as GET) up to a bounded depth.
async fn send_capturing(
    client: &Client,
    jar: &mut CookieJar,
    method: Method,
    url: Url,
    form: Option<&[(&str, &str)]>,
    timeout: Duration,
) -> anyhow::Result<Response> {
    let mut method = method;
    let mut url = url;
    let mut form = form;

    for _ in 0..=MAX_REDIRECT_HOPS {
        let mut req = client.request(method.clone(), url.clone()).timeout(timeout);
        if !jar.is_empty() {
            req = req.header(reqwest::header::COOKIE, cookie_header(jar));
        }
        if let Some(fields) = form {
            req = req.form(fields);
        }
        let resp = req.send().await?;
        merge_set_cookies(jar, resp.headers());

        if !resp.status().is_redirection() {
            return Ok(resp);
        }
        let Some(location) = resp.headers().get(reqwest::header::LOCATION) else {
            return Ok(resp);
        };
        url = resp.url().join(location.to_str()?)?;
        method = Method::GET;
        form = None;
    }

    anyhow::bail!("redirect loop during login handshake")
}
