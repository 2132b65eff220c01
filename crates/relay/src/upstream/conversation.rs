// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ephemeral upstream conversations: one throwaway conversation per client
//! request, deleted (best-effort) on every exit path via a scoped guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;

use crate::auth::epoch_secs;
use crate::config::RelayConfig;
use crate::upstream::executor::{Executor, UpstreamRequest};

/// The upstream corner type used for plain text chats.
pub const CORNER_TYPE: &str = "text";

pub struct ConversationManager {
    executor: Arc<Executor>,
    config: Arc<RelayConfig>,
    corner_re: Regex,
}

impl ConversationManager {
    pub fn new(config: Arc<RelayConfig>, executor: Arc<Executor>) -> anyhow::Result<Arc<Self>> {
        let corner_re = Regex::new(&format!(r"/stream/corners/{CORNER_TYPE}/([\w-]+)"))?;
        Ok(Arc::new(Self { executor, config, corner_re }))
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// The conversation's corner page URL, used as `Referer` on chat calls.
    pub fn corner_url(&self, id: &str) -> String {
        format!("{}/stream/corners/{CORNER_TYPE}/{id}", self.base())
    }

    /// Create a fresh upstream conversation for one client request.
    ///
    /// Three-step choreography: warm-up fetch, throwaway probe submission,
    /// then a corner-data request whose redirect target (or decoded body)
    /// embeds the new conversation id. An unmatched response is an error,
    /// never a fabricated id.
    pub async fn create(
        self: &Arc<Self>,
        owner_request_id: &str,
    ) -> anyhow::Result<ConversationGuard> {
        let timeout = self.config.request_timeout();
        let base = self.base();

        self.executor
            .execute(&UpstreamRequest::get(format!("{base}/stream"), timeout))
            .await
            .map_err(|e| anyhow::anyhow!("conversation warm-up failed: {e}"))?;

        let probe = uuid::Uuid::new_v4().to_string();
        let form = vec![
            ("prompt".to_owned(), probe.clone()),
            ("intent".to_owned(), "execute-prompt".to_owned()),
        ];
        self.executor
            .execute(&UpstreamRequest::post_form(
                format!("{base}/stream.data?searchType=studio"),
                form,
                timeout,
            ))
            .await
            .map_err(|e| anyhow::anyhow!("conversation probe failed: {e}"))?;

        let corner_data_url = format!("{base}/stream/corners/{CORNER_TYPE}.data?prompt={probe}");
        let resp = self
            .executor
            .execute(&UpstreamRequest::get(corner_data_url, timeout).no_redirect())
            .await
            .map_err(|e| anyhow::anyhow!("conversation corner fetch failed: {e}"))?;

        let status = resp.status();
        let id = if status.is_redirection() || status == reqwest::StatusCode::ACCEPTED {
            resp.headers()
                .get(reqwest::header::LOCATION)
                .and_then(|loc| loc.to_str().ok())
                .and_then(|loc| self.extract_id(loc))
        } else {
            // reqwest has already decompressed the body at this point.
            let body = resp.text().await.unwrap_or_default();
            self.extract_id(&body)
        };

        let Some(id) = id else {
            anyhow::bail!("could not extract conversation id (status {status})");
        };

        tracing::info!(conversation = %id, request = %owner_request_id, "created ephemeral conversation");
        Ok(ConversationGuard {
            manager: Arc::clone(self),
            id,
            owner_request_id: owner_request_id.to_owned(),
            created_at: epoch_secs(),
            finished: AtomicBool::new(false),
        })
    }

    fn extract_id(&self, text: &str) -> Option<String> {
        self.corner_re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_owned())
    }

    /// Archive (delete) a conversation. Best-effort: failures are logged and
    /// swallowed — a leaked conversation is an acceptable degradation.
    pub async fn delete(&self, id: &str) {
        let req = UpstreamRequest::post_form(
            format!("{}/api/chat/archive.data", self.base()),
            vec![("chat".to_owned(), id.to_owned())],
            self.config.request_timeout(),
        )
        .referer(self.corner_url(id));

        match self.executor.execute(&req).await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(conversation = %id, "ephemeral conversation archived");
            }
            Ok(resp) => {
                tracing::warn!(conversation = %id, status = %resp.status(), "archive returned non-success");
            }
            Err(e) => {
                tracing::warn!(conversation = %id, err = %e, "failed to archive conversation");
            }
        }
    }
}

/// Scoped ownership of an ephemeral conversation id.
///
/// `finish()` archives explicitly; if it never runs (error return, panic,
/// client disconnect dropping the stream), `Drop` spawns the archive call.
/// The atomic flag makes deletion exactly-once across all exit paths.
pub struct ConversationGuard {
    manager: Arc<ConversationManager>,
    id: String,
    owner_request_id: String,
    created_at: u64,
    finished: AtomicBool,
}

impl ConversationGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Archive now, on the caller's task. Safe to call more than once.
    pub async fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.delete(&self.id).await;
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(&self.manager);
        let id = self.id.clone();
        let request = self.owner_request_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tracing::debug!(conversation = %id, %request, "cleaning up abandoned conversation");
                    manager.delete(&id).await;
                });
            }
            Err(_) => {
                tracing::warn!(conversation = %id, "no runtime available for conversation cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthStore;

    fn test_manager() -> Arc<ConversationManager> {
        let config = Arc::new(crate::test_support::test_config("http://127.0.0.1:1"));
        let auth = Arc::new(AuthStore::new(config.cookie_file.clone()));
        let executor = Arc::new(
            Executor::new(Arc::clone(&config), auth).unwrap_or_else(|e| panic!("executor: {e}")),
        );
        ConversationManager::new(config, executor).unwrap_or_else(|e| panic!("manager: {e}"))
    }

    #[test]
    fn extracts_id_from_location_header_value() {
        let manager = test_manager();
        let loc = "https://upstream/stream/corners/text/abc-123?x=1";
        assert_eq!(manager.extract_id(loc).as_deref(), Some("abc-123"));
    }

    #[test]
    fn extracts_id_from_response_body() {
        let manager = test_manager();
        let body = r#"{"redirect":"/stream/corners/text/f00dfeed"}"#;
        assert_eq!(manager.extract_id(body).as_deref(), Some("f00dfeed"));
    }

    #[test]
    fn no_match_yields_none() {
        let manager = test_manager();
        assert!(manager.extract_id("<html>nothing here</html>").is_none());
        assert!(manager.extract_id("/stream/corners/image/abc").is_none());
    }
}
