// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Studio relay: an OpenAI-compatible front for the studio chat upstream.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod prompt;
pub mod state;
pub mod transport;
pub mod upstream;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::refresh::spawn_refresh;
use crate::config::RelayConfig;
use crate::state::RelayState;
use crate::transport::build_router;

/// Run the relay server until shutdown.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = Arc::new(RelayState::new(config, shutdown.clone())?);

    state.auth.restore_persisted().await;
    if let Err(e) = state.executor.refresh_credentials().await {
        // A restored jar lets us start degraded; with nothing at all the
        // relay cannot serve a single request.
        if state.auth.snapshot().await.valid {
            tracing::warn!(err = format!("{e:#}"), "startup login failed, using persisted cookies");
        } else {
            anyhow::bail!("startup login failed and no persisted cookies exist: {e:#}");
        }
    }

    spawn_refresh(Arc::clone(&state), shutdown.clone());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    tracing::info!("studio-relay listening on {addr}");
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::RelayConfig;

    /// A config pointing at `base_url` with fast timeouts, for unit tests
    /// that never touch the network.
    pub(crate) fn test_config(base_url: &str) -> RelayConfig {
        RelayConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            email: "test@example.com".to_owned(),
            password: "secret".to_owned(),
            base_url: base_url.to_owned(),
            cookie_file: std::env::temp_dir().join(format!(
                "studio-relay-test-{}-cookies.json",
                std::process::id()
            )),
            refresh_interval_secs: 12 * 60 * 60,
            refresh_check_secs: 60 * 60,
            heartbeat_secs: 15,
            request_timeout_secs: 5,
            chat_timeout_secs: 5,
            max_attempts: 3,
            retry_delay_secs: 0,
            reasoning_models: "claude".to_owned(),
        }
    }
}
