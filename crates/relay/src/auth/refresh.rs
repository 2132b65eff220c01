// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background cookie refresh: periodic wake, re-login once the jar is older
//! than the freshness window.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::state::RelayState;

/// Spawn the refresh loop. Wakes every `refresh_check_secs`, re-runs the
/// login handshake (on the shared exclusivity gate) when the jar is stale,
/// and logs failures — the next wake retries.
pub fn spawn_refresh(state: Arc<RelayState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let period = state.config.refresh_check_interval();
        let window = state.config.refresh_interval();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }

            if !state.auth.is_stale(window).await {
                continue;
            }
            tracing::info!("cookie jar is stale, refreshing");
            match state.executor.refresh_credentials().await {
                Ok(()) => tracing::info!("scheduled cookie refresh succeeded"),
                Err(e) => tracing::warn!(err = format!("{e:#}"), "scheduled cookie refresh failed"),
            }
        }
    });
}
