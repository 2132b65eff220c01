// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthStore;
use crate::config::RelayConfig;
use crate::upstream::conversation::ConversationManager;
use crate::upstream::executor::Executor;

/// Shared relay state.
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub auth: Arc<AuthStore>,
    pub executor: Arc<Executor>,
    pub conversations: Arc<ConversationManager>,
    pub shutdown: CancellationToken,
}

impl RelayState {
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let auth = Arc::new(AuthStore::new(config.cookie_file.clone()));
        let executor = Arc::new(Executor::new(Arc::clone(&config), Arc::clone(&auth))?);
        let conversations = ConversationManager::new(Arc::clone(&config), Arc::clone(&executor))?;
        Ok(Self { config, auth, executor, conversations, shutdown })
    }
}
