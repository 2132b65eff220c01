// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the studio relay.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "studio-relay", about = "OpenAI-compatible relay for the studio upstream")]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "RELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 7860, env = "PORT")]
    pub port: u16,

    /// Upstream account email.
    #[arg(long, env = "VS_EMAIL")]
    pub email: String,

    /// Upstream account password.
    #[arg(long, env = "VS_PASSWORD")]
    pub password: String,

    /// Base URL of the upstream studio service.
    #[arg(long, default_value = "https://app.verticalstudio.ai", env = "VS_BASE_URL")]
    pub base_url: String,

    /// Path of the persisted cookie file.
    #[arg(long, default_value = "cookies.json", env = "RELAY_COOKIE_FILE")]
    pub cookie_file: std::path::PathBuf,

    /// Cookie freshness window in seconds. The background refresher re-runs the
    /// login handshake once the jar is older than this.
    #[arg(long, default_value_t = 12 * 60 * 60, env = "RELAY_REFRESH_INTERVAL_SECS")]
    pub refresh_interval_secs: u64,

    /// How often the background refresher wakes to check freshness, in seconds.
    #[arg(long, default_value_t = 60 * 60, env = "RELAY_REFRESH_CHECK_SECS")]
    pub refresh_check_secs: u64,

    /// Heartbeat interval for streaming responses, in seconds.
    #[arg(long, default_value_t = 15, env = "RELAY_HEARTBEAT_SECS")]
    pub heartbeat_secs: u64,

    /// Timeout for auxiliary upstream calls (login, conversation management), in seconds.
    #[arg(long, default_value_t = 30, env = "RELAY_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Timeout for the streaming chat call, in seconds. Chat completions can
    /// legitimately run for minutes.
    #[arg(long, default_value_t = 300, env = "RELAY_CHAT_TIMEOUT_SECS")]
    pub chat_timeout_secs: u64,

    /// Attempt budget for upstream calls.
    #[arg(long, default_value_t = 3, env = "RELAY_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Base retry delay in seconds (scaled linearly by attempt number).
    #[arg(long, default_value_t = 2, env = "RELAY_RETRY_DELAY_SECS")]
    pub retry_delay_secs: u64,

    /// Comma-separated upstream model id substrings that activate reasoning.
    #[arg(long, default_value = "claude", env = "RELAY_REASONING_MODELS")]
    pub reasoning_models: String,
}

impl RelayConfig {
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_check_secs)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn chat_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.chat_timeout_secs)
    }

    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_delay_secs)
    }

    /// Substring patterns that switch on upstream reasoning for a model.
    pub fn reasoning_patterns(&self) -> Vec<String> {
        self.reasoning_models
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}
