mod file_config;

pub use file_config::{FileConfig, ReconnectConfig};

use crate::notifications::UserId;
use crate::tracker::{RetryPolicy, TrackerSettings};
use anyhow::{bail, Context, Result};
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub recipient_id: Option<String>,
    pub resync_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendSettings,
    /// Signed-in user. `None` runs signed out.
    pub recipient_id: Option<UserId>,
    /// 0 disables periodic resync.
    pub resync_interval_secs: u64,
    pub reconnect: ReconnectSettings,
}

/// Where and how to reach the notification backend.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Base URL without trailing slash, e.g. `https://project.example.co`.
    pub base_url: String,
    pub api_key: String,
    /// User session token; the API key is sent as bearer when absent.
    pub access_token: Option<String>,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
}

impl BackendSettings {
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_baseline_retries: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            max_baseline_retries: 8,
        }
    }
}

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 25;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let backend_url = file
            .backend_url
            .or_else(|| cli.backend_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("backend_url must be specified via --backend-url or in config file")
            })?;
        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            bail!("backend_url must be an http(s) URL: {}", backend_url);
        }
        let base_url = backend_url.trim_end_matches('/').to_string();

        let api_key = file
            .api_key
            .or_else(|| cli.api_key.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("api_key must be specified via --api-key or in config file")
            })?;
        if api_key.trim().is_empty() {
            bail!("api_key must not be empty");
        }

        let access_token = file
            .access_token
            .or_else(|| cli.access_token.clone())
            .filter(|token| !token.trim().is_empty());

        let recipient_id = match file
            .recipient_id
            .or_else(|| cli.recipient_id.clone())
            .filter(|id| !id.trim().is_empty())
        {
            Some(id) => Some(
                UserId::parse_uuid(&id)
                    .with_context(|| format!("recipient_id is not a valid UUID: {}", id))?,
            ),
            None => None,
        };

        let resync_interval_secs = file
            .resync_interval_secs
            .unwrap_or(cli.resync_interval_secs);

        let heartbeat_interval_secs = file
            .heartbeat_interval_secs
            .unwrap_or(cli.heartbeat_interval_secs);
        if heartbeat_interval_secs == 0 {
            bail!("heartbeat_interval_secs must be greater than 0");
        }
        let request_timeout_secs = file
            .request_timeout_secs
            .unwrap_or(cli.request_timeout_secs);
        if request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than 0");
        }

        // Reconnect settings - merge file config with defaults
        let defaults = ReconnectSettings::default();
        let rc_file = file.reconnect.unwrap_or_default();
        let reconnect = ReconnectSettings {
            initial_backoff_ms: rc_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: rc_file.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: rc_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            max_baseline_retries: rc_file
                .max_baseline_retries
                .unwrap_or(defaults.max_baseline_retries),
        };
        if reconnect.backoff_multiplier.is_nan() || reconnect.backoff_multiplier < 1.0 {
            bail!(
                "reconnect.backoff_multiplier must be at least 1.0, got {}",
                reconnect.backoff_multiplier
            );
        }
        if reconnect.initial_backoff_ms > reconnect.max_backoff_ms {
            bail!(
                "reconnect.initial_backoff_ms ({}) exceeds reconnect.max_backoff_ms ({})",
                reconnect.initial_backoff_ms,
                reconnect.max_backoff_ms
            );
        }

        Ok(Self {
            backend: BackendSettings {
                base_url,
                api_key,
                access_token,
                heartbeat_interval: Duration::from_secs(heartbeat_interval_secs),
                request_timeout: Duration::from_secs(request_timeout_secs),
            },
            recipient_id,
            resync_interval_secs,
            reconnect,
        })
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            retry: RetryPolicy::new(&self.reconnect),
            resync_interval: (self.resync_interval_secs > 0)
                .then(|| Duration::from_secs(self.resync_interval_secs)),
        }
    }
}
