//! Agent configuration.
//!
//! Every setting comes from a command-line flag with an environment
//! variable fallback and a default, so the agent runs with no config file
//! beyond the inbound table.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use uniproxy_core::{
    DEFAULT_API_HOST, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_INBOUND_FILE, DEFAULT_INBOUND_REMARK,
    DEFAULT_NODE_ID, DEFAULT_NODE_TYPE, DEFAULT_POLLING_INTERVAL_SECS,
    DEFAULT_PUSHING_INTERVAL_SECS,
};

use crate::error::AgentError;

/// Panel connection settings.
#[derive(Args, Clone)]
pub struct PanelConfig {
    /// Panel base URL.
    #[arg(long, env = "API_HOST", default_value = DEFAULT_API_HOST)]
    pub api_host: String,

    /// Node token issued by the panel.
    #[arg(long, env = "API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Node identifier assigned by the panel.
    #[arg(long, env = "NODE_ID", default_value = DEFAULT_NODE_ID)]
    pub node_id: String,

    /// Node type tag (e.g. "shadowsocks", "vless").
    #[arg(long, env = "NODE_TYPE", default_value = DEFAULT_NODE_TYPE)]
    pub node_type: String,

    /// Per-request timeout for panel calls, in seconds.
    #[arg(
        long = "http-timeout",
        env = "HTTP_TIMEOUT",
        default_value_t = DEFAULT_HTTP_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_secs: u64,
}

impl PanelConfig {
    /// Per-request timeout.
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), AgentError> {
        let url = reqwest::Url::parse(&self.api_host)
            .map_err(|e| AgentError::Config(format!("invalid API_HOST `{}`: {e}", self.api_host)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AgentError::Config(format!(
                "API_HOST must be http or https, got `{}`",
                url.scheme()
            )));
        }
        if self.node_id.trim().is_empty() {
            return Err(AgentError::config("NODE_ID must not be empty"));
        }
        if self.node_type.trim().is_empty() {
            return Err(AgentError::config("NODE_TYPE must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for PanelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelConfig")
            .field("api_host", &self.api_host)
            .field("api_key", &"<redacted>")
            .field("node_id", &self.node_id)
            .field("node_type", &self.node_type)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Periodic activity intervals.
#[derive(Args, Debug, Clone)]
pub struct ScheduleConfig {
    /// Seconds between reconciliation cycles.
    #[arg(
        long = "polling-interval",
        env = "NODE_POLLING_INTERVAL",
        default_value_t = DEFAULT_POLLING_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub polling_interval_secs: u64,

    /// Seconds between traffic pushes.
    #[arg(
        long = "pushing-interval",
        env = "NODE_PUSHING_INTERVAL",
        default_value_t = DEFAULT_PUSHING_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub pushing_interval_secs: u64,
}

impl ScheduleConfig {
    #[inline]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    #[inline]
    pub fn pushing_interval(&self) -> Duration {
        Duration::from_secs(self.pushing_interval_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            pushing_interval_secs: DEFAULT_PUSHING_INTERVAL_SECS,
        }
    }
}

/// Full agent configuration.
#[derive(Args, Debug, Clone)]
pub struct AgentConfig {
    #[command(flatten)]
    pub panel: PanelConfig,

    #[command(flatten)]
    pub schedule: ScheduleConfig,

    /// TOML file describing the local inbounds.
    #[arg(long, env = "INBOUND_FILE", default_value = DEFAULT_INBOUND_FILE)]
    pub inbound_file: PathBuf,

    /// Remark of the inbound whose principals are managed.
    #[arg(long, env = "INBOUND_REMARK", default_value = DEFAULT_INBOUND_REMARK)]
    pub inbound_remark: String,

    /// Prometheus listen address (e.g. "127.0.0.1:9100"). Disabled when unset.
    #[arg(long, env = "METRICS_LISTEN")]
    pub metrics_listen: Option<String>,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        self.panel.validate()?;
        if self.inbound_remark.trim().is_empty() {
            return Err(AgentError::config("INBOUND_REMARK must not be empty"));
        }
        Ok(())
    }
}
