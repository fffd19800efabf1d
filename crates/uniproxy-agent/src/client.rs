//! Panel HTTP client: fetches the desired account set and pushes usage.
//!
//! Both endpoints authenticate with the same three query parameters
//! (`token`, `node_type`, `node_id`). Every request carries the configured
//! timeout.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use uniproxy_core::{PUSH_ENDPOINT, USER_ENDPOINT};

use crate::config::PanelConfig;
use crate::error::AgentError;
use crate::protocol::{AccountSet, UsageBatch};

/// Source of the desired account set.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Fetch the full account set. Never returns a partial read.
    async fn fetch_accounts(&self) -> Result<AccountSet, AgentError>;
}

/// Destination of usage batches.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Push one batch. Anything other than a confirmed delivery is an error.
    async fn push_usage(&self, batch: &UsageBatch) -> Result<(), AgentError>;
}

/// HTTP client for the panel's UniProxy endpoints.
pub struct PanelClient {
    client: Client,
    user_url: String,
    push_url: String,
    token: String,
    node_type: String,
    node_id: String,
}

impl PanelClient {
    /// Create a client from panel settings.
    pub fn new(config: &PanelConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("uniproxy/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create with a custom reqwest [`Client`] (for proxies, TLS roots, etc.).
    pub fn with_client(client: Client, config: &PanelConfig) -> Self {
        let base = config.api_host.trim_end_matches('/');
        Self {
            client,
            user_url: format!("{base}{USER_ENDPOINT}"),
            push_url: format!("{base}{PUSH_ENDPOINT}"),
            token: config.api_key.clone(),
            node_type: config.node_type.clone(),
            node_id: config.node_id.clone(),
        }
    }

    fn auth_query(&self) -> [(&'static str, &str); 3] {
        [
            ("token", self.token.as_str()),
            ("node_type", self.node_type.as_str()),
            ("node_id", self.node_id.as_str()),
        ]
    }
}

// Hand-written to keep the token out of logs.
impl fmt::Debug for PanelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelClient")
            .field("user_url", &self.user_url)
            .field("push_url", &self.push_url)
            .field("node_type", &self.node_type)
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AccountDirectory for PanelClient {
    async fn fetch_accounts(&self) -> Result<AccountSet, AgentError> {
        let resp = self
            .client
            .get(&self.user_url)
            .query(&self.auth_query()[..])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::Status(status.as_u16()));
        }

        let body = resp.bytes().await?;
        let accounts: AccountSet = serde_json::from_slice(&body)?;
        debug!(count = accounts.len(), "fetched account set");
        Ok(accounts)
    }
}

#[async_trait]
impl UsageSink for PanelClient {
    async fn push_usage(&self, batch: &UsageBatch) -> Result<(), AgentError> {
        let resp = self
            .client
            .post(&self.push_url)
            .query(&self.auth_query()[..])
            .json(batch)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => {
                debug!(accounts = batch.len(), "usage batch accepted");
                Ok(())
            }
            other => Err(AgentError::Status(other.as_u16())),
        }
    }
}
