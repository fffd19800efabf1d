//! Agent error types.

use uniproxy_core::{
    ERROR_CONFIG, ERROR_DECODE, ERROR_PROVISIONING, ERROR_STATUS, ERROR_TRANSPORT,
};

use crate::provision::ProvisionError;

/// Agent error type.
///
/// Every variant except [`AgentError::Provisioning`] aborts the cycle it
/// occurs in. Provisioning errors on a single account are logged and the
/// account is retried on the next cycle.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("panel returned HTTP {0}")]
    Status(u16),

    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("provisioning: {0}")]
    Provisioning(#[from] ProvisionError),
}

impl AgentError {
    /// Create a config error from any displayable value.
    #[inline]
    pub fn config<E: std::fmt::Display>(err: E) -> Self {
        Self::Config(err.to_string())
    }

    /// Stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => ERROR_TRANSPORT,
            Self::Status(_) => ERROR_STATUS,
            Self::Decode(_) => ERROR_DECODE,
            Self::Config(_) => ERROR_CONFIG,
            Self::Provisioning(_) => ERROR_PROVISIONING,
        }
    }
}
