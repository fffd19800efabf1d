//! Proxy control surface consumed by the agent.
//!
//! [`ProvisioningPort`] abstracts the local proxy server's user and traffic
//! API. A cycle opens one [`ProvisionSession`] and every call goes through
//! it; the session is closed when the last handle is dropped, on every
//! exit path.

mod memory;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::{Call, MemoryProvisioner, StoredPrincipal};

/// Errors returned by a provisioning backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    /// The principal does not exist on the target.
    #[error("principal `{0}` not found")]
    NotFound(String),

    /// A principal with the same key already exists on the target.
    #[error("principal `{0}` already exists")]
    AlreadyExists(String),

    /// Backend error (control API unreachable, rejected call, etc.).
    #[error("backend error: {0}")]
    Backend(String),
}

impl ProvisionError {
    /// Create a backend error from any error type.
    #[inline]
    pub fn backend<E: fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Inbound protocol family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
    Other(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Vmess => "vmess",
            Self::Vless => "vless",
            Self::Trojan => "trojan",
            Self::Shadowsocks => "shadowsocks",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "vmess" => Self::Vmess,
            "vless" => Self::Vless,
            "trojan" => Self::Trojan,
            "shadowsocks" => Self::Shadowsocks,
            _ => Self::Other(s),
        }
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of a principal to create on an inbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalRequest {
    /// Login key (the proxy's "email"), derived from the account id.
    pub key: String,
    /// Principal identity (uuid for vmess/vless).
    pub identity: String,
    /// Password (trojan/shadowsocks).
    pub secret: String,
    /// Cipher method, set only for shadowsocks inbounds.
    pub cipher: Option<String>,
}

/// An active principal as reported by the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub key: String,
    pub identity: String,
}

/// Accumulated counters for one principal since the last reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSample {
    pub key: String,
    pub up: u64,
    pub down: u64,
}

/// Accumulated counters for one inbound tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTraffic {
    pub tag: String,
    pub up: u64,
    pub down: u64,
}

/// Result of one traffic read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub inbounds: Vec<InboundTraffic>,
    pub principals: Vec<TrafficSample>,
}

/// Control surface of the local proxy server.
///
/// Implementations must be thread-safe (`Send + Sync`); a cycle issues up to
/// the provisioning concurrency limit of calls at once.
#[async_trait]
pub trait ProvisioningPort: Send + Sync {
    /// Open the control channel.
    async fn init(&self) -> Result<(), ProvisionError>;

    /// Close the control channel. Called once per successful `init`.
    fn close(&self);

    /// Create a principal on the inbound `tag`.
    async fn add_principal(
        &self,
        protocol: &Protocol,
        tag: &str,
        request: &PrincipalRequest,
    ) -> Result<(), ProvisionError>;

    /// Remove the principal with login `key` from inbound `tag`.
    async fn remove_principal(&self, tag: &str, key: &str) -> Result<(), ProvisionError>;

    /// List active principals on inbound `tag`.
    async fn list_principals(&self, tag: &str) -> Result<Vec<Principal>, ProvisionError>;

    /// Read traffic counters, resetting them when `reset` is true.
    async fn read_traffic(&self, reset: bool) -> Result<TrafficSnapshot, ProvisionError>;
}

/// Scoped provisioning session.
///
/// Calls `init` on open and `close` on drop. Share it with workers through
/// an `Arc`; the channel closes once every clone is gone.
pub struct ProvisionSession {
    port: Arc<dyn ProvisioningPort>,
}

impl ProvisionSession {
    /// Initialize the port and return a guard that closes it on drop.
    pub async fn open(port: Arc<dyn ProvisioningPort>) -> Result<Self, ProvisionError> {
        port.init().await?;
        Ok(Self { port })
    }
}

impl Deref for ProvisionSession {
    type Target = dyn ProvisioningPort;

    fn deref(&self) -> &Self::Target {
        self.port.as_ref()
    }
}

impl Drop for ProvisionSession {
    fn drop(&mut self) {
        self.port.close();
    }
}

// Cannot derive Debug due to dyn ProvisioningPort
impl fmt::Debug for ProvisionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionSession").finish_non_exhaustive()
    }
}
