//! Inbound lookup and typed inbound settings.
//!
//! The agent manages principals on exactly one inbound, found by its
//! remark. The lookup itself is a collaborator ([`InboundResolver`]); the
//! bundled [`InboundTable`] reads a TOML file:
//!
//! ```toml
//! [[inbound]]
//! remark = "v2board"
//! tag = "inbound-8388"
//! protocol = "shadowsocks"
//! settings = '{"method": "aes-256-gcm", "clients": []}'
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::AgentError;
use crate::provision::Protocol;

/// One inbound as stored by the proxy's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Inbound {
    /// Lookup name.
    pub remark: String,
    /// Proxy-side tag principals are attached to.
    pub tag: String,
    pub protocol: Protocol,
    /// Protocol settings as a JSON document.
    #[serde(default = "empty_settings")]
    pub settings: String,
}

fn empty_settings() -> String {
    "{}".to_string()
}

/// Decoded per-protocol settings the agent needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundSettings {
    /// Shadowsocks principals carry the inbound's cipher method.
    Shadowsocks { method: String },
    /// No protocol-specific fields are needed.
    Plain,
}

impl InboundSettings {
    /// Cipher to put in provisioning requests, if any.
    pub fn cipher(&self) -> Option<&str> {
        match self {
            Self::Shadowsocks { method } => Some(method.as_str()),
            Self::Plain => None,
        }
    }
}

#[derive(Deserialize)]
struct ShadowsocksSettings {
    method: String,
}

impl Inbound {
    /// Decode the settings document.
    ///
    /// Settings must be a JSON object. Shadowsocks inbounds must carry a
    /// string `method`.
    pub fn decode_settings(&self) -> Result<InboundSettings, AgentError> {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&self.settings).map_err(|e| {
                AgentError::Config(format!(
                    "inbound `{}` settings are not a JSON object: {e}",
                    self.remark
                ))
            })?;

        match self.protocol {
            Protocol::Shadowsocks => {
                let ss: ShadowsocksSettings =
                    serde_json::from_value(serde_json::Value::Object(map)).map_err(|e| {
                        AgentError::Config(format!(
                            "inbound `{}` has no usable shadowsocks method: {e}",
                            self.remark
                        ))
                    })?;
                Ok(InboundSettings::Shadowsocks { method: ss.method })
            }
            _ => Ok(InboundSettings::Plain),
        }
    }
}

/// Looks up the inbound the agent manages.
#[async_trait]
pub trait InboundResolver: Send + Sync {
    /// Find the inbound with the given remark.
    async fn resolve(&self, remark: &str) -> Result<Inbound, AgentError>;
}

/// Inbounds keyed by remark.
#[derive(Debug, Clone, Default)]
pub struct InboundTable {
    inbounds: HashMap<String, Inbound>,
}

#[derive(Deserialize)]
struct InboundFile {
    #[serde(default)]
    inbound: Vec<Inbound>,
}

impl InboundTable {
    /// Build a table from a list of inbounds. Later remarks replace earlier ones.
    pub fn from_inbounds<I: IntoIterator<Item = Inbound>>(inbounds: I) -> Self {
        Self {
            inbounds: inbounds
                .into_iter()
                .map(|i| (i.remark.clone(), i))
                .collect(),
        }
    }

    /// Parse a TOML document with `[[inbound]]` entries.
    pub fn from_toml(data: &str) -> Result<Self, AgentError> {
        let file: InboundFile = toml::from_str(data).map_err(AgentError::config)?;
        Ok(Self::from_inbounds(file.inbound))
    }

    /// Load a TOML inbound file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("failed to read inbound file {}: {e}", path.display()))
        })?;
        let table = Self::from_toml(&data)?;
        debug!(path = %path.display(), count = table.len(), "loaded inbound table");
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.inbounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inbounds.is_empty()
    }
}

#[async_trait]
impl InboundResolver for InboundTable {
    async fn resolve(&self, remark: &str) -> Result<Inbound, AgentError> {
        self.inbounds
            .get(remark)
            .cloned()
            .ok_or_else(|| AgentError::Config(format!("inbound `{remark}` not found")))
    }
}
