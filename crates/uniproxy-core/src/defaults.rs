//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Panel Defaults
// ============================================================================

/// Default panel base URL.
pub const DEFAULT_API_HOST: &str = "http://127.0.0.1";
/// Default node identifier assigned by the panel.
pub const DEFAULT_NODE_ID: &str = "1";
/// Default node type tag sent to the panel.
pub const DEFAULT_NODE_TYPE: &str = "shadowsocks";
/// Path of the account directory endpoint, relative to the panel host.
pub const USER_ENDPOINT: &str = "/api/v1/server/UniProxy/user";
/// Path of the usage push endpoint, relative to the panel host.
pub const PUSH_ENDPOINT: &str = "/api/v1/server/UniProxy/push";

// ============================================================================
// Scheduling Defaults
// ============================================================================

/// Default interval between reconciliation cycles in seconds.
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;
/// Default interval between traffic pushes in seconds.
pub const DEFAULT_PUSHING_INTERVAL_SECS: u64 = 60;
/// Default per-request timeout for panel HTTP calls in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
/// Default time to wait for in-flight cycles on shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Provisioning Defaults
// ============================================================================

/// Maximum number of provisioning calls in flight during one cycle.
pub const DEFAULT_PROVISION_CONCURRENCY: usize = 10;
/// Login key of the operator principal the agent never touches.
pub const RESERVED_PRINCIPAL: &str = "admin";
/// Default remark of the inbound the agent manages.
pub const DEFAULT_INBOUND_REMARK: &str = "v2board";
/// Default path of the inbound table.
pub const DEFAULT_INBOUND_FILE: &str = "inbounds.toml";
