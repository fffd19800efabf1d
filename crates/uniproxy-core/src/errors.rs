//! Error type constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// Network or HTTP transport failure talking to the panel.
pub const ERROR_TRANSPORT: &str = "transport";
/// Panel answered with an unexpected HTTP status.
pub const ERROR_STATUS: &str = "status";
/// Panel payload could not be decoded.
pub const ERROR_DECODE: &str = "decode";
/// Inbound or settings could not be resolved.
pub const ERROR_CONFIG: &str = "config";
/// Proxy control call failed.
pub const ERROR_PROVISIONING: &str = "provisioning";
