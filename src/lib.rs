//! # uniproxy
//!
//! Node-side synchronization between a UniProxy panel and the local proxy
//! server.
//!
//! ## Crates
//!
//! - [`uniproxy_core`] - Default values and shared constants
//! - [`uniproxy_metrics`] - Prometheus-compatible metrics
//! - [`uniproxy_agent`] - Reconciliation engine, traffic reporter and scheduler

pub use uniproxy_agent as agent;
pub use uniproxy_core as core;
pub use uniproxy_metrics as metrics;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use uniproxy_agent::client::{AccountDirectory, PanelClient, UsageSink};
    pub use uniproxy_agent::inbound::{InboundResolver, InboundTable};
    pub use uniproxy_agent::provision::{MemoryProvisioner, ProvisioningPort};
    pub use uniproxy_agent::reporter::TrafficReporter;
    pub use uniproxy_agent::scheduler::Scheduler;
    pub use uniproxy_agent::{AgentError, SyncEngine, SyncMode};
}
