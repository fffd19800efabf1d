//! uniproxy node agent: keeps the local proxy's principals in line with a
//! UniProxy panel and reports per-account traffic back.
//!
//! # Usage
//!
//! ```bash
//! API_HOST=https://panel.example.com API_KEY=... NODE_ID=6 NODE_TYPE=vless \
//!     uniproxy agent --inbound-file inbounds.toml
//! ```
//!
//! One Full reconciliation runs at startup; afterwards the agent polls the
//! panel every `NODE_POLLING_INTERVAL` seconds and pushes traffic every
//! `NODE_PUSHING_INTERVAL` seconds.

pub mod cache;
pub mod cli;
pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod guard;
pub mod inbound;
pub mod protocol;
pub mod provision;
pub mod reporter;
pub mod scheduler;
pub mod sync;

pub use cli::{AgentArgs, UsersArgs};
pub use error::AgentError;
pub use sync::{CycleReport, SyncEngine, SyncMode};
