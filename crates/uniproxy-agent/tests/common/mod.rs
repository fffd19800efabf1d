//! Shared fixtures for agent integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uniproxy_agent::AgentError;
use uniproxy_agent::SyncEngine;
use uniproxy_agent::client::{AccountDirectory, UsageSink};
use uniproxy_agent::inbound::{Inbound, InboundTable};
use uniproxy_agent::protocol::{Account, AccountSet, UsageBatch};
use uniproxy_agent::provision::{MemoryProvisioner, Protocol};

pub const REMARK: &str = "v2board";
pub const TAG: &str = "inbound-443";

// ============================================================================
// Panel Fakes
// ============================================================================

/// Directory returning a settable account set, or a settable HTTP failure.
#[derive(Default)]
pub struct StaticDirectory {
    accounts: Mutex<AccountSet>,
    failure: Mutex<Option<u16>>,
    fetches: AtomicUsize,
}

impl StaticDirectory {
    pub fn new(accounts: AccountSet) -> Self {
        Self {
            accounts: Mutex::new(accounts),
            ..Default::default()
        }
    }

    pub fn set(&self, accounts: AccountSet) {
        *self.accounts.lock() = accounts;
    }

    pub fn fail_with_status(&self, status: Option<u16>) {
        *self.failure.lock() = status;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn fetch_accounts(&self) -> Result<AccountSet, AgentError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.failure.lock() {
            return Err(AgentError::Status(status));
        }
        Ok(self.accounts.lock().clone())
    }
}

/// Sink that records every batch it receives.
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<UsageBatch>>,
}

impl RecordingSink {
    pub fn batches(&self) -> Vec<UsageBatch> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl UsageSink for RecordingSink {
    async fn push_usage(&self, batch: &UsageBatch) -> Result<(), AgentError> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn accounts(entries: &[(u64, &str)]) -> AccountSet {
    AccountSet {
        users: entries
            .iter()
            .map(|(id, uuid)| Account {
                id: *id,
                credential: uuid.to_string(),
                speed_limit: None,
            })
            .collect(),
    }
}

pub fn vless_inbounds() -> InboundTable {
    InboundTable::from_inbounds([Inbound {
        remark: REMARK.into(),
        tag: TAG.into(),
        protocol: Protocol::Vless,
        settings: r#"{"clients":[],"decryption":"none"}"#.into(),
    }])
}

pub fn shadowsocks_inbounds(settings: &str) -> InboundTable {
    InboundTable::from_inbounds([Inbound {
        remark: REMARK.into(),
        tag: TAG.into(),
        protocol: Protocol::Shadowsocks,
        settings: settings.into(),
    }])
}

pub fn engine(directory: Arc<StaticDirectory>, port: Arc<MemoryProvisioner>) -> SyncEngine {
    SyncEngine::new(directory, Arc::new(vless_inbounds()), port, REMARK)
}

pub fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}
