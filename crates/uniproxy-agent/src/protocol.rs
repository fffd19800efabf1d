//! Panel wire types.
//!
//! The panel speaks plain JSON over HTTP: the directory endpoint returns
//! the full desired account set, the push endpoint accepts a map from
//! account id to `[up, down]` byte counters.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// One subscriber account as owned by the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Stable account identifier.
    pub id: u64,
    /// Opaque secret used both as login identity and password.
    #[serde(rename = "uuid")]
    pub credential: String,
    /// Speed limit as sent by the panel. Carried but not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_limit: Option<serde_json::Value>,
}

impl Account {
    /// Login key of the principal provisioned for this account.
    #[inline]
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Full desired-state snapshot returned by one directory fetch.
///
/// `users` is required: a payload without it is rejected rather than read
/// as "no accounts", which would wipe the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSet {
    pub users: Vec<Account>,
}

impl AccountSet {
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Accounts with duplicate ids removed, first occurrence kept, order preserved.
    pub fn unique(&self) -> Vec<Account> {
        let mut seen = HashSet::with_capacity(self.users.len());
        self.users
            .iter()
            .filter(|a| seen.insert(a.id))
            .cloned()
            .collect()
    }

    /// Login keys of every account in the set.
    pub fn keys(&self) -> HashSet<String> {
        self.users.iter().map(Account::key).collect()
    }
}

/// Usage batch pushed to the panel: account id to `[up, down]`.
///
/// Serializes as `{"42": [100, 200]}`; JSON object keys are the decimal ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageBatch(BTreeMap<u64, [u64; 2]>);

impl UsageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add traffic for an account (additive).
    pub fn add(&mut self, id: u64, up: u64, down: u64) {
        let entry = self.0.entry(id).or_insert([0, 0]);
        entry[0] = entry[0].saturating_add(up);
        entry[1] = entry[1].saturating_add(down);
    }

    pub fn get(&self, id: u64) -> Option<[u64; 2]> {
        self.0.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total `(up, down)` bytes in the batch.
    pub fn totals(&self) -> (u64, u64) {
        self.0.values().fold((0, 0), |(up, down), [u, d]| {
            (up.saturating_add(*u), down.saturating_add(*d))
        })
    }
}
