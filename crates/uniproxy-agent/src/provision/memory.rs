//! In-memory provisioning backend.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    InboundTraffic, Principal, PrincipalRequest, Protocol, ProvisionError, ProvisioningPort,
    TrafficSample, TrafficSnapshot,
};

/// A principal stored by [`MemoryProvisioner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPrincipal {
    pub protocol: Protocol,
    pub identity: String,
    pub secret: String,
    pub cipher: Option<String>,
}

/// A call observed by [`MemoryProvisioner`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Add { tag: String, key: String, identity: String },
    Remove { tag: String, key: String },
}

#[derive(Debug, Default)]
struct State {
    /// tag -> login key -> principal
    inbounds: BTreeMap<String, BTreeMap<String, StoredPrincipal>>,
    /// login key -> (up, down)
    traffic: BTreeMap<String, (u64, u64)>,
    /// tag -> (up, down)
    inbound_traffic: BTreeMap<String, (u64, u64)>,
    calls: Vec<Call>,
    failing_adds: HashSet<String>,
    failing_removes: HashSet<String>,
}

/// Principal table held in process memory.
///
/// Behaves like a proxy control API with strict add/remove semantics
/// (adding an existing key or removing a missing one fails). The agent
/// binary uses it for dry runs; tests use its call log, in-flight
/// high-water mark and failure injection.
#[derive(Debug, Default)]
pub struct MemoryProvisioner {
    state: Mutex<State>,
    latency: Duration,
    open_sessions: AtomicUsize,
    close_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_init: AtomicBool,
}

/// Decrements the in-flight counter on drop.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, high_water: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        high_water.fetch_max(now, Ordering::SeqCst);
        Self(current)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryProvisioner {
    /// Create an empty provisioner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every add/remove call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Insert a principal directly, bypassing the call log.
    pub fn seed(&self, protocol: Protocol, tag: &str, key: &str, identity: &str) {
        let mut state = self.state.lock();
        state.inbounds.entry(tag.to_string()).or_default().insert(
            key.to_string(),
            StoredPrincipal {
                protocol,
                identity: identity.to_string(),
                secret: identity.to_string(),
                cipher: None,
            },
        );
    }

    /// Accumulate traffic for a principal on `tag`.
    pub fn record_traffic(&self, tag: &str, key: &str, up: u64, down: u64) {
        let mut state = self.state.lock();
        let entry = state.traffic.entry(key.to_string()).or_default();
        entry.0 += up;
        entry.1 += down;
        let entry = state.inbound_traffic.entry(tag.to_string()).or_default();
        entry.0 += up;
        entry.1 += down;
    }

    /// Sorted login keys currently on `tag`.
    pub fn keys(&self, tag: &str) -> Vec<String> {
        self.state
            .lock()
            .inbounds
            .get(tag)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The principal stored under `key` on `tag`.
    pub fn principal(&self, tag: &str, key: &str) -> Option<StoredPrincipal> {
        self.state
            .lock()
            .inbounds
            .get(tag)
            .and_then(|m| m.get(key))
            .cloned()
    }

    /// Calls observed so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of add calls observed (including failed ones).
    pub fn add_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Add { .. }))
    }

    /// Number of remove calls observed (including failed ones).
    pub fn remove_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Remove { .. }))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Highest number of add/remove calls seen in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Make `init` fail.
    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Make every add of `key` fail with a backend error.
    pub fn fail_add_for(&self, key: &str) {
        self.state.lock().failing_adds.insert(key.to_string());
    }

    /// Make every removal of `key` fail with a backend error.
    pub fn fail_remove_for(&self, key: &str) {
        self.state.lock().failing_removes.insert(key.to_string());
    }

    /// Clear injected add/remove failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_adds.clear();
        state.failing_removes.clear();
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ProvisioningPort for MemoryProvisioner {
    async fn init(&self) -> Result<(), ProvisionError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(ProvisionError::backend("control channel refused"));
        }
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }

    async fn add_principal(
        &self,
        protocol: &Protocol,
        tag: &str,
        request: &PrincipalRequest,
    ) -> Result<(), ProvisionError> {
        let _flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.delay().await;

        let mut state = self.state.lock();
        state.calls.push(Call::Add {
            tag: tag.to_string(),
            key: request.key.clone(),
            identity: request.identity.clone(),
        });
        if state.failing_adds.contains(&request.key) {
            return Err(ProvisionError::Backend(format!(
                "add `{}` rejected",
                request.key
            )));
        }
        let principals = state.inbounds.entry(tag.to_string()).or_default();
        if principals.contains_key(&request.key) {
            return Err(ProvisionError::AlreadyExists(request.key.clone()));
        }
        principals.insert(
            request.key.clone(),
            StoredPrincipal {
                protocol: protocol.clone(),
                identity: request.identity.clone(),
                secret: request.secret.clone(),
                cipher: request.cipher.clone(),
            },
        );
        Ok(())
    }

    async fn remove_principal(&self, tag: &str, key: &str) -> Result<(), ProvisionError> {
        let _flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.delay().await;

        let mut state = self.state.lock();
        state.calls.push(Call::Remove {
            tag: tag.to_string(),
            key: key.to_string(),
        });
        if state.failing_removes.contains(key) {
            return Err(ProvisionError::Backend(format!("remove `{key}` rejected")));
        }
        match state.inbounds.get_mut(tag).and_then(|m| m.remove(key)) {
            Some(_) => Ok(()),
            None => Err(ProvisionError::NotFound(key.to_string())),
        }
    }

    async fn list_principals(&self, tag: &str) -> Result<Vec<Principal>, ProvisionError> {
        let state = self.state.lock();
        Ok(state
            .inbounds
            .get(tag)
            .map(|m| {
                m.iter()
                    .map(|(key, p)| Principal {
                        key: key.clone(),
                        identity: p.identity.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_traffic(&self, reset: bool) -> Result<TrafficSnapshot, ProvisionError> {
        let mut state = self.state.lock();
        let (traffic, inbound_traffic) = if reset {
            (
                std::mem::take(&mut state.traffic),
                std::mem::take(&mut state.inbound_traffic),
            )
        } else {
            (state.traffic.clone(), state.inbound_traffic.clone())
        };
        Ok(TrafficSnapshot {
            inbounds: inbound_traffic
                .into_iter()
                .map(|(tag, (up, down))| InboundTraffic { tag, up, down })
                .collect(),
            principals: traffic
                .into_iter()
                .map(|(key, (up, down))| TrafficSample { key, up, down })
                .collect(),
        })
    }
}
