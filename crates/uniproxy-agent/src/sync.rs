//! Reconciliation engine.
//!
//! One cycle drives the proxy's principals on the managed inbound toward
//! the panel's account set:
//!
//! 1. fetch the account set and resolve the inbound (any error aborts
//!    before the proxy is touched)
//! 2. open a provisioning session, closed on every exit path
//! 3. Full mode: remove every principal except the reserved one
//! 4. align the cache with the principals actually live on the proxy
//! 5. dedupe accounts by id and provision each one on a bounded pool,
//!    rotating principals whose credential changed
//! 6. Incremental mode: remove principals the panel no longer lists
//!
//! Individual provisioning failures are logged and left for the next cycle.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uniproxy_core::{DEFAULT_PROVISION_CONCURRENCY, RESERVED_PRINCIPAL};
use uniproxy_metrics::{
    record_error, record_principal_added, record_principal_removed, record_provision_failure,
    record_sync_cycle, record_sync_skipped, set_desired_accounts,
};

use crate::cache::LocalStateCache;
use crate::client::AccountDirectory;
use crate::error::AgentError;
use crate::guard::RunGuard;
use crate::inbound::InboundResolver;
use crate::protocol::{Account, AccountSet};
use crate::provision::{
    PrincipalRequest, Protocol, ProvisionError, ProvisionSession, ProvisioningPort,
};

/// Reconciliation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Wipe every principal, then provision the whole account set.
    Full,
    /// Provision what is missing and remove what the panel dropped.
    Incremental,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub mode: SyncMode,
    /// Accounts returned by the panel, duplicates included.
    pub fetched: usize,
    /// Accounts after deduplication.
    pub unique: usize,
    /// Principals created (rotations included).
    pub added: usize,
    /// Principals re-created because their credential changed.
    pub rotated: usize,
    /// Accounts already provisioned with the current credential.
    pub satisfied: usize,
    /// Accounts left unresolved after a provisioning error.
    pub failed: usize,
    /// Principals removed by the wipe or the stale pass.
    pub removed: usize,
}

impl CycleReport {
    fn new(mode: SyncMode, fetched: usize) -> Self {
        Self {
            mode,
            fetched,
            unique: 0,
            added: 0,
            rotated: 0,
            satisfied: 0,
            failed: 0,
            removed: 0,
        }
    }
}

/// Where and how principals are created during one cycle.
#[derive(Debug)]
struct Target {
    tag: String,
    protocol: Protocol,
    cipher: Option<String>,
}

impl Target {
    fn request(&self, key: &str, credential: &str) -> PrincipalRequest {
        PrincipalRequest {
            key: key.to_string(),
            identity: credential.to_string(),
            secret: credential.to_string(),
            cipher: self.cipher.clone(),
        }
    }
}

enum Provisioned {
    Satisfied,
    Added { rotated: bool },
    Failed,
}

/// Mirrors the panel's account set into the local proxy.
pub struct SyncEngine {
    directory: Arc<dyn AccountDirectory>,
    inbounds: Arc<dyn InboundResolver>,
    port: Arc<dyn ProvisioningPort>,
    inbound_remark: String,
    cache: LocalStateCache,
    concurrency: usize,
    running: AtomicBool,
    baseline: AtomicBool,
    skipped: AtomicU64,
}

impl SyncEngine {
    /// Create an engine managing the inbound named `inbound_remark`.
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        inbounds: Arc<dyn InboundResolver>,
        port: Arc<dyn ProvisioningPort>,
        inbound_remark: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            inbounds,
            port,
            inbound_remark: inbound_remark.into(),
            cache: LocalStateCache::new(),
            concurrency: DEFAULT_PROVISION_CONCURRENCY,
            running: AtomicBool::new(false),
            baseline: AtomicBool::new(false),
            skipped: AtomicU64::new(0),
        }
    }

    /// Set the maximum number of provisioning calls in flight (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Use an existing cache instead of a fresh one.
    pub fn with_cache(mut self, cache: LocalStateCache) -> Self {
        self.cache = cache;
        self
    }

    /// The reconciliation cache.
    #[inline]
    pub fn cache(&self) -> &LocalStateCache {
        &self.cache
    }

    /// Whether a Full cycle has completed.
    #[inline]
    pub fn has_baseline(&self) -> bool {
        self.baseline.load(Ordering::Acquire)
    }

    /// Mode for the next periodic tick: Full until a Full cycle completes.
    pub fn scheduled_mode(&self) -> SyncMode {
        if self.has_baseline() {
            SyncMode::Incremental
        } else {
            SyncMode::Full
        }
    }

    /// Ticks skipped because a cycle was already running.
    #[inline]
    pub fn skipped_cycles(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Run one cycle unless another is in progress.
    ///
    /// Returns `None` when skipped.
    pub async fn try_run(&self, mode: SyncMode) -> Option<Result<CycleReport, AgentError>> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            record_sync_skipped();
            warn!(%mode, skipped, "previous sync cycle still running, skipping");
            return None;
        };

        let start = Instant::now();
        let result = self.run_cycle(mode).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(_) => {
                record_sync_cycle(mode.as_str(), "ok", elapsed);
                if mode == SyncMode::Full {
                    self.baseline.store(true, Ordering::Release);
                }
            }
            Err(e) => {
                record_sync_cycle(mode.as_str(), "aborted", elapsed);
                record_error(e.kind());
            }
        }
        Some(result)
    }

    async fn run_cycle(&self, mode: SyncMode) -> Result<CycleReport, AgentError> {
        let accounts = self.directory.fetch_accounts().await?;
        debug!(%mode, count = accounts.len(), "fetched accounts from panel");

        let inbound = self.inbounds.resolve(&self.inbound_remark).await?;
        let settings = inbound.decode_settings()?;
        let target = Arc::new(Target {
            cipher: settings.cipher().map(str::to_owned),
            tag: inbound.tag,
            protocol: inbound.protocol,
        });

        let session = Arc::new(ProvisionSession::open(self.port.clone()).await?);
        let mut report = CycleReport::new(mode, accounts.len());

        if mode == SyncMode::Full {
            report.removed += self.wipe(&session, &target.tag).await?;
        }
        self.align_cache(&session, &target.tag).await?;

        let unique = accounts.unique();
        report.unique = unique.len();
        set_desired_accounts(unique.len());
        self.provision_all(&session, &target, unique, &mut report)
            .await;

        if mode == SyncMode::Incremental {
            report.removed += self.remove_stale(&session, &target.tag, &accounts).await?;
        }

        Ok(report)
    }

    /// Remove every principal except the reserved one and reset the cache.
    async fn wipe(&self, session: &ProvisionSession, tag: &str) -> Result<usize, AgentError> {
        let live = session.list_principals(tag).await?;
        let mut removed = 0;

        for principal in live.iter().filter(|p| p.key != RESERVED_PRINCIPAL) {
            match session.remove_principal(tag, &principal.key).await {
                Ok(()) => {
                    removed += 1;
                    record_principal_removed("wipe");
                }
                Err(ProvisionError::NotFound(_)) => {}
                Err(e) => {
                    record_provision_failure("remove");
                    warn!(key = %principal.key, error = %e, "failed to remove principal during full sync");
                }
            }
        }

        self.cache.clear().await;
        info!(tag, live = live.len(), removed, "cleared principals for full sync");
        Ok(removed)
    }

    /// Make the cache agree with the principals live on the proxy.
    ///
    /// Entries whose principal is gone are dropped so the account is added
    /// again. Live principals without an entry are adopted with their live
    /// identity, so a differing credential is rotated rather than colliding
    /// with the existing principal on add.
    async fn align_cache(&self, session: &ProvisionSession, tag: &str) -> Result<(), AgentError> {
        let live: HashMap<String, String> = session
            .list_principals(tag)
            .await?
            .into_iter()
            .filter(|p| p.key != RESERVED_PRINCIPAL)
            .map(|p| (p.key, p.identity))
            .collect();

        let mut entries = self.cache.lock().await;
        let before = entries.len();
        entries.retain(|key, _| live.contains_key(key));
        let dropped = before - entries.len();

        let mut adopted = 0;
        for (key, identity) in live {
            if let Entry::Vacant(slot) = entries.entry(key) {
                slot.insert(identity);
                adopted += 1;
            }
        }

        if dropped > 0 || adopted > 0 {
            info!(tag, dropped, adopted, "aligned cache with live principals");
        }
        Ok(())
    }

    async fn provision_all(
        &self,
        session: &Arc<ProvisionSession>,
        target: &Arc<Target>,
        accounts: Vec<Account>,
        report: &mut CycleReport,
    ) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for account in accounts {
            // Waits while the pool is saturated.
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let session = session.clone();
            let target = target.clone();
            let cache = self.cache.clone();
            workers.spawn(async move {
                let _permit = permit;
                provision(&session, &cache, &target, account).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Provisioned::Satisfied) => report.satisfied += 1,
                Ok(Provisioned::Added { rotated }) => {
                    report.added += 1;
                    if rotated {
                        report.rotated += 1;
                    }
                }
                Ok(Provisioned::Failed) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "provisioning worker panicked");
                }
            }
        }
    }

    /// Remove principals whose key is absent from the account set.
    async fn remove_stale(
        &self,
        session: &ProvisionSession,
        tag: &str,
        accounts: &AccountSet,
    ) -> Result<usize, AgentError> {
        let desired = accounts.keys();
        let live = session.list_principals(tag).await?;
        let mut removed = 0;

        for principal in live
            .iter()
            .filter(|p| p.key != RESERVED_PRINCIPAL && !desired.contains(&p.key))
        {
            match session.remove_principal(tag, &principal.key).await {
                Ok(()) => {
                    removed += 1;
                    record_principal_removed("stale");
                    info!(key = %principal.key, "removed principal no longer listed by panel");
                }
                Err(ProvisionError::NotFound(_)) => {}
                Err(e) => {
                    record_provision_failure("remove");
                    warn!(key = %principal.key, error = %e, "failed to remove stale principal");
                }
            }
        }

        self.cache.lock().await.retain(|key, _| desired.contains(key));
        Ok(removed)
    }
}

/// Bring one account in line with the cache and the proxy.
///
/// Keys are unique within a cycle and cycles never overlap, so no other
/// worker touches `key` between the check and the final insert. The cache
/// lock is only held for the lookup and the updates, never across a call
/// to the proxy.
async fn provision(
    session: &ProvisionSession,
    cache: &LocalStateCache,
    target: &Target,
    account: Account,
) -> Provisioned {
    let key = account.key();

    let rotated = match cache.get(&key).await {
        Some(credential) if credential == account.credential => return Provisioned::Satisfied,
        Some(_) => {
            match session.remove_principal(&target.tag, &key).await {
                Ok(()) => record_principal_removed("rotate"),
                Err(ProvisionError::NotFound(_)) => {}
                Err(e) => {
                    record_provision_failure("remove");
                    warn!(%key, error = %e, "failed to remove principal with rotated credential");
                    return Provisioned::Failed;
                }
            }
            cache.remove(&key).await;
            true
        }
        None => false,
    };

    let request = target.request(&key, &account.credential);
    if let Err(e) = session
        .add_principal(&target.protocol, &target.tag, &request)
        .await
    {
        record_provision_failure("add");
        warn!(%key, error = %e, "failed to add principal");
        return Provisioned::Failed;
    }

    record_principal_added();
    debug!(%key, rotated, "principal provisioned");
    cache.insert(key, account.credential).await;
    Provisioned::Added { rotated }
}

// Cannot derive Debug due to dyn collaborators
impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("inbound_remark", &self.inbound_remark)
            .field("concurrency", &self.concurrency)
            .field("baseline", &self.has_baseline())
            .field("skipped", &self.skipped_cycles())
            .finish_non_exhaustive()
    }
}
