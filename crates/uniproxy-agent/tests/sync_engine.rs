//! Reconciliation engine behavior against the in-memory provisioner.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use uniproxy_agent::provision::{Call, MemoryProvisioner, Protocol, ProvisioningPort};
use uniproxy_agent::{AgentError, SyncEngine, SyncMode};

async fn run(engine: &SyncEngine, mode: SyncMode) -> uniproxy_agent::CycleReport {
    engine
        .try_run(mode)
        .await
        .expect("cycle should not be skipped")
        .expect("cycle should succeed")
}

// ============================================================================
// Full Mode
// ============================================================================

#[tokio::test]
async fn full_sync_dedupes_accounts() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (1, "A"), (2, "B")])));
    let port = Arc::new(MemoryProvisioner::new());
    let engine = engine(dir, port.clone());

    let report = run(&engine, SyncMode::Full).await;

    assert_eq!(report.fetched, 3);
    assert_eq!(report.unique, 2);
    assert_eq!(report.added, 2);
    assert_eq!(report.removed, 0);
    assert_eq!(port.add_calls(), 2);
    assert_eq!(port.remove_calls(), 0);
    assert_eq!(port.keys(TAG), keys(&["1", "2"]));
    assert_eq!(port.principal(TAG, "1").unwrap().identity, "A");
    assert_eq!(port.principal(TAG, "2").unwrap().secret, "B");
    assert_eq!(engine.cache().get("1").await.as_deref(), Some("A"));
    assert!(engine.has_baseline());
}

#[tokio::test]
async fn full_sync_wipes_everything_but_admin() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A")])));
    let port = Arc::new(MemoryProvisioner::new());
    port.seed(Protocol::Vless, TAG, "admin", "operator");
    port.seed(Protocol::Vless, TAG, "1", "A");
    port.seed(Protocol::Vless, TAG, "5", "leftover");
    let engine = engine(dir, port.clone());

    let report = run(&engine, SyncMode::Full).await;

    assert_eq!(report.removed, 2);
    assert_eq!(port.keys(TAG), keys(&["1", "admin"]));
    assert!(
        !port
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Remove { key, .. } if key == "admin"))
    );
    // "1" was wiped and provisioned again from scratch.
    assert_eq!(port.add_calls(), 1);
}

// ============================================================================
// Incremental Mode
// ============================================================================

#[tokio::test]
async fn incremental_removes_accounts_dropped_by_panel() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (2, "B"), (3, "C")])));
    let port = Arc::new(MemoryProvisioner::new());
    port.seed(Protocol::Vless, TAG, "admin", "operator");
    let engine = engine(dir.clone(), port.clone());
    run(&engine, SyncMode::Full).await;
    assert_eq!(port.keys(TAG), keys(&["1", "2", "3", "admin"]));
    port.clear_calls();

    dir.set(accounts(&[(1, "A"), (3, "C")]));
    let report = run(&engine, SyncMode::Incremental).await;

    assert_eq!(report.removed, 1);
    assert_eq!(report.satisfied, 2);
    assert_eq!(
        port.calls(),
        vec![Call::Remove {
            tag: TAG.into(),
            key: "2".into()
        }]
    );
    assert_eq!(port.keys(TAG), keys(&["1", "3", "admin"]));
    assert_eq!(engine.cache().get("2").await, None);
}

#[tokio::test]
async fn second_incremental_run_is_a_no_op() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (2, "B")])));
    let port = Arc::new(MemoryProvisioner::new());
    let engine = engine(dir, port.clone());

    let first = run(&engine, SyncMode::Incremental).await;
    assert_eq!(first.added, 2);
    port.clear_calls();

    let second = run(&engine, SyncMode::Incremental).await;
    assert_eq!(second.added, 0);
    assert_eq!(second.removed, 0);
    assert_eq!(second.satisfied, 2);
    assert!(port.calls().is_empty());
}

#[tokio::test]
async fn credential_rotation_removes_then_adds() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (2, "B")])));
    let port = Arc::new(MemoryProvisioner::new());
    let engine = engine(dir.clone(), port.clone());
    run(&engine, SyncMode::Full).await;
    port.clear_calls();

    dir.set(accounts(&[(1, "A2"), (2, "B")]));
    let report = run(&engine, SyncMode::Incremental).await;

    assert_eq!(report.rotated, 1);
    assert_eq!(report.added, 1);
    assert_eq!(
        port.calls(),
        vec![
            Call::Remove {
                tag: TAG.into(),
                key: "1".into()
            },
            Call::Add {
                tag: TAG.into(),
                key: "1".into(),
                identity: "A2".into()
            },
        ]
    );
    assert_eq!(port.principal(TAG, "1").unwrap().identity, "A2");
    assert_eq!(engine.cache().get("1").await.as_deref(), Some("A2"));
}

#[tokio::test]
async fn rotation_waits_when_stale_removal_fails() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A")])));
    let port = Arc::new(MemoryProvisioner::new());
    let engine = engine(dir.clone(), port.clone());
    run(&engine, SyncMode::Full).await;

    dir.set(accounts(&[(1, "B")]));
    port.fail_remove_for("1");
    port.clear_calls();
    let report = run(&engine, SyncMode::Incremental).await;

    assert_eq!(report.failed, 1);
    assert_eq!(port.add_calls(), 0);
    assert_eq!(port.principal(TAG, "1").unwrap().identity, "A");
    assert_eq!(engine.cache().get("1").await.as_deref(), Some("A"));

    port.clear_failures();
    let report = run(&engine, SyncMode::Incremental).await;
    assert_eq!(report.rotated, 1);
    assert_eq!(port.principal(TAG, "1").unwrap().identity, "B");
}

#[tokio::test]
async fn admin_survives_empty_account_set() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A")])));
    let port = Arc::new(MemoryProvisioner::new());
    port.seed(Protocol::Vless, TAG, "admin", "operator");
    let engine = engine(dir.clone(), port.clone());
    run(&engine, SyncMode::Full).await;

    dir.set(accounts(&[]));
    let report = run(&engine, SyncMode::Incremental).await;

    assert_eq!(report.removed, 1);
    assert_eq!(port.keys(TAG), keys(&["admin"]));
    assert!(engine.cache().is_empty().await);
}

#[tokio::test]
async fn incremental_converges_on_panel_keys() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (2, "B"), (3, "C")])));
    let port = Arc::new(MemoryProvisioner::new());
    port.seed(Protocol::Vless, TAG, "admin", "operator");
    let engine = engine(dir.clone(), port.clone());
    run(&engine, SyncMode::Full).await;

    // Leftovers from another process the panel knows nothing about.
    port.seed(Protocol::Vless, TAG, "40", "x");
    port.seed(Protocol::Vless, TAG, "41", "y");
    dir.set(accounts(&[(2, "B"), (3, "C3"), (4, "D"), (4, "D-dup")]));
    let report = run(&engine, SyncMode::Incremental).await;

    assert_eq!(report.failed, 0);
    let live: Vec<String> = port
        .keys(TAG)
        .into_iter()
        .filter(|k| k != "admin")
        .collect();
    assert_eq!(live, keys(&["2", "3", "4"]));
    assert_eq!(port.principal(TAG, "4").unwrap().identity, "D");
    assert_eq!(engine.cache().snapshot().await.len(), 3);
}

#[tokio::test]
async fn failed_addition_is_retried_next_cycle() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (2, "B")])));
    let port = Arc::new(MemoryProvisioner::new());
    port.fail_add_for("2");
    let engine = engine(dir, port.clone());

    let report = run(&engine, SyncMode::Full).await;
    assert_eq!(report.added, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(engine.cache().get("2").await, None);

    port.clear_failures();
    port.clear_calls();
    let report = run(&engine, SyncMode::Incremental).await;
    assert_eq!(report.added, 1);
    assert_eq!(
        port.calls(),
        vec![Call::Add {
            tag: TAG.into(),
            key: "2".into(),
            identity: "B".into()
        }]
    );
}

// ============================================================================
// Live State
// ============================================================================

#[tokio::test]
async fn vanished_principal_is_added_again() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (2, "B")])));
    let port = Arc::new(MemoryProvisioner::new());
    let engine = engine(dir, port.clone());
    run(&engine, SyncMode::Full).await;

    // The proxy lost "2" behind the agent's back, e.g. after a restart.
    port.remove_principal(TAG, "2").await.unwrap();
    port.clear_calls();

    let report = run(&engine, SyncMode::Incremental).await;

    assert_eq!(report.satisfied, 1);
    assert_eq!(report.added, 1);
    assert_eq!(
        port.calls(),
        vec![Call::Add {
            tag: TAG.into(),
            key: "2".into(),
            identity: "B".into()
        }]
    );
    assert_eq!(port.keys(TAG), keys(&["1", "2"]));
    assert_eq!(engine.cache().get("2").await.as_deref(), Some("B"));
}

#[tokio::test]
async fn wipe_survivor_is_rotated_once_removal_recovers() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "NEW")])));
    let port = Arc::new(MemoryProvisioner::new());
    port.seed(Protocol::Vless, TAG, "1", "OLD");
    port.fail_remove_for("1");
    let engine = engine(dir, port.clone());

    let report = run(&engine, SyncMode::Full).await;
    assert_eq!(report.failed, 1);
    assert_eq!(port.add_calls(), 0);
    assert_eq!(engine.cache().get("1").await.as_deref(), Some("OLD"));

    port.clear_failures();
    port.clear_calls();
    let report = run(&engine, SyncMode::Incremental).await;

    assert_eq!(report.rotated, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(
        port.calls(),
        vec![
            Call::Remove {
                tag: TAG.into(),
                key: "1".into()
            },
            Call::Add {
                tag: TAG.into(),
                key: "1".into(),
                identity: "NEW".into()
            },
        ]
    );
    assert_eq!(port.principal(TAG, "1").unwrap().identity, "NEW");

    port.clear_calls();
    run(&engine, SyncMode::Incremental).await;
    assert!(port.calls().is_empty());
}

#[tokio::test]
async fn live_principals_are_adopted_into_cache() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (2, "B")])));
    let port = Arc::new(MemoryProvisioner::new());
    port.seed(Protocol::Vless, TAG, "admin", "operator");
    port.seed(Protocol::Vless, TAG, "1", "A");
    port.seed(Protocol::Vless, TAG, "2", "B");
    let engine = engine(dir, port.clone());

    let report = run(&engine, SyncMode::Incremental).await;

    assert_eq!(report.satisfied, 2);
    assert!(port.calls().is_empty());
    let cached = engine.cache().snapshot().await;
    assert_eq!(cached.keys().cloned().collect::<Vec<_>>(), keys(&["1", "2"]));
}

// ============================================================================
// Aborted Cycles
// ============================================================================

#[tokio::test]
async fn fetch_failure_touches_nothing() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A")])));
    dir.fail_with_status(Some(502));
    let port = Arc::new(MemoryProvisioner::new());
    port.seed(Protocol::Vless, TAG, "9", "x");
    let engine = engine(dir, port.clone());

    let result = engine.try_run(SyncMode::Full).await.unwrap();
    assert!(matches!(result, Err(AgentError::Status(502))));
    assert!(port.calls().is_empty());
    assert_eq!(port.close_calls(), 0);
    assert_eq!(port.keys(TAG), keys(&["9"]));
    assert!(!engine.has_baseline());
    assert_eq!(engine.scheduled_mode(), SyncMode::Full);
}

#[tokio::test]
async fn missing_inbound_is_config_error() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A")])));
    let port = Arc::new(MemoryProvisioner::new());
    let engine = SyncEngine::new(dir, Arc::new(vless_inbounds()), port.clone(), "elsewhere");

    let result = engine.try_run(SyncMode::Incremental).await.unwrap();
    assert!(matches!(result, Err(AgentError::Config(_))));
    assert_eq!(port.open_sessions(), 0);
    assert!(port.calls().is_empty());
}

#[tokio::test]
async fn session_init_failure_aborts_cycle() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A")])));
    let port = Arc::new(MemoryProvisioner::new());
    port.fail_init(true);
    let engine = engine(dir, port.clone());

    let result = engine.try_run(SyncMode::Full).await.unwrap();
    assert!(matches!(result, Err(AgentError::Provisioning(_))));
    assert!(port.calls().is_empty());
    assert_eq!(port.close_calls(), 0);
}

#[tokio::test]
async fn session_closed_after_cycle() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (2, "B")])));
    let port = Arc::new(MemoryProvisioner::new());
    let engine = engine(dir, port.clone());

    run(&engine, SyncMode::Full).await;
    run(&engine, SyncMode::Incremental).await;
    assert_eq!(port.open_sessions(), 0);
    assert_eq!(port.close_calls(), 2);
}

// ============================================================================
// Shadowsocks
// ============================================================================

#[tokio::test]
async fn shadowsocks_principals_carry_cipher() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(7, "pw-7")])));
    let port = Arc::new(MemoryProvisioner::new());
    let inbounds = shadowsocks_inbounds(r#"{"method":"aes-256-gcm","network":"tcp,udp"}"#);
    let engine = SyncEngine::new(dir, Arc::new(inbounds), port.clone(), REMARK);

    run(&engine, SyncMode::Full).await;

    let principal = port.principal(TAG, "7").unwrap();
    assert_eq!(principal.protocol, Protocol::Shadowsocks);
    assert_eq!(principal.cipher.as_deref(), Some("aes-256-gcm"));
    assert_eq!(principal.secret, "pw-7");
}

#[tokio::test]
async fn shadowsocks_without_method_aborts_before_provisioning() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(7, "pw-7")])));
    let port = Arc::new(MemoryProvisioner::new());
    port.seed(Protocol::Shadowsocks, TAG, "3", "old");
    let inbounds = shadowsocks_inbounds(r#"{"network":"tcp"}"#);
    let engine = SyncEngine::new(dir, Arc::new(inbounds), port.clone(), REMARK);

    let result = engine.try_run(SyncMode::Full).await.unwrap();
    assert!(matches!(result, Err(AgentError::Config(_))));
    assert!(port.calls().is_empty());
    assert_eq!(port.keys(TAG), keys(&["3"]));
}

#[tokio::test]
async fn vless_principals_have_no_cipher() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A")])));
    let port = Arc::new(MemoryProvisioner::new());
    let engine = engine(dir, port.clone());

    run(&engine, SyncMode::Full).await;
    assert_eq!(port.principal(TAG, "1").unwrap().cipher, None);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn provisioning_never_exceeds_ten_in_flight() {
    let entries: Vec<(u64, String)> = (1..=50).map(|i| (i, format!("uuid-{i}"))).collect();
    let borrowed: Vec<(u64, &str)> = entries.iter().map(|(i, u)| (*i, u.as_str())).collect();
    let dir = Arc::new(StaticDirectory::new(accounts(&borrowed)));
    let port = Arc::new(MemoryProvisioner::new().with_latency(Duration::from_millis(10)));
    let engine = engine(dir, port.clone());

    let report = run(&engine, SyncMode::Full).await;

    assert_eq!(report.added, 50);
    assert_eq!(port.keys(TAG).len(), 50);
    assert_eq!(port.max_in_flight(), 10);
}

#[tokio::test]
async fn custom_concurrency_limit() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[
        (1, "a"),
        (2, "b"),
        (3, "c"),
        (4, "d"),
        (5, "e"),
    ])));
    let port = Arc::new(MemoryProvisioner::new().with_latency(Duration::from_millis(5)));
    let engine = engine(dir, port.clone()).with_concurrency(2);

    run(&engine, SyncMode::Full).await;
    assert_eq!(port.max_in_flight(), 2);
}

#[tokio::test]
async fn overlapping_cycle_is_skipped() {
    let dir = Arc::new(StaticDirectory::new(accounts(&[(1, "A"), (2, "B")])));
    let port = Arc::new(MemoryProvisioner::new().with_latency(Duration::from_millis(50)));
    let engine = engine(dir.clone(), port.clone());

    let (first, second) = tokio::join!(
        engine.try_run(SyncMode::Full),
        engine.try_run(SyncMode::Incremental)
    );

    assert!(first.unwrap().is_ok());
    assert!(second.is_none());
    assert_eq!(engine.skipped_cycles(), 1);
    assert_eq!(dir.fetches(), 1);

    // The guard is released once the cycle finishes.
    assert!(engine.try_run(SyncMode::Incremental).await.is_some());
    assert_eq!(engine.skipped_cycles(), 1);
}

#[tokio::test]
async fn rotations_remove_concurrently() {
    let old: Vec<(u64, String)> = (1..=20).map(|i| (i, format!("old-{i}"))).collect();
    let new: Vec<(u64, String)> = (1..=20).map(|i| (i, format!("new-{i}"))).collect();
    let port = Arc::new(MemoryProvisioner::new().with_latency(Duration::from_millis(10)));
    for (id, uuid) in &old {
        port.seed(Protocol::Vless, TAG, &id.to_string(), uuid);
    }
    let borrowed: Vec<(u64, &str)> = new.iter().map(|(i, u)| (*i, u.as_str())).collect();
    let dir = Arc::new(StaticDirectory::new(accounts(&borrowed)));
    let engine = engine(dir, port.clone());

    let report = run(&engine, SyncMode::Incremental).await;

    assert_eq!(report.rotated, 20);
    assert_eq!(port.remove_calls(), 20);
    assert_eq!(port.max_in_flight(), 10);
    assert_eq!(port.principal(TAG, "7").unwrap().identity, "new-7");
}
