use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use maki_common::ProviderKind;
use maki_provider_core::{
    CredentialNode, CredentialSecrets, LifecycleState, PoolManager, PoolTuning, RotationPolicy,
    RotationStrategy, SelectError,
};

fn manager(strategy: RotationStrategy) -> Arc<PoolManager> {
    let tuning = PoolTuning {
        strategy,
        ..PoolTuning::default()
    };
    Arc::new(PoolManager::new(
        HashMap::new(),
        tuning,
        RotationPolicy::default(),
    ))
}

fn node(kind: ProviderKind) -> CredentialNode {
    CredentialNode::new(kind, CredentialSecrets::default(), 1_000)
}

#[tokio::test]
async fn empty_pool_yields_no_healthy_node() {
    let pools = manager(RotationStrategy::RoundRobin);
    let err = pools.select(ProviderKind::Kiro, 2_000).await.unwrap_err();
    assert_eq!(err, SelectError::NoHealthyNode);
}

#[tokio::test]
async fn cooldown_nodes_are_never_returned() {
    let pools = manager(RotationStrategy::RoundRobin);
    let mut cooled = node(ProviderKind::Kiro);
    cooled.state = LifecycleState::Cooldown;
    cooled.cooldown_until_ms = Some(10_000);
    let cooled_id = cooled.uuid;
    pools.insert(cooled).await;

    let err = pools.select(ProviderKind::Kiro, 5_000).await.unwrap_err();
    assert_eq!(err, SelectError::NoHealthyNode);

    // Expiry recovers lazily on the next selection.
    let chosen = pools.select(ProviderKind::Kiro, 11_000).await.unwrap();
    assert_eq!(chosen.uuid, cooled_id);
    assert_eq!(chosen.state, LifecycleState::Healthy);
    assert_eq!(chosen.cooldown_until_ms, None);
}

#[tokio::test]
async fn terminal_states_are_never_returned() {
    let pools = manager(RotationStrategy::RoundRobin);
    for state in [
        LifecycleState::Banned,
        LifecycleState::Suspended,
        LifecycleState::Disabled,
    ] {
        let mut bad = node(ProviderKind::Codex);
        bad.state = state;
        pools.insert(bad).await;
    }
    let err = pools.select(ProviderKind::Codex, 2_000).await.unwrap_err();
    assert_eq!(err, SelectError::NoHealthyNode);
}

#[tokio::test]
async fn lower_priority_tier_wins_even_when_busier() {
    let pools = manager(RotationStrategy::LeastUsed);
    let mut preferred = node(ProviderKind::Kiro);
    preferred.priority = 10;
    preferred.usage_count = 500;
    let preferred_id = preferred.uuid;
    let mut fallback = node(ProviderKind::Kiro);
    fallback.priority = 100;
    fallback.usage_count = 0;
    pools.insert(preferred).await;
    pools.insert(fallback).await;

    for _ in 0..3 {
        let chosen = pools.select(ProviderKind::Kiro, 2_000).await.unwrap();
        assert_eq!(chosen.uuid, preferred_id);
    }
}

#[tokio::test]
async fn negative_priority_collapses_to_default_tier() {
    let pools = manager(RotationStrategy::LeastUsed);
    let mut weird = node(ProviderKind::Kiro);
    weird.priority = -5;
    let mut normal = node(ProviderKind::Kiro);
    normal.priority = 50;
    let normal_id = normal.uuid;
    pools.insert(weird).await;
    pools.insert(normal).await;

    let chosen = pools.select(ProviderKind::Kiro, 2_000).await.unwrap();
    assert_eq!(chosen.uuid, normal_id, "-5 is treated as tier 100");
}

#[tokio::test]
async fn select_excluding_rotates_through_tier_without_repeats() {
    let pools = manager(RotationStrategy::RoundRobin);
    for _ in 0..3 {
        pools.insert(node(ProviderKind::Qwen)).await;
    }

    let mut tried = HashSet::new();
    for _ in 0..3 {
        let chosen = pools
            .select_excluding(ProviderKind::Qwen, &tried, 2_000)
            .await
            .unwrap();
        assert!(tried.insert(chosen.uuid), "no uuid is selected twice");
    }
    let err = pools
        .select_excluding(ProviderKind::Qwen, &tried, 2_000)
        .await
        .unwrap_err();
    assert_eq!(err, SelectError::NoHealthyNode);
}

#[tokio::test]
async fn round_robin_always_advances() {
    let pools = manager(RotationStrategy::RoundRobin);
    pools.insert(node(ProviderKind::Letta)).await;
    pools.insert(node(ProviderKind::Letta)).await;

    let first = pools.select(ProviderKind::Letta, 2_000).await.unwrap();
    let second = pools.select(ProviderKind::Letta, 2_001).await.unwrap();
    let third = pools.select(ProviderKind::Letta, 2_002).await.unwrap();
    assert_ne!(first.uuid, second.uuid, "cursor moves past the chosen node");
    assert_eq!(first.uuid, third.uuid);
}

#[tokio::test]
async fn failure_budget_excludes_until_window_elapses() {
    let pools = manager(RotationStrategy::RoundRobin);
    let mut tired = node(ProviderKind::Kiro);
    tired.failure_count = 3; // default max_failures
    tired.failure_window_start_ms = 1_000;
    let tired_id = tired.uuid;
    pools.insert(tired).await;

    let err = pools.select(ProviderKind::Kiro, 2_000).await.unwrap_err();
    assert_eq!(err, SelectError::NoHealthyNode);

    // Default reset window is 300s; afterwards the counter zeroes.
    let chosen = pools.select(ProviderKind::Kiro, 302_000).await.unwrap();
    assert_eq!(chosen.uuid, tired_id);
    assert_eq!(chosen.failure_count, 0);
}

#[tokio::test]
async fn kiro_siblings_share_machine_id() {
    let pools = manager(RotationStrategy::RoundRobin);
    let mut first = node(ProviderKind::Kiro);
    first.secrets.account_id = Some("acct-1".to_string());
    let first_id = first.uuid;
    let mut second = node(ProviderKind::Kiro);
    second.secrets.account_id = Some("acct-1".to_string());
    let second_id = second.uuid;
    pools.insert(first).await;
    pools.insert(second).await;

    let first = pools.get(ProviderKind::Kiro, first_id).await.unwrap();
    let second = pools.get(ProviderKind::Kiro, second_id).await.unwrap();
    assert_eq!(first.machine_id(), second.machine_id());
}

#[tokio::test]
async fn selection_bumps_usage_counters() {
    let pools = manager(RotationStrategy::RoundRobin);
    pools.insert(node(ProviderKind::Codex)).await;
    let chosen = pools.select(ProviderKind::Codex, 9_000).await.unwrap();
    assert_eq!(chosen.usage_count, 1);
    assert_eq!(chosen.last_used_ms, 9_000);
}
