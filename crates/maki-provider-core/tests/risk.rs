use std::collections::HashMap;
use std::sync::Arc;

use maki_common::ProviderKind;
use maki_provider_core::{
    CredentialNode, CredentialSecrets, LifecycleState, Observation, PolicyMode, PoolManager,
    PoolTuning, RiskEngine, RiskHub, RiskSettings, RiskSignal, RotationPolicy,
    next_midnight_ms,
};

fn pools() -> Arc<PoolManager> {
    Arc::new(PoolManager::new(
        HashMap::new(),
        PoolTuning::default(),
        RotationPolicy::default(),
    ))
}

fn engine(mode: PolicyMode) -> RiskEngine {
    let settings = RiskSettings {
        mode,
        ..RiskSettings::default()
    };
    RiskEngine::new(settings, RiskHub::new(64))
}

async fn seeded(pools: &PoolManager, kind: ProviderKind) -> CredentialNode {
    let node = CredentialNode::new(kind, CredentialSecrets::default(), 1_000);
    pools.insert(node.clone()).await;
    node
}

#[tokio::test]
async fn rate_limit_applies_exponential_cooldown() {
    let pools = pools();
    let engine = engine(PolicyMode::EnforceStrict);
    let node = seeded(&pools, ProviderKind::Kiro).await;
    let now = 1_000_000;

    engine
        .observe(
            &pools,
            ProviderKind::Kiro,
            node.uuid,
            RiskSignal::RateLimited,
            Observation::reason("http_429"),
            now,
        )
        .await;

    let updated = pools.get(ProviderKind::Kiro, node.uuid).await.unwrap();
    assert_eq!(updated.state, LifecycleState::Cooldown);
    // First offence: streak 1 → 2^1 * 1000ms.
    assert_eq!(updated.cooldown_until_ms, Some(now + 2_000));
    assert_eq!(updated.rate_limit_streak, 1);

    engine
        .observe(
            &pools,
            ProviderKind::Kiro,
            node.uuid,
            RiskSignal::RateLimited,
            Observation::reason("http_429"),
            now + 10,
        )
        .await;
    let updated = pools.get(ProviderKind::Kiro, node.uuid).await.unwrap();
    assert_eq!(updated.cooldown_until_ms, Some(now + 10 + 4_000));
}

#[tokio::test]
async fn rate_limit_honours_header_reset_time() {
    let pools = pools();
    let engine = engine(PolicyMode::EnforceStrict);
    let node = seeded(&pools, ProviderKind::Codex).await;
    let now = 50_000;
    let reset = now + 600_000;

    let mut obs = Observation::reason("http_429");
    obs.header_reset_ms = Some(reset);
    engine
        .observe(
            &pools,
            ProviderKind::Codex,
            node.uuid,
            RiskSignal::RateLimited,
            obs,
            now,
        )
        .await;

    let updated = pools.get(ProviderKind::Codex, node.uuid).await.unwrap();
    assert_eq!(updated.cooldown_until_ms, Some(reset));
    assert_eq!(updated.rate_limit_reset_ms, Some(reset));
}

#[tokio::test]
async fn quota_exceeded_cools_until_next_midnight() {
    let pools = pools();
    let engine = engine(PolicyMode::EnforceStrict);
    let node = seeded(&pools, ProviderKind::Kiro).await;
    let now = 1_710_072_000_000; // 2024-03-10 12:00 UTC

    engine
        .observe(
            &pools,
            ProviderKind::Kiro,
            node.uuid,
            RiskSignal::QuotaExceeded,
            Observation::reason("http_402"),
            now,
        )
        .await;

    let updated = pools.get(ProviderKind::Kiro, node.uuid).await.unwrap();
    assert_eq!(updated.state, LifecycleState::Cooldown);
    assert_eq!(
        updated.cooldown_until_ms,
        Some(next_midnight_ms(now, time::UtcOffset::UTC))
    );
}

#[tokio::test]
async fn success_resets_streaks_and_failure_budget() {
    let pools = pools();
    let engine = engine(PolicyMode::EnforceStrict);
    let mut node = CredentialNode::new(ProviderKind::Kiro, CredentialSecrets::default(), 0);
    node.auth_failure_streak = 2;
    node.failure_count = 2;
    node.state = LifecycleState::Quarantined;
    pools.insert(node.clone()).await;

    engine
        .observe(
            &pools,
            ProviderKind::Kiro,
            node.uuid,
            RiskSignal::Success,
            Observation::reason("http_200"),
            5_000,
        )
        .await;

    let updated = pools.get(ProviderKind::Kiro, node.uuid).await.unwrap();
    assert_eq!(updated.state, LifecycleState::Healthy);
    assert_eq!(updated.auth_failure_streak, 0);
    assert_eq!(updated.failure_count, 0);
}

#[tokio::test]
async fn observe_mode_updates_counters_but_never_transitions() {
    let pools = pools();
    let engine = engine(PolicyMode::Observe);
    let node = seeded(&pools, ProviderKind::Letta).await;

    engine
        .observe(
            &pools,
            ProviderKind::Letta,
            node.uuid,
            RiskSignal::Banned,
            Observation::reason("http_403"),
            2_000,
        )
        .await;

    let updated = pools.get(ProviderKind::Letta, node.uuid).await.unwrap();
    assert_eq!(updated.state, LifecycleState::Healthy);
    assert_eq!(updated.error_count, 1);
}

#[tokio::test]
async fn soft_mode_maps_banned_to_quarantined() {
    let pools = pools();
    let engine = engine(PolicyMode::EnforceSoft);
    let node = seeded(&pools, ProviderKind::Qwen).await;

    engine
        .observe(
            &pools,
            ProviderKind::Qwen,
            node.uuid,
            RiskSignal::Banned,
            Observation::reason("marker_banned"),
            2_000,
        )
        .await;

    let updated = pools.get(ProviderKind::Qwen, node.uuid).await.unwrap();
    assert_eq!(updated.state, LifecycleState::Quarantined);
}

#[tokio::test]
async fn emergency_mode_parks_after_three_transients() {
    let pools = pools();
    let engine = engine(PolicyMode::ProtectiveEmergency);
    let node = seeded(&pools, ProviderKind::Codex).await;
    let now = 9_000;

    for i in 0..2 {
        engine
            .observe(
                &pools,
                ProviderKind::Codex,
                node.uuid,
                RiskSignal::NetworkTransient,
                Observation::reason("http_503"),
                now + i,
            )
            .await;
        let updated = pools.get(ProviderKind::Codex, node.uuid).await.unwrap();
        assert_eq!(updated.state, LifecycleState::Healthy);
    }

    engine
        .observe(
            &pools,
            ProviderKind::Codex,
            node.uuid,
            RiskSignal::NetworkTransient,
            Observation::reason("http_503"),
            now + 2,
        )
        .await;
    let updated = pools.get(ProviderKind::Codex, node.uuid).await.unwrap();
    assert_eq!(updated.state, LifecycleState::Cooldown);
    assert_eq!(updated.cooldown_until_ms, Some(now + 2 + 300_000));
}

#[tokio::test]
async fn identity_collision_quarantines_newer_node() {
    let pools = pools();
    let engine = engine(PolicyMode::EnforceStrict);
    let a = seeded(&pools, ProviderKind::Kiro).await;
    let b = seeded(&pools, ProviderKind::Kiro).await;

    engine
        .note_identity(&pools, ProviderKind::Kiro, a.uuid, "fp-1", 1_000)
        .await;
    engine
        .note_identity(&pools, ProviderKind::Kiro, b.uuid, "fp-1", 2_000)
        .await;

    let newer = if a.uuid.to_string() > b.uuid.to_string() {
        a.uuid
    } else {
        b.uuid
    };
    let older = if newer == a.uuid { b.uuid } else { a.uuid };
    assert_eq!(
        pools.get(ProviderKind::Kiro, newer).await.unwrap().state,
        LifecycleState::Quarantined
    );
    assert_eq!(
        pools.get(ProviderKind::Kiro, older).await.unwrap().state,
        LifecycleState::Healthy
    );
}

#[tokio::test]
async fn collision_outside_window_is_ignored() {
    let pools = pools();
    let engine = engine(PolicyMode::EnforceStrict);
    let a = seeded(&pools, ProviderKind::Kiro).await;
    let b = seeded(&pools, ProviderKind::Kiro).await;

    engine
        .note_identity(&pools, ProviderKind::Kiro, a.uuid, "fp-2", 1_000)
        .await;
    // Default window is 30s.
    engine
        .note_identity(&pools, ProviderKind::Kiro, b.uuid, "fp-2", 40_000)
        .await;

    for uuid in [a.uuid, b.uuid] {
        assert_eq!(
            pools.get(ProviderKind::Kiro, uuid).await.unwrap().state,
            LifecycleState::Healthy
        );
    }
}
