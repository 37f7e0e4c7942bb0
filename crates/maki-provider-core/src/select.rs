use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credential::{CredentialNode, LifecycleState};
use crate::settings::PoolTuning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStrategy {
    RoundRobin,
    Random,
    LeastUsed,
    LeastFailures,
}

impl RotationStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "round-robin" => Some(RotationStrategy::RoundRobin),
            "random" => Some(RotationStrategy::Random),
            "least-used" => Some(RotationStrategy::LeastUsed),
            "least-failures" => Some(RotationStrategy::LeastFailures),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    UnknownProvider,
    NoHealthyNode,
}

impl std::fmt::Display for SelectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectError::UnknownProvider => f.write_str("unknown provider"),
            SelectError::NoHealthyNode => f.write_str("no healthy credential available"),
        }
    }
}

impl std::error::Error for SelectError {}

const RECENCY_ALPHA: f64 = 1.0;
const RECENCY_CAP_MIN: f64 = 10.0;

/// Lazily recover timed-out penalties. Runs under the pool writer lock on
/// every selection, so no background scanner is needed.
pub(crate) fn refresh_availability(node: &mut CredentialNode, tuning: &PoolTuning, now_ms: i64) {
    if let Some(until) = node.cooldown_until_ms
        && until <= now_ms
    {
        node.cooldown_until_ms = None;
        if node.state == LifecycleState::Cooldown {
            node.state = LifecycleState::Healthy;
            node.is_healthy = true;
        }
    }
    if let Some(reset) = node.rate_limit_reset_ms
        && reset <= now_ms
    {
        node.rate_limit_reset_ms = None;
    }
    if node.failure_count > 0 && now_ms - node.failure_window_start_ms >= tuning.failure_reset_ms {
        node.failure_count = 0;
    }
}

pub(crate) fn is_available(node: &CredentialNode, tuning: &PoolTuning, now_ms: i64) -> bool {
    if node.is_disabled || node.state.is_terminal_for_selection() {
        return false;
    }
    // needs_refresh nodes stay eligible: dispatch refreshes them inline.
    if let Some(until) = node.cooldown_until_ms
        && until > now_ms
    {
        return false;
    }
    if let Some(reset) = node.rate_limit_reset_ms
        && reset > now_ms
    {
        return false;
    }
    if node.failure_count >= tuning.max_failures {
        return false;
    }
    true
}

/// Score used by the `least-used` ranking: raw usage discounted by a capped
/// recency bonus, so briefly idle nodes win over the one just used.
fn usage_score(node: &CredentialNode, now_ms: i64) -> f64 {
    let idle_min = ((now_ms - node.last_used_ms).max(0) as f64 / 60_000.0).min(RECENCY_CAP_MIN);
    node.usage_count as f64 - RECENCY_ALPHA * idle_min
}

fn rank_key(node: &CredentialNode, now_ms: i64) -> (u32, i64, i64, Uuid) {
    // Lexicographic: auth failures, scaled score, last used, uuid tiebreak.
    (
        node.auth_failure_streak,
        (usage_score(node, now_ms) * 1_000.0) as i64,
        node.last_used_ms,
        node.uuid,
    )
}

/// Pick an available node from `nodes`, honoring priority tiers first and
/// the configured strategy within the winning tier. `cursor` is the pool's
/// round-robin position; it always advances past the returned node.
pub(crate) fn pick<'a>(
    nodes: &'a mut [CredentialNode],
    cursor: &mut usize,
    tuning: &PoolTuning,
    now_ms: i64,
    exclude: &HashSet<Uuid>,
) -> Option<&'a mut CredentialNode> {
    for node in nodes.iter_mut() {
        refresh_availability(node, tuning, now_ms);
    }

    let candidates: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| !exclude.contains(&node.uuid) && is_available(node, tuning, now_ms))
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let top_priority = candidates
        .iter()
        .map(|&i| nodes[i].effective_priority())
        .min()
        .expect("candidates is non-empty");
    let tier: Vec<usize> = candidates
        .into_iter()
        .filter(|&i| nodes[i].effective_priority() == top_priority)
        .collect();

    let chosen = match tuning.strategy {
        RotationStrategy::RoundRobin => {
            let start = *cursor % nodes.len();
            // First tier member at or after the cursor, wrapping.
            let pos = (0..nodes.len())
                .map(|off| (start + off) % nodes.len())
                .find(|i| tier.contains(i))
                .expect("tier is non-empty");
            *cursor = pos + 1;
            pos
        }
        RotationStrategy::Random => tier[rand::rng().random_range(0..tier.len())],
        RotationStrategy::LeastUsed => *tier
            .iter()
            .min_by_key(|&&i| rank_key(&nodes[i], now_ms))
            .expect("tier is non-empty"),
        RotationStrategy::LeastFailures => *tier
            .iter()
            .min_by_key(|&&i| {
                let node = &nodes[i];
                (node.error_count, node.auth_failure_streak, node.uuid)
            })
            .expect("tier is non-empty"),
    };

    Some(&mut nodes[chosen])
}
