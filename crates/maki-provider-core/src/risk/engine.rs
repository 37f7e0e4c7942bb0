use std::collections::HashMap;

use maki_common::ProviderKind;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::credential::{CredentialNode, LifecycleState};
use crate::pool::PoolManager;
use crate::settings::{PolicyMode, RiskSettings};

use super::hub::RiskHub;
use super::journal::RiskEvent;
use super::signal::RiskSignal;

const RATE_LIMIT_COOLDOWN_CAP_MS: i64 = 60 * 60 * 1_000;
const EMERGENCY_TRANSIENT_STREAK: u32 = 3;
const EMERGENCY_COOLDOWN_MS: i64 = 5 * 60 * 1_000;

/// Journal context attached to one observation.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub reason_code: String,
    pub http_status: Option<u16>,
    pub error_snippet: Option<String>,
    /// Upstream `Retry-After`, already resolved to an absolute deadline.
    pub header_reset_ms: Option<i64>,
}

impl Observation {
    pub fn reason(reason_code: impl Into<String>) -> Self {
        Self {
            reason_code: reason_code.into(),
            ..Self::default()
        }
    }
}

/// Watches every dispatch outcome and transitions credential nodes between
/// health tiers. This engine is the single writer of `CredentialNode::state`.
pub struct RiskEngine {
    settings: RiskSettings,
    hub: RiskHub,
    /// account fingerprint → (uuid, last_seen_ms), for collision detection.
    fingerprints: Mutex<HashMap<String, (Uuid, i64)>>,
}

impl RiskEngine {
    pub fn new(settings: RiskSettings, hub: RiskHub) -> Self {
        Self {
            settings,
            hub,
            fingerprints: Mutex::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &RiskHub {
        &self.hub
    }

    pub fn mode(&self) -> PolicyMode {
        self.settings.mode
    }

    /// Record one signal for a node: journal it, update counters, and (when
    /// enforcing) apply the lifecycle transition and cooldown arithmetic.
    pub async fn observe(
        &self,
        pools: &PoolManager,
        kind: ProviderKind,
        uuid: Uuid,
        signal: RiskSignal,
        observation: Observation,
        now_ms: i64,
    ) {
        if !self.settings.enabled {
            return;
        }

        self.hub
            .emit(RiskEvent {
                at_ms: now_ms,
                uuid,
                provider: kind,
                signal,
                reason_code: observation.reason_code.clone(),
                http_status: observation.http_status,
                error_snippet: observation.error_snippet.clone(),
            })
            .await;

        let settings = self.settings.clone();
        pools
            .update(kind, uuid, |node| {
                apply_counters(node, signal, now_ms);
                if settings.mode != PolicyMode::Observe {
                    apply_transition(node, signal, &observation, &settings, now_ms);
                }
            })
            .await;
    }

    /// Identity-collision watch: two active nodes presenting the same
    /// account fingerprint inside the window is a sharing violation; the
    /// newer node (greater uuid) is quarantined.
    pub async fn note_identity(
        &self,
        pools: &PoolManager,
        kind: ProviderKind,
        uuid: Uuid,
        fingerprint: &str,
        now_ms: i64,
    ) {
        if !self.settings.enabled {
            return;
        }
        let clashing = {
            let mut guard = self.fingerprints.lock().await;
            let clash = match guard.get(fingerprint) {
                Some((seen_uuid, seen_at))
                    if *seen_uuid != uuid
                        && now_ms - *seen_at <= self.settings.identity_collision_window_ms =>
                {
                    Some(*seen_uuid)
                }
                _ => None,
            };
            guard.insert(fingerprint.to_string(), (uuid, now_ms));
            clash
        };
        let Some(other) = clashing else {
            return;
        };

        let victim = if uuid.to_string() > other.to_string() {
            uuid
        } else {
            other
        };
        self.hub
            .emit(RiskEvent {
                at_ms: now_ms,
                uuid: victim,
                provider: kind,
                signal: RiskSignal::IdentityCollision,
                reason_code: "identity_collision".to_string(),
                http_status: None,
                error_snippet: None,
            })
            .await;
        if self.settings.mode != PolicyMode::Observe {
            pools
                .update(kind, victim, |node| {
                    node.state = LifecycleState::Quarantined;
                    node.is_healthy = false;
                })
                .await;
        }
    }
}

fn apply_counters(node: &mut CredentialNode, signal: RiskSignal, now_ms: i64) {
    match signal {
        RiskSignal::Success => {
            node.auth_failure_streak = 0;
            node.rate_limit_streak = 0;
            node.transient_streak = 0;
            node.failure_count = 0;
        }
        RiskSignal::AuthInvalid => {
            node.auth_failure_streak += 1;
            node.error_count += 1;
            node.transient_streak = 0;
        }
        RiskSignal::QuotaExceeded
        | RiskSignal::RateLimited
        | RiskSignal::Suspended
        | RiskSignal::Banned => {
            node.error_count += 1;
            node.transient_streak = 0;
            if signal == RiskSignal::RateLimited {
                node.rate_limit_streak += 1;
            }
        }
        RiskSignal::NetworkTransient => {
            node.error_count += 1;
            node.transient_streak += 1;
            if node.failure_count == 0 {
                node.failure_window_start_ms = now_ms;
            }
            node.failure_count += 1;
        }
        RiskSignal::ManualRelease => {
            node.auth_failure_streak = 0;
            node.rate_limit_streak = 0;
            node.transient_streak = 0;
            node.failure_count = 0;
        }
        _ => {}
    }
}

fn apply_transition(
    node: &mut CredentialNode,
    signal: RiskSignal,
    observation: &Observation,
    settings: &RiskSettings,
    now_ms: i64,
) {
    // Admin/provider signals bypass the outcome table.
    match signal {
        RiskSignal::ProviderDisabled => {
            node.is_disabled = true;
            node.state = LifecycleState::Disabled;
            return;
        }
        RiskSignal::ProviderEnabled => {
            node.is_disabled = false;
            node.state = LifecycleState::Healthy;
            node.is_healthy = true;
            return;
        }
        RiskSignal::ProviderNeedsRefresh => {
            node.needs_refresh = true;
            if node.state == LifecycleState::Healthy {
                node.state = LifecycleState::NeedsRefresh;
            }
            return;
        }
        RiskSignal::ProviderMarkedHealthy => {
            node.is_healthy = true;
            node.needs_refresh = false;
            if !node.state.is_terminal_for_selection() {
                node.state = LifecycleState::Healthy;
            }
            return;
        }
        RiskSignal::ProviderMarkedUnhealthy => {
            node.is_healthy = false;
            return;
        }
        RiskSignal::IdentityCollision | RiskSignal::Unknown => return,
        _ => {}
    }

    let mut next = next_state(node.state, signal);
    if settings.mode == PolicyMode::EnforceSoft && next == LifecycleState::Banned {
        next = LifecycleState::Quarantined;
    }

    // Protective emergency: a run of transient failures parks the node
    // briefly to shield the account during incidents.
    if settings.mode == PolicyMode::ProtectiveEmergency
        && signal == RiskSignal::NetworkTransient
        && node.transient_streak >= EMERGENCY_TRANSIENT_STREAK
    {
        next = LifecycleState::Cooldown;
        node.cooldown_until_ms = Some(now_ms + EMERGENCY_COOLDOWN_MS);
        node.transient_streak = 0;
    }

    match signal {
        RiskSignal::RateLimited if next == LifecycleState::Cooldown => {
            let exp = node.rate_limit_streak.min(20);
            let backoff =
                (settings.cooldown_base_ms.saturating_mul(1i64 << exp)).min(RATE_LIMIT_COOLDOWN_CAP_MS);
            let mut until = now_ms + backoff;
            if let Some(reset) = observation.header_reset_ms {
                until = until.max(reset);
                node.rate_limit_reset_ms = Some(reset);
            }
            // Extension only: never shorten an existing cooldown.
            node.cooldown_until_ms = Some(node.cooldown_until_ms.unwrap_or(0).max(until));
        }
        RiskSignal::QuotaExceeded if next == LifecycleState::Cooldown => {
            node.cooldown_until_ms = Some(next_midnight_ms(now_ms, settings.cooldown_offset));
        }
        RiskSignal::Success | RiskSignal::ManualRelease => {
            node.cooldown_until_ms = None;
            node.rate_limit_reset_ms = None;
            node.needs_refresh = false;
        }
        _ => {}
    }

    if next == LifecycleState::NeedsRefresh {
        node.needs_refresh = true;
    }
    node.state = next;
    node.is_healthy = matches!(next, LifecycleState::Healthy);
}

/// Enforce-strict transition table (§4.2). Soft mode remaps `banned` after
/// the fact; observe mode never calls this.
fn next_state(from: LifecycleState, signal: RiskSignal) -> LifecycleState {
    use LifecycleState as S;
    use RiskSignal as G;

    if from == S::Disabled {
        return S::Disabled;
    }
    if signal == G::ManualRelease {
        return S::Healthy;
    }
    if from == S::Banned {
        return S::Banned;
    }
    if from == S::Suspended {
        return if signal == G::Banned { S::Banned } else { S::Suspended };
    }

    match signal {
        G::Success => S::Healthy,
        G::AuthInvalid => match from {
            S::Healthy | S::Unknown => S::NeedsRefresh,
            _ => S::Quarantined,
        },
        G::QuotaExceeded | G::RateLimited => S::Cooldown,
        G::Suspended => S::Suspended,
        G::Banned => S::Banned,
        G::NetworkTransient => from,
        _ => from,
    }
}

/// Epoch ms of the next midnight in the configured fixed offset.
pub fn next_midnight_ms(now_ms: i64, offset: time::UtcOffset) -> i64 {
    let now = time::OffsetDateTime::from_unix_timestamp(now_ms.div_euclid(1_000))
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
        .to_offset(offset);
    let next_day = now.date().next_day().unwrap_or(now.date());
    let midnight = next_day.midnight().assume_offset(offset);
    midnight.unix_timestamp() * 1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_table_matches_spec_rows() {
        use LifecycleState as S;
        use RiskSignal as G;

        assert_eq!(next_state(S::Healthy, G::Success), S::Healthy);
        assert_eq!(next_state(S::Healthy, G::AuthInvalid), S::NeedsRefresh);
        assert_eq!(next_state(S::Healthy, G::QuotaExceeded), S::Cooldown);
        assert_eq!(next_state(S::Healthy, G::RateLimited), S::Cooldown);
        assert_eq!(next_state(S::Healthy, G::Suspended), S::Suspended);
        assert_eq!(next_state(S::Healthy, G::Banned), S::Banned);
        assert_eq!(next_state(S::Healthy, G::NetworkTransient), S::Healthy);

        assert_eq!(next_state(S::NeedsRefresh, G::AuthInvalid), S::Quarantined);
        assert_eq!(next_state(S::NeedsRefresh, G::Success), S::Healthy);
        assert_eq!(
            next_state(S::NeedsRefresh, G::NetworkTransient),
            S::NeedsRefresh
        );

        assert_eq!(next_state(S::Cooldown, G::AuthInvalid), S::Quarantined);
        assert_eq!(next_state(S::Cooldown, G::RateLimited), S::Cooldown);
        assert_eq!(next_state(S::Quarantined, G::Success), S::Healthy);
        assert_eq!(
            next_state(S::Quarantined, G::NetworkTransient),
            S::Quarantined
        );

        assert_eq!(next_state(S::Suspended, G::Success), S::Suspended);
        assert_eq!(next_state(S::Suspended, G::Banned), S::Banned);
        assert_eq!(next_state(S::Suspended, G::ManualRelease), S::Healthy);
        assert_eq!(next_state(S::Banned, G::Success), S::Banned);
        assert_eq!(next_state(S::Banned, G::ManualRelease), S::Healthy);
        assert_eq!(next_state(S::Disabled, G::ManualRelease), S::Disabled);
    }

    #[test]
    fn next_midnight_is_day_boundary_in_offset() {
        // 2024-03-10 12:00:00 UTC
        let noon_utc_ms = 1_710_072_000_000;
        let next = next_midnight_ms(noon_utc_ms, time::UtcOffset::UTC);
        let dt = time::OffsetDateTime::from_unix_timestamp(next / 1_000).unwrap();
        assert_eq!(dt.time(), time::Time::MIDNIGHT);
        assert_eq!(dt.date(), time::macros::date!(2024 - 03 - 11));

        let plus8 = time::macros::offset!(+8);
        let next = next_midnight_ms(noon_utc_ms, plus8);
        let dt = time::OffsetDateTime::from_unix_timestamp(next / 1_000)
            .unwrap()
            .to_offset(plus8);
        assert_eq!(dt.time(), time::Time::MIDNIGHT);
    }
}
