use serde::{Deserialize, Serialize};

use crate::select::RotationStrategy;

/// Per-pool selection tuning. The failure budget here gates availability
/// only; lifecycle state belongs to the risk engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolTuning {
    pub strategy: RotationStrategy,
    pub max_failures: u32,
    pub failure_reset_ms: i64,
}

impl Default for PoolTuning {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::RoundRobin,
            max_failures: 3,
            failure_reset_ms: 300_000,
        }
    }
}

/// Account-aware rotation: when enabled, sibling nodes (same account key)
/// rotate coherently and share refreshed tokens.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RotationPolicy {
    pub enabled: bool,
    pub strategy: Option<RotationStrategy>,
}

/// How aggressively risk signals are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyMode {
    Observe,
    EnforceSoft,
    EnforceStrict,
    ProtectiveEmergency,
}

impl PolicyMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "observe" => Some(PolicyMode::Observe),
            "enforce-soft" => Some(PolicyMode::EnforceSoft),
            "enforce-strict" => Some(PolicyMode::EnforceStrict),
            "protective-emergency" => Some(PolicyMode::ProtectiveEmergency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskSettings {
    pub enabled: bool,
    pub mode: PolicyMode,
    pub max_events: usize,
    pub flush_debounce_ms: u64,
    pub identity_collision_window_ms: i64,
    /// Base for the rate-limit exponential backoff.
    pub cooldown_base_ms: i64,
    /// Fixed offset used for "next local midnight" arithmetic.
    pub cooldown_offset: time::UtcOffset,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: PolicyMode::EnforceStrict,
            max_events: 5_000,
            flush_debounce_ms: 500,
            identity_collision_window_ms: 30_000,
            cooldown_base_ms: 1_000,
            cooldown_offset: time::UtcOffset::UTC,
        }
    }
}
