//! Environment-driven settings. Invalid values are fatal at boot: the
//! binary maps `ConfigError` to exit code 1.

use std::collections::HashMap;
use std::path::PathBuf;

use maki_common::ProviderKind;
use maki_provider_core::{PolicyMode, PoolTuning, RiskSettings, RotationPolicy, RotationStrategy};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub config_dir: PathBuf,
    pub default_provider: ProviderKind,
    pub pool_tuning: HashMap<ProviderKind, PoolTuning>,
    pub default_tuning: PoolTuning,
    pub rotation: RotationPolicy,
    pub risk: RiskSettings,
    pub request_max_retries: u32,
    pub request_base_delay_ms: u64,
    pub codex_base_url: Option<String>,
    pub letta_base_url: Option<String>,
    pub letta_agent_id: Option<String>,
    pub custom_base_url: Option<String>,
    /// Raw JSON list of seed accounts for the Kiro pool.
    pub kiro_pool_config: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            config_dir: PathBuf::from("configs"),
            default_provider: ProviderKind::Kiro,
            pool_tuning: HashMap::new(),
            default_tuning: PoolTuning::default(),
            rotation: RotationPolicy::default(),
            risk: RiskSettings::default(),
            request_max_retries: 3,
            request_base_delay_ms: 1_000,
            codex_base_url: None,
            letta_base_url: None,
            letta_agent_id: None,
            custom_base_url: None,
            kiro_pool_config: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Settings::default();

        if let Some(host) = env("HOST") {
            settings.host = host;
        }
        if let Some(port) = env("PORT") {
            settings.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value: port })?;
        }
        if let Some(dir) = env("CONFIG_DIR") {
            settings.config_dir = PathBuf::from(dir);
        }
        if let Some(value) = env("DEFAULT_PROVIDER") {
            settings.default_provider = ProviderKind::parse(&value).ok_or(ConfigError::Invalid {
                key: "DEFAULT_PROVIDER",
                value,
            })?;
        }

        // Kiro pool knobs double as the defaults for every pool.
        let mut kiro = PoolTuning::default();
        if let Some(value) = env("KIRO_POOL_STRATEGY") {
            kiro.strategy = RotationStrategy::parse(&value).ok_or(ConfigError::Invalid {
                key: "KIRO_POOL_STRATEGY",
                value,
            })?;
        }
        if let Some(value) = env("KIRO_POOL_MAX_FAILURES") {
            kiro.max_failures = value.parse().map_err(|_| ConfigError::Invalid {
                key: "KIRO_POOL_MAX_FAILURES",
                value,
            })?;
        }
        if let Some(value) = env("KIRO_POOL_FAILURE_RESET_TIME") {
            kiro.failure_reset_ms = value.parse().map_err(|_| ConfigError::Invalid {
                key: "KIRO_POOL_FAILURE_RESET_TIME",
                value,
            })?;
        }
        settings.pool_tuning.insert(ProviderKind::Kiro, kiro);
        settings.kiro_pool_config = env("KIRO_POOL_CONFIG");

        settings.rotation.enabled = env_bool("ACCOUNT_ROTATION_POLICY_ENABLED").unwrap_or(false);
        if let Some(value) = env("ACCOUNT_ROTATION_POLICY") {
            settings.rotation.strategy =
                Some(RotationStrategy::parse(&value).ok_or(ConfigError::Invalid {
                    key: "ACCOUNT_ROTATION_POLICY",
                    value,
                })?);
        }

        if let Some(enabled) = env_bool("RISK_ENABLED") {
            settings.risk.enabled = enabled;
        }
        if let Some(value) = env("RISK_MODE") {
            settings.risk.mode = PolicyMode::parse(&value).ok_or(ConfigError::Invalid {
                key: "RISK_MODE",
                value,
            })?;
        }
        if let Some(value) = env("RISK_MAX_EVENTS") {
            settings.risk.max_events = value.parse().map_err(|_| ConfigError::Invalid {
                key: "RISK_MAX_EVENTS",
                value,
            })?;
        }
        if let Some(value) = env("RISK_FLUSH_DEBOUNCE_MS") {
            settings.risk.flush_debounce_ms = value.parse().map_err(|_| ConfigError::Invalid {
                key: "RISK_FLUSH_DEBOUNCE_MS",
                value,
            })?;
        }
        if let Some(value) = env("RISK_IDENTITY_COLLISION_WINDOW_MS") {
            settings.risk.identity_collision_window_ms =
                value.parse().map_err(|_| ConfigError::Invalid {
                    key: "RISK_IDENTITY_COLLISION_WINDOW_MS",
                    value,
                })?;
        }
        if let Some(value) = env("COOLDOWN_TIMEZONE") {
            settings.risk.cooldown_offset = parse_offset(&value).ok_or(ConfigError::Invalid {
                key: "COOLDOWN_TIMEZONE",
                value,
            })?;
        }

        if let Some(value) = env("REQUEST_MAX_RETRIES") {
            settings.request_max_retries = value.parse().map_err(|_| ConfigError::Invalid {
                key: "REQUEST_MAX_RETRIES",
                value,
            })?;
        }
        if let Some(value) = env("REQUEST_BASE_DELAY") {
            settings.request_base_delay_ms = value.parse().map_err(|_| ConfigError::Invalid {
                key: "REQUEST_BASE_DELAY",
                value,
            })?;
        }

        settings.codex_base_url = env("CODEX_BASE_URL");
        settings.letta_base_url = env("LETTA_BASE_URL");
        settings.letta_agent_id = env("LETTA_AGENT_ID");
        settings.custom_base_url = env("CUSTOM_BASE_URL");

        Ok(settings)
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env(key).map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// `UTC` or a fixed `±HH:MM` offset.
pub fn parse_offset(raw: &str) -> Option<time::UtcOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("utc") || raw.eq_ignore_ascii_case("z") {
        return Some(time::UtcOffset::UTC);
    }
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1i8, &raw[1..]),
        b'-' => (-1i8, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i8>().ok()?, m.parse::<i8>().ok()?),
        None => (rest.parse::<i8>().ok()?, 0),
    };
    time::UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}

#[cfg(test)]
mod tests {
    use super::parse_offset;

    #[test]
    fn offsets_parse() {
        assert_eq!(parse_offset("UTC"), Some(time::UtcOffset::UTC));
        assert_eq!(
            parse_offset("+08:00"),
            Some(time::UtcOffset::from_hms(8, 0, 0).unwrap())
        );
        assert_eq!(
            parse_offset("-05:30"),
            Some(time::UtcOffset::from_hms(-5, -30, 0).unwrap())
        );
        assert_eq!(parse_offset("PST"), None);
    }
}
