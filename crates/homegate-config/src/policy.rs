//! Validated policy structures

use crate::schema::{RawConfig, RawHome, RawServiceConfig};
use crate::validation::parse_at_home_mode;
use homegate_api::{AtHomeMode, DEFAULT_DAILY_LIMIT_MINUTES};
use homegate_util::{data_dir_without_env, default_log_dir, socket_path_without_env};
use std::path::PathBuf;
use std::time::Duration;

/// Default remaining-minute thresholds for quota warnings
pub const DEFAULT_QUOTA_WARNINGS_MINUTES: [u32; 3] = [30, 15, 5];

/// Default service tick interval
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(15);

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone)]
pub struct Policy {
    /// Service configuration
    pub service: ServiceConfig,

    /// Daily quota used until persisted state or an admin says otherwise
    pub daily_limit_minutes: u32,

    /// Home zone seeded from config, if any
    pub home: Option<HomeConfig>,

    pub at_home_mode: AtHomeMode,

    /// Warning thresholds, largest first
    pub quota_warnings_minutes: Vec<u32>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let at_home_mode = raw
            .policy
            .at_home_mode
            .as_deref()
            .and_then(|m| parse_at_home_mode(m).ok())
            .unwrap_or_default();

        let mut quota_warnings_minutes = raw
            .policy
            .quota_warnings_minutes
            .unwrap_or_else(|| DEFAULT_QUOTA_WARNINGS_MINUTES.to_vec());
        quota_warnings_minutes.sort_unstable_by(|a, b| b.cmp(a));
        quota_warnings_minutes.dedup();

        Self {
            service: ServiceConfig::from_raw(raw.service),
            daily_limit_minutes: raw
                .limits
                .daily_limit_minutes
                .unwrap_or(DEFAULT_DAILY_LIMIT_MINUTES),
            home: raw.home.map(HomeConfig::from_raw),
            at_home_mode,
            quota_warnings_minutes,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            daily_limit_minutes: DEFAULT_DAILY_LIMIT_MINUTES,
            home: None,
            at_home_mode: AtHomeMode::default(),
            quota_warnings_minutes: DEFAULT_QUOTA_WARNINGS_MINUTES.to_vec(),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub log_dir: PathBuf,
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(socket_path_without_env),
            log_dir: raw.log_dir.unwrap_or_else(default_log_dir),
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
            tick_interval: raw
                .tick_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TICK_INTERVAL),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: socket_path_without_env(),
            log_dir: default_log_dir(),
            data_dir: data_dir_without_env(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Home zone from config
#[derive(Debug, Clone, PartialEq)]
pub struct HomeConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub wifi_ssid: String,
}

impl HomeConfig {
    fn from_raw(raw: RawHome) -> Self {
        Self {
            latitude: raw.latitude,
            longitude: raw.longitude,
            wifi_ssid: raw.wifi_ssid.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_sections() {
        let raw: RawConfig = toml::from_str("config_version = 1").unwrap();
        let policy = Policy::from_raw(raw);

        assert_eq!(policy.daily_limit_minutes, DEFAULT_DAILY_LIMIT_MINUTES);
        assert_eq!(policy.at_home_mode, AtHomeMode::AlwaysBlock);
        assert_eq!(policy.quota_warnings_minutes, vec![30, 15, 5]);
        assert_eq!(policy.service.tick_interval, DEFAULT_TICK_INTERVAL);
        assert!(policy.home.is_none());
    }

    #[test]
    fn thresholds_are_sorted_descending() {
        let raw: RawConfig = toml::from_str(
            r#"
            config_version = 1
            [policy]
            quota_warnings_minutes = [5, 60, 15, 5]
        "#,
        )
        .unwrap();

        let policy = Policy::from_raw(raw);
        assert_eq!(policy.quota_warnings_minutes, vec![60, 15, 5]);
    }

    #[test]
    fn home_without_ssid_uses_empty_string() {
        let raw: RawConfig = toml::from_str(
            r#"
            config_version = 1
            [home]
            latitude = 10.0
            longitude = 20.0
        "#,
        )
        .unwrap();

        let home = Policy::from_raw(raw).home.unwrap();
        assert_eq!(home.wifi_ssid, "");
    }
}
