//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Daily quota settings
    #[serde(default)]
    pub limits: RawLimits,

    /// Home zone; can also be set at runtime by an admin client
    #[serde(default)]
    pub home: Option<RawHome>,

    /// Decision policy knobs
    #[serde(default)]
    pub policy: RawPolicy,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: $XDG_RUNTIME_DIR/homegate/homegated.sock)
    pub socket_path: Option<PathBuf>,

    /// Log directory
    pub log_dir: Option<PathBuf>,

    /// Data directory for store
    pub data_dir: Option<PathBuf>,

    /// How often the service checks for override expiry and quota warnings
    pub tick_interval_ms: Option<u64>,
}

/// Daily quota settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLimits {
    /// Initial daily limit; an admin may change it at runtime
    pub daily_limit_minutes: Option<u32>,
}

/// Home zone
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawHome {
    pub latitude: f64,
    pub longitude: f64,

    /// Home Wi-Fi network name; empty disables the Wi-Fi check
    #[serde(default)]
    pub wifi_ssid: Option<String>,
}

/// Decision policy knobs
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPolicy {
    /// "always_block" or "within_quota"
    pub at_home_mode: Option<String>,

    /// Remaining-minute thresholds that raise a quota warning
    pub quota_warnings_minutes: Option<Vec<u32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            config_version = 1

            [service]
            socket_path = "/tmp/homegate-test/homegated.sock"
            tick_interval_ms = 5000

            [limits]
            daily_limit_minutes = 90

            [home]
            latitude = 47.6062
            longitude = -122.3321
            wifi_ssid = "HomeNet"

            [policy]
            at_home_mode = "within_quota"
            quota_warnings_minutes = [20, 10]
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.limits.daily_limit_minutes, Some(90));
        assert_eq!(config.service.tick_interval_ms, Some(5000));

        let home = config.home.unwrap();
        assert_eq!(home.wifi_ssid.as_deref(), Some("HomeNet"));
        assert_eq!(config.policy.at_home_mode.as_deref(), Some("within_quota"));
    }

    #[test]
    fn sections_are_optional() {
        let config: RawConfig = toml::from_str("config_version = 1").unwrap();
        assert!(config.home.is_none());
        assert!(config.limits.daily_limit_minutes.is_none());
        assert!(config.policy.at_home_mode.is_none());
    }
}
