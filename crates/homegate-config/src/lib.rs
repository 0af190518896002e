//! Configuration parsing and validation for homegated
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Service paths and tick interval
//! - Daily limit, home zone, and at-home policy mode
//! - Validation with clear error messages

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Policy> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let policy = parse_config(&content)?;
    tracing::debug!(path = %path.display(), "Configuration loaded");
    Ok(policy)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Policy> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Policy::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use homegate_api::AtHomeMode;
    use std::io::Write;

    #[test]
    fn parse_minimal_config() {
        let policy = parse_config("config_version = 1").unwrap();
        assert_eq!(policy.daily_limit_minutes, 120);
        assert!(policy.home.is_none());
    }

    #[test]
    fn parse_home_and_mode() {
        let config = r#"
            config_version = 1

            [home]
            latitude = 52.52
            longitude = 13.405
            wifi_ssid = "Wohnung"

            [policy]
            at_home_mode = "within_quota"
        "#;

        let policy = parse_config(config).unwrap();
        assert_eq!(policy.at_home_mode, AtHomeMode::WithinQuota);
        assert_eq!(policy.home.unwrap().wifi_ssid, "Wohnung");
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_values() {
        let config = r#"
            config_version = 1
            [limits]
            daily_limit_minutes = 10
        "#;

        match parse_config(config) {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 1),
            other => panic!("Expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "config_version = 1\n[limits]\ndaily_limit_minutes = 45").unwrap();

        let policy = load_config(file.path()).unwrap();
        assert_eq!(policy.daily_limit_minutes, 45);
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn example_config_is_valid() {
        let policy = parse_config(include_str!("../../../config.example.toml")).unwrap();
        assert_eq!(policy.daily_limit_minutes, 120);
        assert_eq!(policy.at_home_mode, AtHomeMode::AlwaysBlock);
        assert_eq!(policy.quota_warnings_minutes, vec![30, 15, 5]);
        assert_eq!(policy.service.tick_interval.as_millis(), 15000);
    }
}
