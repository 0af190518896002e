//! Configuration validation

use crate::schema::{RawConfig, RawHome};
use homegate_api::{AtHomeMode, MAX_DAILY_LIMIT_MINUTES, MIN_DAILY_LIMIT_MINUTES};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("daily_limit_minutes = {0} is outside the allowed range 30..=240")]
    DailyLimitOutOfRange(u32),

    #[error("home.{field} = {value} is out of range")]
    CoordinateOutOfRange { field: &'static str, value: f64 },

    #[error("Unknown at_home_mode '{0}' (expected \"always_block\" or \"within_quota\")")]
    UnknownAtHomeMode(String),

    #[error("Quota warning threshold {0} must be between 1 and the maximum daily limit")]
    InvalidWarningThreshold(u32),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(limit) = config.limits.daily_limit_minutes
        && !(MIN_DAILY_LIMIT_MINUTES..=MAX_DAILY_LIMIT_MINUTES).contains(&limit)
    {
        errors.push(ValidationError::DailyLimitOutOfRange(limit));
    }

    if let Some(home) = &config.home {
        errors.extend(validate_home(home));
    }

    if let Some(mode) = &config.policy.at_home_mode
        && let Err(e) = parse_at_home_mode(mode)
    {
        errors.push(e);
    }

    if let Some(thresholds) = &config.policy.quota_warnings_minutes {
        for &minutes in thresholds {
            if minutes == 0 || minutes > MAX_DAILY_LIMIT_MINUTES {
                errors.push(ValidationError::InvalidWarningThreshold(minutes));
            }
        }
    }

    if config.service.tick_interval_ms == Some(0) {
        errors.push(ValidationError::GlobalError(
            "service.tick_interval_ms must be greater than 0".into(),
        ));
    }

    errors
}

fn validate_home(home: &RawHome) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !home.latitude.is_finite() || !(-90.0..=90.0).contains(&home.latitude) {
        errors.push(ValidationError::CoordinateOutOfRange {
            field: "latitude",
            value: home.latitude,
        });
    }

    if !home.longitude.is_finite() || !(-180.0..=180.0).contains(&home.longitude) {
        errors.push(ValidationError::CoordinateOutOfRange {
            field: "longitude",
            value: home.longitude,
        });
    }

    errors
}

/// Parse the `at_home_mode` setting
pub fn parse_at_home_mode(s: &str) -> Result<AtHomeMode, ValidationError> {
    match s.to_lowercase().as_str() {
        "always_block" => Ok(AtHomeMode::AlwaysBlock),
        "within_quota" => Ok(AtHomeMode::WithinQuota),
        other => Err(ValidationError::UnknownAtHomeMode(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> RawConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn accepts_valid_config() {
        let config = parse(
            r#"
            config_version = 1
            [limits]
            daily_limit_minutes = 30
            [home]
            latitude = -33.86
            longitude = 151.21
        "#,
        );
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn rejects_daily_limit_out_of_range() {
        let config = parse(
            r#"
            config_version = 1
            [limits]
            daily_limit_minutes = 300
        "#,
        );
        let errors = validate_config(&config);
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::DailyLimitOutOfRange(300)]
        ));
    }

    #[test]
    fn rejects_bad_coordinates() {
        let config = parse(
            r#"
            config_version = 1
            [home]
            latitude = 91.0
            longitude = -181.0
        "#,
        );
        assert_eq!(validate_config(&config).len(), 2);
    }

    #[test]
    fn rejects_unknown_mode_and_thresholds() {
        let config = parse(
            r#"
            config_version = 1
            [policy]
            at_home_mode = "sometimes"
            quota_warnings_minutes = [0, 15]
        "#,
        );
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::UnknownAtHomeMode(m) if m == "sometimes"))
        );
    }

    #[test]
    fn test_parse_at_home_mode() {
        assert_eq!(
            parse_at_home_mode("always_block").unwrap(),
            AtHomeMode::AlwaysBlock
        );
        assert_eq!(
            parse_at_home_mode("Within_Quota").unwrap(),
            AtHomeMode::WithinQuota
        );
        assert!(parse_at_home_mode("never").is_err());
    }
}
