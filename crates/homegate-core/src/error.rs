//! Contract violations rejected by the policy engine

use thiserror::Error;

/// Errors returned by engine operations.
///
/// Quota and override exhaustion are ordinary states and show up in verdicts
/// and status; only calls that break an operation's contract fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("Usage minutes must be non-negative, got {0}")]
    NegativeMinutes(i64),

    #[error("No emergency overrides left this month")]
    OverrideQuotaExhausted,

    #[error("Invalid home coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

pub type PolicyResult<T> = Result<T, PolicyError>;
