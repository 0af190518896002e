//! Enforcement host traits

use async_trait::async_trait;
use homegate_api::BlockNotice;
use thiserror::Error;

/// Errors from enforcement host operations
#[derive(Debug, Error)]
pub enum HostError {
    /// No platform agent was listening to act on the request
    #[error("No enforcement agent available")]
    NoAgent,

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Platform side of enforcement - implemented per platform
#[async_trait]
pub trait EnforcementHost: Send + Sync {
    /// Act on a block verdict: take the restricted app away and show the notice
    async fn enforce_block(&self, notice: &BlockNotice) -> HostResult<()>;

    /// Optional: show an informational notification (override granted, quota warning)
    async fn notify(&self, _message: &str) -> HostResult<()> {
        Ok(())
    }

    /// Optional: check if the host is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}
