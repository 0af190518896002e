//! Shared utilities for homegate
//!
//! This crate provides:
//! - Clock abstraction (system clock with mock-time support, manual clock for tests)
//! - Calendar keys for daily and monthly rollover
//! - ID types (SessionId, ClientId)
//! - Error types
//! - Rate limiting helpers
//! - Default paths for socket, config, data, and log directories

mod error;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
