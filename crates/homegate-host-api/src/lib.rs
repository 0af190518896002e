//! Enforcement host interface for homegated
//!
//! The policy engine only decides. Acting on a block (covering or closing the
//! restricted app, surfacing a notice) belongs to a platform-specific host
//! behind the [`EnforcementHost`] trait. This crate contains no platform code
//! itself.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
