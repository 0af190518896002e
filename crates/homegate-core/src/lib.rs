//! Core access policy engine for homegated
//!
//! This crate is the heart of homegate, containing:
//! - Daily usage quota with lazy day rollover ([`UsageLedger`])
//! - Usage session accrual ([`SessionTracker`])
//! - Monthly emergency overrides with read-triggered expiry ([`OverrideLedger`])
//! - Home zone matching ([`HomeProfile`])
//! - The allow/block decision and its transition side effects ([`PolicyEngine`])
//!
//! All time is read through an injected [`homegate_util::Clock`].

mod engine;
mod error;
mod events;
mod overrides;
mod presence;
mod session;
mod usage;

pub use engine::*;
pub use error::*;
pub use events::*;
pub use overrides::*;
pub use presence::*;
pub use session::*;
pub use usage::*;
