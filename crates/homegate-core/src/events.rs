//! Core events emitted by the engine

use chrono::{DateTime, Local};
use homegate_api::{BlockNotice, PolicyState, Verdict};

/// Events emitted by the core engine
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// Verdict flipped between allow and block
    VerdictChanged { verdict: Verdict, state: PolicyState },

    /// Block newly entered; enforcement must act on this
    Blocked(BlockNotice),

    /// Stored presence changed
    PresenceChanged { at_home: bool },

    OverrideActivated {
        overrides_remaining: u32,
        expires_at: DateTime<Local>,
    },

    /// Detected by the read-triggered expiry check
    OverrideExpired,

    /// A session was committed to the ledger
    SessionEnded { minutes: u32, used_today: u32 },

    /// Projected remaining quota crossed a warning threshold
    QuotaWarning { remaining_minutes: u32 },
}
