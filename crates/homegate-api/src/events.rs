//! Event types for homegated -> client streaming

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{BlockNotice, PolicyState, StatusSnapshot, Verdict, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: homegate_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full status snapshot (sent on subscribe and after mutations)
    StateChanged(StatusSnapshot),

    /// The verdict flipped between allow and block
    VerdictChanged {
        verdict: Verdict,
        state: PolicyState,
    },

    /// The app must be blocked now; enforcement agents act on this
    Blocked(BlockNotice),

    PresenceChanged {
        at_home: bool,
    },

    OverrideActivated {
        overrides_remaining: u32,
        expires_at: DateTime<Local>,
    },

    OverrideExpired,

    /// A usage session was committed to today's ledger
    SessionEnded {
        minutes: u32,
        used_today: u32,
    },

    /// Projected remaining quota crossed a warning threshold
    QuotaWarning {
        remaining_minutes: u32,
    },

    /// User-facing text for the UI agent to show (override granted, quota warning)
    Notification {
        message: String,
    },

    /// Service is shutting down
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockReason;

    #[test]
    fn event_serialization() {
        let event = Event::new(EventPayload::Blocked(BlockNotice {
            reason: BlockReason::AtHome,
            message: "Restricted at home. 45 minutes remaining today".into(),
            override_available: true,
            overrides_remaining: 3,
        }));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"blocked\""));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.api_version, API_VERSION);
        assert!(matches!(parsed.payload, EventPayload::Blocked(_)));
    }

    #[test]
    fn unit_events_round_trip() {
        let json = serde_json::to_string(&Event::new(EventPayload::OverrideExpired)).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed.payload, EventPayload::OverrideExpired));
    }
}
